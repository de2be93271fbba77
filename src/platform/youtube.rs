//! YouTube platform provider.
//!
//! Collapses every URL form pointing at the same video (watch pages,
//! Shorts, embeds, `youtu.be` short links, mobile and music domains) into
//! one canonical id, and maps quality variants to yt-dlp format selectors.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::{
    ExtractionPlan, Platform, PlatformProvider, ResolveError, Variant, VideoIdentity,
};

/// Path-based id forms: /shorts/ID, /embed/ID, /live/ID.
#[allow(clippy::expect_used)]
static PATH_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(?:shorts|embed|live)/([A-Za-z0-9_-]+)").expect("YouTube path regex is valid")
});

/// Quality variants like `480p` or `1080p`.
#[allow(clippy::expect_used)]
static QUALITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{3,4})p$").expect("quality regex is valid")
});

/// Provider for YouTube videos and Shorts.
#[derive(Debug, Default)]
pub struct YoutubeProvider;

impl YoutubeProvider {
    /// Creates a new provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl PlatformProvider for YoutubeProvider {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    fn matches(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => {
                let host = host.to_ascii_lowercase();
                host == "youtu.be"
                    || host == "youtube.com"
                    || host.ends_with(".youtube.com")
            }
            None => false,
        }
    }

    fn extract_canonical_id(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?.to_ascii_lowercase();

        // youtu.be/ID - the id is the first path segment
        if host == "youtu.be" {
            let segment = url.path_segments()?.next()?;
            if segment.is_empty() {
                return None;
            }
            return Some(segment.to_string());
        }

        // youtube.com/watch?v=ID
        if let Some((_, id)) = url.query_pairs().find(|(name, _)| name == "v") {
            if !id.is_empty() {
                return Some(id.into_owned());
            }
        }

        // youtube.com/shorts/ID, /embed/ID, /live/ID
        PATH_ID_PATTERN
            .captures(url.path())
            .map(|captures| captures[1].to_string())
    }

    fn build_plan(
        &self,
        identity: &VideoIdentity,
        _source_url: &str,
        variant: &Variant,
    ) -> Result<ExtractionPlan, ResolveError> {
        let format_selector = if variant.is_default() {
            "best".to_string()
        } else if variant.as_str() == "audio" {
            "bestaudio/best".to_string()
        } else if let Some(captures) = QUALITY_PATTERN.captures(variant.as_str()) {
            let height = &captures[1];
            format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]")
        } else {
            return Err(ResolveError::UnsupportedVariant {
                platform: Platform::Youtube,
                variant: variant.as_str().to_string(),
            });
        };

        // Extraction always targets the canonical watch URL, not whatever
        // form (shorts, youtu.be, mobile) the caller pasted.
        Ok(ExtractionPlan {
            platform: Platform::Youtube,
            canonical_id: identity.canonical_id.clone(),
            source_url: format!("https://www.youtube.com/watch?v={}", identity.canonical_id),
            variant: variant.clone(),
            format_selector,
        })
    }
}
