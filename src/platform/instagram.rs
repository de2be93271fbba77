//! Instagram platform provider.
//!
//! Posts, reels, and IGTV entries sharing one shortcode are the same
//! content; all three URL forms collapse to that shortcode.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::{
    ExtractionPlan, Platform, PlatformProvider, ResolveError, Variant, VideoIdentity,
};

/// Shortcode forms: /p/CODE, /reel/CODE, /reels/CODE, /tv/CODE.
#[allow(clippy::expect_used)]
static SHORTCODE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(?:p|reels?|tv)/([A-Za-z0-9_-]+)").expect("Instagram path regex is valid")
});

/// Provider for Instagram posts, reels, and IGTV.
#[derive(Debug, Default)]
pub struct InstagramProvider;

impl InstagramProvider {
    /// Creates a new provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl PlatformProvider for InstagramProvider {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn matches(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => {
                let host = host.to_ascii_lowercase();
                host == "instagram.com" || host.ends_with(".instagram.com")
            }
            None => false,
        }
    }

    fn extract_canonical_id(&self, url: &Url) -> Option<String> {
        SHORTCODE_PATTERN
            .captures(url.path())
            .map(|captures| captures[1].to_string())
    }

    fn build_plan(
        &self,
        identity: &VideoIdentity,
        _source_url: &str,
        variant: &Variant,
    ) -> Result<ExtractionPlan, ResolveError> {
        // Instagram serves a single rendition; quality variants do not apply.
        if !variant.is_default() {
            return Err(ResolveError::UnsupportedVariant {
                platform: Platform::Instagram,
                variant: variant.as_str().to_string(),
            });
        }

        // Extraction targets the canonical post URL, whichever form the
        // caller pasted.
        Ok(ExtractionPlan {
            platform: Platform::Instagram,
            canonical_id: identity.canonical_id.clone(),
            source_url: format!("https://www.instagram.com/p/{}/", identity.canonical_id),
            variant: variant.clone(),
            format_selector: "best".to_string(),
        })
    }
}
