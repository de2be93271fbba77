//! TikTok platform provider.
//!
//! Full video URLs carry a numeric id in `/@user/video/{id}`; that id is
//! canonical. Shortened share links (`vm.tiktok.com/<code>`) would need a
//! network probe to expand, which identity resolution must not perform, so
//! they canonicalize on the trimmed share code instead.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::{
    ExtractionPlan, Platform, PlatformProvider, ResolveError, Variant, VideoIdentity,
};

/// Numeric video id in full URLs.
#[allow(clippy::expect_used)]
static VIDEO_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/video/(\d+)").expect("TikTok video regex is valid")
});

/// Provider for TikTok videos.
#[derive(Debug, Default)]
pub struct TiktokProvider;

impl TiktokProvider {
    /// Creates a new provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl PlatformProvider for TiktokProvider {
    fn platform(&self) -> Platform {
        Platform::Tiktok
    }

    fn matches(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => {
                let host = host.to_ascii_lowercase();
                host == "tiktok.com" || host.ends_with(".tiktok.com")
            }
            None => false,
        }
    }

    fn extract_canonical_id(&self, url: &Url) -> Option<String> {
        if let Some(captures) = VIDEO_ID_PATTERN.captures(url.path()) {
            return Some(captures[1].to_string());
        }

        // Share links: the path is an opaque short code. Not the true video
        // id, but stable for the same link, which is what dedup needs.
        let code = url.path().trim_matches('/');
        if code.is_empty() {
            None
        } else {
            Some(format!("share:{code}"))
        }
    }

    fn build_plan(
        &self,
        identity: &VideoIdentity,
        source_url: &str,
        variant: &Variant,
    ) -> Result<ExtractionPlan, ResolveError> {
        if !variant.is_default() {
            return Err(ResolveError::UnsupportedVariant {
                platform: Platform::Tiktok,
                variant: variant.as_str().to_string(),
            });
        }

        // No canonical URL form can be reconstructed from a share code, so
        // the plan keeps the caller's URL with the query stripped.
        let source_url = source_url
            .split_once('?')
            .map_or(source_url, |(base, _)| base)
            .to_string();

        Ok(ExtractionPlan {
            platform: Platform::Tiktok,
            canonical_id: identity.canonical_id.clone(),
            source_url,
            variant: variant.clone(),
            format_selector: "best".to_string(),
        })
    }
}
