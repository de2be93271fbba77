//! First-match dispatch over registered platform providers.

use tracing::{debug, instrument};
use url::Url;

use super::{ExtractionPlan, PlatformProvider, ResolveError, Variant, VideoIdentity};

/// Ordered collection of platform providers.
///
/// Resolution is deterministic: providers are tried in registration order
/// and the first whose `matches` accepts the URL's host wins.
pub struct PlatformRegistry {
    providers: Vec<Box<dyn PlatformProvider>>,
}

impl PlatformRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Registers a provider. Order matters: first match wins.
    pub fn register(&mut self, provider: Box<dyn PlatformProvider>) {
        self.providers.push(provider);
    }

    /// Returns the number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if no providers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Resolves a raw URL into a stable [`VideoIdentity`].
    ///
    /// Side-effect free and deterministic: tracking parameters, mobile
    /// domains, and shortened paths never change the result.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::InvalidUrl`] if the input does not parse as a URL
    /// - [`ResolveError::UnsupportedPlatform`] if no provider matches
    /// - [`ResolveError::CanonicalId`] if the matching provider finds no id
    #[instrument(skip(self), fields(url = %url))]
    pub fn resolve(&self, url: &str) -> Result<VideoIdentity, ResolveError> {
        let parsed = Url::parse(url.trim()).map_err(|_| ResolveError::InvalidUrl {
            url: url.to_string(),
        })?;

        let provider = self
            .providers
            .iter()
            .find(|provider| provider.matches(&parsed))
            .ok_or_else(|| ResolveError::UnsupportedPlatform {
                url: url.to_string(),
            })?;

        let canonical_id =
            provider
                .extract_canonical_id(&parsed)
                .ok_or_else(|| ResolveError::CanonicalId {
                    url: url.to_string(),
                })?;

        let identity = VideoIdentity::new(provider.platform(), canonical_id);
        debug!(%identity, "resolved URL to identity");
        Ok(identity)
    }

    /// Builds the extraction plan for an already-resolved identity.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnsupportedPlatform`] if the identity's
    /// platform has no registered provider, or the provider's own error for
    /// an unsupported variant.
    #[instrument(skip(self), fields(identity = %identity, variant = %variant))]
    pub fn build_plan(
        &self,
        identity: &VideoIdentity,
        source_url: &str,
        variant: &Variant,
    ) -> Result<ExtractionPlan, ResolveError> {
        let provider = self
            .providers
            .iter()
            .find(|provider| provider.platform() == identity.platform)
            .ok_or_else(|| ResolveError::UnsupportedPlatform {
                url: source_url.to_string(),
            })?;

        provider.build_plan(identity, source_url, variant)
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::platform::{Platform, build_default_platform_registry};

    #[test]
    fn test_resolve_rejects_non_url_input() {
        let registry = build_default_platform_registry();
        let err = registry.resolve("not a url").unwrap_err();
        assert!(matches!(err, ResolveError::InvalidUrl { .. }));
    }

    #[test]
    fn test_resolve_rejects_unknown_host() {
        let registry = build_default_platform_registry();
        let err = registry.resolve("http://example.com/foo").unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedPlatform { .. }));
    }

    #[test]
    fn test_resolve_is_deterministic_across_url_formats() {
        let registry = build_default_platform_registry();
        let forms = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ&feature=share",
            "https://youtu.be/dQw4w9WgXcQ?si=AbCdEf",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
        ];
        let identities: Vec<_> = forms
            .iter()
            .map(|url| registry.resolve(url).unwrap())
            .collect();
        assert!(identities.iter().all(|i| i == &identities[0]));
        assert_eq!(identities[0].platform, Platform::Youtube);
        assert_eq!(identities[0].canonical_id, "dQw4w9WgXcQ");
    }

    #[test]
    fn test_build_plan_dispatches_by_platform() {
        let registry = build_default_platform_registry();
        let identity = registry
            .resolve("https://www.instagram.com/reel/Cxyz123/")
            .unwrap();
        let plan = registry
            .build_plan(
                &identity,
                "https://www.instagram.com/reel/Cxyz123/",
                &Variant::default(),
            )
            .unwrap();
        assert_eq!(plan.platform, Platform::Instagram);
        assert_eq!(plan.canonical_id, "Cxyz123");
    }

    #[test]
    fn test_empty_registry_matches_nothing() {
        let registry = PlatformRegistry::new();
        assert!(registry.is_empty());
        let err = registry.resolve("https://youtu.be/abc").unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedPlatform { .. }));
    }
}
