//! Platform identity resolution and per-platform capability providers.
//!
//! Turning a raw URL into a stable `(platform, canonical_id)` pair is the
//! first step of every request: the same logical content must always yield
//! the same [`VideoIdentity`] regardless of URL formatting (tracking
//! parameters, mobile vs. desktop domains, shortened paths).
//!
//! # Architecture
//!
//! - [`PlatformProvider`] - Capability set one platform implements
//!   (`matches`, `extract_canonical_id`, `build_plan`)
//! - [`PlatformRegistry`] - First-match dispatch over registered providers
//! - [`YoutubeProvider`] / [`InstagramProvider`] / [`TiktokProvider`] -
//!   Concrete providers
//!
//! # Example
//!
//! ```
//! use vidcache_core::platform::{build_default_platform_registry, Platform};
//!
//! let registry = build_default_platform_registry();
//! let identity = registry
//!     .resolve("https://youtu.be/dQw4w9WgXcQ?si=tracking")
//!     .unwrap();
//! assert_eq!(identity.platform, Platform::Youtube);
//! assert_eq!(identity.canonical_id, "dQw4w9WgXcQ");
//! ```

mod instagram;
mod registry;
mod tiktok;
mod youtube;

pub use instagram::InstagramProvider;
pub use registry::PlatformRegistry;
pub use tiktok::TiktokProvider;
pub use youtube::YoutubeProvider;

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Supported media platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// YouTube videos and Shorts.
    Youtube,
    /// Instagram posts, reels, and IGTV.
    Instagram,
    /// TikTok videos.
    Tiktok,
}

impl Platform {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Instagram => "instagram",
            Self::Tiktok => "tiktok",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "youtube" => Ok(Self::Youtube),
            "instagram" => Ok(Self::Instagram),
            "tiktok" => Ok(Self::Tiktok),
            _ => Err(format!("unknown platform: {s}")),
        }
    }
}

/// Stable identity of one piece of content, independent of URL formatting.
///
/// Produced once by [`PlatformRegistry::resolve`] and used as the join key
/// everywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoIdentity {
    /// The platform hosting the content.
    pub platform: Platform,
    /// Platform-scoped canonical id (e.g. the 11-char YouTube video id).
    pub canonical_id: String,
}

impl VideoIdentity {
    /// Creates a new identity.
    #[must_use]
    pub fn new(platform: Platform, canonical_id: impl Into<String>) -> Self {
        Self {
            platform,
            canonical_id: canonical_id.into(),
        }
    }
}

impl fmt::Display for VideoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.canonical_id)
    }
}

/// Quality/format selector distinguishing otherwise-identical requests.
///
/// Recognized YouTube values look like `"720p"` or `"audio"`; the default
/// sentinel is `"default"` (platform's best available).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variant(String);

/// The default sentinel value.
const DEFAULT_VARIANT: &str = "default";

impl Variant {
    /// Creates a variant from a selector string.
    #[must_use]
    pub fn new(selector: impl Into<String>) -> Self {
        Self(selector.into())
    }

    /// Returns the selector string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the default sentinel.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_VARIANT
    }
}

impl Default for Variant {
    fn default() -> Self {
        Self(DEFAULT_VARIANT.to_string())
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The deduplication fingerprint: identity plus variant.
///
/// All consistency guarantees (one cache entry, at most one in-flight job)
/// are keyed on this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    /// Stable content identity.
    pub identity: VideoIdentity,
    /// Quality/format selector.
    pub variant: Variant,
}

impl RequestKey {
    /// Creates a new request key.
    #[must_use]
    pub fn new(identity: VideoIdentity, variant: Variant) -> Self {
        Self { identity, variant }
    }

    /// SHA-256 hex digest over `platform:canonical_id:variant`.
    ///
    /// Used as the primary key in the cache and job registry so key length
    /// is bounded regardless of canonical-id shape.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.identity.platform.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(self.identity.canonical_id.as_bytes());
        hasher.update(b":");
        hasher.update(self.variant.as_str().as_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            use fmt::Write;
            // Writing to a String cannot fail.
            let _ = write!(hex, "{byte:02x}");
        }
        hex
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identity, self.variant)
    }
}

/// Instructions handed to the external extraction engine for one job.
///
/// The core never executes this itself; it is passed to the registered
/// [`Extractor`](crate::worker::Extractor) collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionPlan {
    /// The platform hosting the content.
    pub platform: Platform,
    /// Canonical content id.
    pub canonical_id: String,
    /// The URL the extraction engine should fetch.
    pub source_url: String,
    /// Requested variant.
    pub variant: Variant,
    /// yt-dlp-style format selector derived from the variant.
    pub format_selector: String,
}

/// Errors from identity resolution and plan building.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// No registered provider matches the URL's host.
    #[error("unsupported platform for URL: {url}")]
    UnsupportedPlatform {
        /// The URL that matched no provider.
        url: String,
    },

    /// The input could not be parsed as a URL at all.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The malformed input.
        url: String,
    },

    /// A provider matched the host but found no canonical id in the URL.
    #[error("could not extract canonical id from {url}")]
    CanonicalId {
        /// The URL that yielded no id.
        url: String,
    },

    /// The requested variant is not available on this platform.
    #[error("variant '{variant}' is not supported on {platform}")]
    UnsupportedVariant {
        /// The platform that rejected the variant.
        platform: Platform,
        /// The rejected selector.
        variant: String,
    },
}

/// Capability set one platform implements.
///
/// Providers are pure: `matches` and `extract_canonical_id` inspect only the
/// URL, and `build_plan` only combines the identity with the variant. The
/// registry holds them as `Box<dyn PlatformProvider>` and selects by first
/// match; no platform logic is hard-coded anywhere else.
pub trait PlatformProvider: Send + Sync {
    /// The platform this provider handles.
    fn platform(&self) -> Platform;

    /// Returns true if this provider recognizes the URL's host.
    fn matches(&self, url: &Url) -> bool;

    /// Extracts the canonical content id, or None if the URL carries none.
    fn extract_canonical_id(&self, url: &Url) -> Option<String>;

    /// Builds the extraction plan for an identity and variant.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnsupportedVariant`] if the platform cannot
    /// satisfy the requested variant.
    fn build_plan(
        &self,
        identity: &VideoIdentity,
        source_url: &str,
        variant: &Variant,
    ) -> Result<ExtractionPlan, ResolveError>;
}

/// Builds the default provider registry with all supported platforms.
#[must_use]
pub fn build_default_platform_registry() -> PlatformRegistry {
    let mut registry = PlatformRegistry::new();
    registry.register(Box::new(YoutubeProvider::new()));
    registry.register(Box::new(InstagramProvider::new()));
    registry.register(Box::new(TiktokProvider::new()));
    registry
}
