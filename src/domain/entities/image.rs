//! Domain types for image handling.

use std::sync::Arc;

use crate::domain::errors::ImageError;

/// Cache key for a remote image: a normalized absolute `http(s)` URL.
///
/// Two keys are equal only if their serialized URLs are byte-for-byte equal;
/// no query normalization is performed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Parses a raw URL string into a key.
    ///
    /// Returns `None` for empty strings, relative or malformed URLs, URLs
    /// without a host, and any scheme other than `http`/`https`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let url = reqwest::Url::parse(trimmed).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        if url.host_str().is_none_or(str::is_empty) {
            return None;
        }

        Some(Self(url.into()))
    }

    /// Returns the URL string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where an image was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Served from the in-memory cache.
    MemoryCache,
    /// Fetched (or revalidated) over HTTP and decoded.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A decoded, display-sized image together with its origin.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// The key the image was requested under.
    pub key: CacheKey,
    /// The downsampled bitmap.
    pub image: Arc<image::DynamicImage>,
    /// Where it came from.
    pub source: ImageSource,
}

/// Lifecycle of a single requester's image load.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FetchState {
    /// Nothing requested yet, or the last request had no usable URL.
    #[default]
    Idle,
    /// A load is in progress.
    Loading,
    /// The bitmap was delivered.
    Loaded,
    /// The load ended with an error; the caller keeps its placeholder.
    Failed(ImageError),
    /// The requester cancelled before completion.
    Cancelled,
}

impl FetchState {
    /// Returns true while a load is running.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Returns true once the load reached a final state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Loaded | Self::Failed(_) | Self::Cancelled)
    }
}

/// Why the process asked the image cache to drop its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeReason {
    /// The OS or runtime reported memory pressure.
    MemoryWarning,
    /// The application moved to the background.
    Backgrounded,
}

impl std::fmt::Display for PurgeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryWarning => write!(f, "memory warning"),
            Self::Backgrounded => write!(f, "backgrounded"),
        }
    }
}
