//! Image pipeline error types.

use thiserror::Error;

/// Result type for image operations.
pub type ImageResult<T> = Result<T, ImageError>;

/// Why a single image load did not produce a bitmap.
///
/// Every variant is terminal for the attempt that produced it; callers keep
/// their placeholder and may try again later.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum ImageError {
    #[error("invalid image url: {url:?}")]
    InvalidUrl { url: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("request timed out")]
    Timeout,

    #[error("unexpected HTTP status {status}")]
    HttpStatus { status: u16 },

    #[error("response body was empty")]
    EmptyBody,

    #[error("decode error: {message}")]
    Decode { message: String },

    #[error("load cancelled")]
    Cancelled,
}

impl ImageError {
    /// Creates invalid url error.
    #[must_use]
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ImageError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if let Some(status) = error.status() {
            Self::HttpStatus {
                status: status.as_u16(),
            }
        } else {
            Self::network(error.to_string())
        }
    }
}
