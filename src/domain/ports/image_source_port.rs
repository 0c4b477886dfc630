//! Port definition for fetching encoded image bytes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::entities::CacheKey;
use crate::domain::errors::ImageResult;

/// Port for retrieving the encoded bytes behind an image URL.
#[async_trait]
pub trait ImageSourcePort: Send + Sync {
    /// Fetches the encoded bytes for `key`.
    async fn fetch(&self, key: &CacheKey) -> ImageResult<Bytes>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::domain::errors::ImageError;

    /// Encodes a solid RGB image as PNG.
    pub fn png(width: u32, height: u32) -> Bytes {
        let image = image::DynamicImage::new_rgb8(width, height);
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("encoding an in-memory PNG cannot fail");
        Bytes::from(out.into_inner())
    }

    /// Scripted image source that counts every fetch.
    #[derive(Default)]
    pub struct MockImageSource {
        responses: Mutex<HashMap<String, Result<Bytes, ImageError>>>,
        calls: Mutex<HashMap<String, usize>>,
        total_calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl MockImageSource {
        /// Creates a source that answers 404 for every URL.
        pub fn new() -> Self {
            Self::default()
        }

        /// Delays every response by `delay`.
        #[must_use]
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Serves `bytes` for `url`.
        #[must_use]
        pub fn with_bytes(self, url: &str, bytes: Bytes) -> Self {
            self.responses.lock().insert(url.to_string(), Ok(bytes));
            self
        }

        /// Serves a `width`x`height` PNG for `url`.
        #[must_use]
        pub fn with_png(self, url: &str, width: u32, height: u32) -> Self {
            self.with_bytes(url, png(width, height))
        }

        /// Fails `url` with `error`.
        #[must_use]
        pub fn with_error(self, url: &str, error: ImageError) -> Self {
            self.responses.lock().insert(url.to_string(), Err(error));
            self
        }

        /// Number of fetches for every URL.
        pub fn total_calls(&self) -> usize {
            self.total_calls.load(Ordering::SeqCst)
        }

        /// Number of fetches for one URL.
        pub fn calls_for(&self, url: &str) -> usize {
            self.calls.lock().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ImageSourcePort for MockImageSource {
        async fn fetch(&self, key: &CacheKey) -> ImageResult<Bytes> {
            self.total_calls.fetch_add(1, Ordering::SeqCst);
            *self.calls.lock().entry(key.as_str().to_string()).or_default() += 1;

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            self.responses
                .lock()
                .get(key.as_str())
                .cloned()
                .unwrap_or(Err(ImageError::HttpStatus { status: 404 }))
        }
    }
}
