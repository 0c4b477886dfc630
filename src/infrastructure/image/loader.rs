//! Async image loading orchestrator.
//!
//! Memory cache first, then a single shared network load per key. Concurrent
//! requests for the same key join one in-flight future; when every joiner has
//! gone away the load is dropped before it can touch the cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared, WeakShared};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::downsampler::{DecodeLimits, downsample_with_limits};
use super::memory_cache::{CacheStats, MemoryImageCache};
use crate::domain::entities::{CacheKey, ImageSource, LoadedImage, PurgeReason};
use crate::domain::errors::{ImageError, ImageResult};
use crate::domain::ports::{ImageCachePort, ImageLoaderPort, ImageSourcePort};

type LoadFuture = BoxFuture<'static, ImageResult<Arc<image::DynamicImage>>>;
type InFlightMap = Arc<Mutex<HashMap<CacheKey, WeakShared<LoadFuture>>>>;

/// Configuration for the image loader.
#[derive(Debug, Clone)]
pub struct ImageLoaderConfig {
    /// Upper bound on the network read for one image.
    pub request_timeout: Duration,
    /// Limits applied while decoding.
    pub decode_limits: DecodeLimits,
}

impl Default for ImageLoaderConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(20),
            decode_limits: DecodeLimits::default(),
        }
    }
}

/// Loads display-sized images through a shared memory cache.
pub struct ImageLoader {
    cache: Arc<MemoryImageCache>,
    source: Arc<dyn ImageSourcePort>,
    in_flight: InFlightMap,
    config: ImageLoaderConfig,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ImageLoader {
    /// Creates a loader over `cache` that fetches bytes from `source`.
    #[must_use]
    pub fn new(
        cache: Arc<MemoryImageCache>,
        source: Arc<dyn ImageSourcePort>,
        config: ImageLoaderConfig,
    ) -> Self {
        Self {
            cache,
            source,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Returns the underlying memory cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<MemoryImageCache> {
        &self.cache
    }

    /// Loads an image, checking the memory cache first.
    ///
    /// # Errors
    /// Returns error if the bytes cannot be fetched or decoded.
    pub async fn load(
        &self,
        key: &CacheKey,
        target_pixel_size: u32,
    ) -> ImageResult<LoadedImage> {
        if let Some(image) = self.cache.get(key) {
            return Ok(LoadedImage {
                key: key.clone(),
                image,
                source: ImageSource::MemoryCache,
            });
        }

        let image = self.join_flight(key, target_pixel_size).await?;
        debug!(
            key = %key,
            width = image.width(),
            height = image.height(),
            "Image loaded from network"
        );

        Ok(LoadedImage {
            key: key.clone(),
            image,
            source: ImageSource::Network,
        })
    }

    /// Loads an image by raw URL string.
    ///
    /// # Errors
    /// Returns [`ImageError::InvalidUrl`] without any I/O when the string is
    /// not an absolute `http(s)` URL; otherwise as [`load`](Self::load).
    pub async fn load_url(&self, url: &str, target_pixel_size: u32) -> ImageResult<LoadedImage> {
        let key = CacheKey::parse(url).ok_or_else(|| ImageError::invalid_url(url))?;
        self.load(&key, target_pixel_size).await
    }

    /// Returns the number of loads currently running.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .values()
            .filter(|weak| weak.upgrade().is_some())
            .count()
    }

    /// Returns memory cache statistics.
    #[must_use]
    pub fn memory_cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Clears the memory cache.
    pub fn clear(&self) {
        self.cache.clear();
        info!("Cleared image cache");
    }

    /// Clears the cache on every purge signal until the sender side closes.
    pub fn spawn_purge_listener(
        &self,
        mut signals: broadcast::Receiver<PurgeReason>,
    ) -> JoinHandle<()> {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            loop {
                match signals.recv().await {
                    Ok(reason) => {
                        cache.clear();
                        info!(reason = %reason, "Purged image cache");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        cache.clear();
                        warn!(skipped, "Purge signals lagged, cache cleared");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Purge listener stopped");
        })
    }

    fn join_flight(&self, key: &CacheKey, target_pixel_size: u32) -> Shared<LoadFuture> {
        let mut in_flight = self.in_flight.lock();

        if let Some(existing) = in_flight.get(key).and_then(WeakShared::upgrade) {
            trace!(key = %key, "Joining in-flight load");
            return existing;
        }

        // Drop entries whose joiners all went away.
        in_flight.retain(|_, weak| weak.upgrade().is_some());

        let shared = Self::fetch_and_store(
            self.cache.clone(),
            self.source.clone(),
            self.in_flight.clone(),
            key.clone(),
            target_pixel_size,
            self.config.clone(),
        )
        .boxed()
        .shared();

        if let Some(weak) = shared.downgrade() {
            in_flight.insert(key.clone(), weak);
        }
        shared
    }

    async fn fetch_and_store(
        cache: Arc<MemoryImageCache>,
        source: Arc<dyn ImageSourcePort>,
        in_flight: InFlightMap,
        key: CacheKey,
        target_pixel_size: u32,
        config: ImageLoaderConfig,
    ) -> ImageResult<Arc<image::DynamicImage>> {
        let result = match cache.peek(&key) {
            Some(image) => Ok(image),
            None => Self::fetch_and_decode(source.as_ref(), &key, target_pixel_size, &config).await,
        };

        match &result {
            Ok(image) => {
                cache.put(key.clone(), image.clone());
            }
            Err(e) => debug!(key = %key, error = %e, "Image load failed"),
        }

        in_flight.lock().remove(&key);
        result
    }

    async fn fetch_and_decode(
        source: &dyn ImageSourcePort,
        key: &CacheKey,
        target_pixel_size: u32,
        config: &ImageLoaderConfig,
    ) -> ImageResult<Arc<image::DynamicImage>> {
        let bytes = tokio::time::timeout(config.request_timeout, source.fetch(key))
            .await
            .map_err(|_| ImageError::Timeout)??;

        if bytes.is_empty() {
            return Err(ImageError::EmptyBody);
        }

        let limits = config.decode_limits;
        let decoded = tokio::task::spawn_blocking(move || {
            downsample_with_limits(&bytes, target_pixel_size, limits)
        })
        .await
        .map_err(|e| ImageError::decode(format!("Decode task panicked: {e}")))?;

        decoded
            .map(Arc::new)
            .ok_or_else(|| ImageError::decode("unsupported or corrupt image data"))
    }
}

#[async_trait::async_trait]
impl ImageLoaderPort for ImageLoader {
    async fn load(&self, key: &CacheKey, target_pixel_size: u32) -> ImageResult<LoadedImage> {
        Self::load(self, key, target_pixel_size).await
    }

    fn cached(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        self.cache.peek(key)
    }
}
