//! Port definitions for image caching and loading.

use std::sync::Arc;

use crate::domain::entities::{CacheKey, LoadedImage};
use crate::domain::errors::ImageResult;

/// Port for the in-memory bitmap cache.
/// Implementations must be safe to call from many tasks at once.
pub trait ImageCachePort: Send + Sync {
    /// Returns a cached bitmap and marks it recently used.
    fn get(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>>;

    /// Returns a cached bitmap without touching recency.
    fn peek(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>>;

    /// Stores a bitmap, evicting others as needed to stay within budget.
    /// Returns false if the bitmap alone exceeds the budget and was dropped.
    fn put(&self, key: CacheKey, image: Arc<image::DynamicImage>) -> bool;

    /// Removes one entry.
    fn remove(&self, key: &CacheKey);

    /// Returns the current number of cached bitmaps.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the summed decoded size of resident bitmaps in bytes.
    fn total_cost(&self) -> usize;

    /// Drops every entry.
    fn clear(&self);
}

/// Port for loading display-sized images by key.
#[async_trait::async_trait]
pub trait ImageLoaderPort: Send + Sync {
    /// Loads an image, serving from cache when possible.
    async fn load(&self, key: &CacheKey, target_pixel_size: u32) -> ImageResult<LoadedImage>;

    /// Returns a cached bitmap without any I/O. Does not count as a cache
    /// hit or miss and does not refresh recency.
    fn cached(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>>;
}
