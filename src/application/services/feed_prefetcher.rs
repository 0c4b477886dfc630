//! Warms the image cache for upcoming feed posts.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use futures_util::future::join_all;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::entities::{CacheKey, FeedPost, ImageRole, PostId, SubItemId};
use crate::domain::ports::ImageLoaderPort;

/// Configuration for [`FeedPrefetcher`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrefetchConfig {
    /// Posts considered per batch; the rest are ignored.
    pub max_items: usize,
    /// Pixel bound for avatars.
    pub avatar_pixel_size: u32,
    /// Pixel bound for media thumbnails.
    pub thumbnail_pixel_size: u32,
    /// Posts remembered for [`FeedPrefetcher::images_for`].
    pub index_capacity: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_items: 12,
            avatar_pixel_size: 80,
            thumbnail_pixel_size: 320,
            index_capacity: 512,
        }
    }
}

impl PrefetchConfig {
    const fn pixel_size(&self, role: ImageRole) -> u32 {
        match role {
            ImageRole::Avatar => self.avatar_pixel_size,
            ImageRole::Thumbnail => self.thumbnail_pixel_size,
        }
    }
}

/// Counts for one prefetch batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchSummary {
    /// Distinct image URLs in the batch.
    pub requested: usize,
    /// URLs already in cache; no network work issued.
    pub already_cached: usize,
    /// URLs fetched and cached by this batch.
    pub fetched: usize,
    /// URLs whose load failed.
    pub failed: usize,
}

type SlotIndex = Vec<(SubItemId, CacheKey)>;

/// Concurrently fetches avatars and thumbnails for a batch of posts.
///
/// Every distinct uncached URL in a batch gets its own concurrent load; the
/// call returns once all of them settled. Individual failures are logged and
/// counted, never propagated.
pub struct FeedPrefetcher {
    loader: Arc<dyn ImageLoaderPort>,
    config: PrefetchConfig,
    index: Mutex<LruCache<PostId, SlotIndex>>,
}

impl std::fmt::Debug for FeedPrefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedPrefetcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FeedPrefetcher {
    #[must_use]
    pub fn new(loader: Arc<dyn ImageLoaderPort>, config: PrefetchConfig) -> Self {
        let capacity = NonZeroUsize::new(config.index_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            loader,
            config,
            index: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Prefetches images for the first `max_items` posts and waits for every
    /// load to settle.
    pub async fn prefetch(&self, posts: &[FeedPost]) -> PrefetchSummary {
        let mut pending: HashMap<CacheKey, u32> = HashMap::new();
        let mut summary = PrefetchSummary::default();
        let mut seen: HashSet<CacheKey> = HashSet::new();

        for post in posts.iter().take(self.config.max_items) {
            let slots = post.image_slots();
            let mut index_entry = Vec::with_capacity(slots.len());

            for (sub_id, role, key) in slots {
                index_entry.push((sub_id, key.clone()));
                if !seen.insert(key.clone()) {
                    // Same URL used twice: keep the larger pixel bound.
                    if let Some(size) = pending.get_mut(&key) {
                        *size = (*size).max(self.config.pixel_size(role));
                    }
                    continue;
                }

                summary.requested += 1;
                if self.loader.cached(&key).is_some() {
                    summary.already_cached += 1;
                } else {
                    pending.insert(key, self.config.pixel_size(role));
                }
            }

            self.index.lock().put(post.id, index_entry);
        }

        if pending.is_empty() {
            debug!(requested = summary.requested, "Prefetch batch fully cached");
            return summary;
        }

        let loads = pending.into_iter().map(|(key, size)| async move {
            let result = self.loader.load(&key, size).await;
            (key, result)
        });

        for (key, result) in join_all(loads).await {
            match result {
                Ok(_) => summary.fetched += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(key = %key, error = %e, "Prefetch failed");
                }
            }
        }

        info!(
            requested = summary.requested,
            cached = summary.already_cached,
            fetched = summary.fetched,
            failed = summary.failed,
            "Prefetch batch settled"
        );
        summary
    }

    /// Runs [`prefetch`](Self::prefetch) on a background task.
    pub fn prefetch_detached(self: &Arc<Self>, posts: Vec<FeedPost>) -> JoinHandle<PrefetchSummary> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.prefetch(&posts).await })
    }

    /// Returns the warmed images of a post, keyed by slot. No network I/O;
    /// slots whose image is not cached are left out.
    #[must_use]
    pub fn images_for(&self, post_id: &PostId) -> HashMap<SubItemId, Arc<image::DynamicImage>> {
        let Some(slots) = self.index.lock().get(post_id).cloned() else {
            return HashMap::new();
        };

        slots
            .into_iter()
            .filter_map(|(sub_id, key)| self.loader.cached(&key).map(|image| (sub_id, image)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use chrono::Utc;

    use crate::domain::entities::{MediaId, MediaItem, MediaKind, PostAuthor, UserId};
    use crate::domain::ports::mocks::MockImageSource;
    use crate::infrastructure::image::{ImageLoader, ImageLoaderConfig, MemoryImageCache};

    fn post(avatar: Option<&str>, media: &[&str]) -> FeedPost {
        FeedPost {
            id: PostId::new_random(),
            author: PostAuthor {
                id: UserId::new_random(),
                username: "runner".to_string(),
                avatar_url: avatar.map(str::to_string),
            },
            created_at: Utc::now(),
            caption: None,
            media: media
                .iter()
                .map(|url| MediaItem {
                    id: MediaId::new_random(),
                    kind: MediaKind::Photo,
                    thumbnail_url: Some((*url).to_string()),
                    width: None,
                    height: None,
                })
                .collect(),
        }
    }

    fn setup(source: MockImageSource) -> (FeedPrefetcher, Arc<MockImageSource>) {
        let source = Arc::new(source);
        let loader = Arc::new(ImageLoader::new(
            Arc::new(MemoryImageCache::with_default_limit()),
            source.clone(),
            ImageLoaderConfig::default(),
        ));
        (FeedPrefetcher::new(loader, PrefetchConfig::default()), source)
    }

    const A1: &str = "https://cdn.example.com/avatars/1.png";
    const A2: &str = "https://cdn.example.com/avatars/2.png";
    const M1: &str = "https://cdn.example.com/media/1.png";
    const M2: &str = "https://cdn.example.com/media/2.png";
    const M3: &str = "https://cdn.example.com/media/3.png";

    #[tokio::test]
    async fn test_prefetch_warms_avatars_and_thumbnails() {
        let (prefetcher, source) = setup(
            MockImageSource::new()
                .with_png(A1, 200, 200)
                .with_png(M1, 1200, 900)
                .with_png(M2, 900, 1200),
        );
        let first = post(Some(A1), &[M1, M2]);

        let summary = prefetcher.prefetch(std::slice::from_ref(&first)).await;

        assert_eq!(summary.requested, 3);
        assert_eq!(summary.fetched, 3);
        assert_eq!(source.total_calls(), 3);

        let images = prefetcher.images_for(&first.id);
        assert_eq!(images.len(), 3);
        let avatar = &images[&SubItemId::Avatar(first.author.id)];
        assert!(avatar.width() <= 80);
        let thumb = &images[&SubItemId::Media(first.media[0].id)];
        assert!(thumb.width().max(thumb.height()) <= 320);
    }

    #[tokio::test]
    async fn test_second_prefetch_is_free() {
        let (prefetcher, source) = setup(
            MockImageSource::new()
                .with_png(A1, 100, 100)
                .with_png(A2, 100, 100)
                .with_png(M1, 100, 100),
        );
        let batch = vec![post(Some(A1), &[M1]), post(Some(A2), &[])];

        prefetcher.prefetch(&batch).await;
        let calls = source.total_calls();
        let summary = prefetcher.prefetch(&batch).await;

        assert_eq!(source.total_calls(), calls);
        assert_eq!(summary.already_cached, 3);
        assert_eq!(summary.fetched, 0);
    }

    #[tokio::test]
    async fn test_shared_author_avatar_fetched_once() {
        let (prefetcher, source) = setup(MockImageSource::new().with_png(A1, 100, 100));
        let batch = vec![post(Some(A1), &[]), post(Some(A1), &[]), post(Some(A1), &[])];

        let summary = prefetcher.prefetch(&batch).await;

        assert_eq!(summary.requested, 1);
        assert_eq!(source.calls_for(A1), 1);
        for p in &batch {
            assert_eq!(prefetcher.images_for(&p.id).len(), 1);
        }
    }

    #[tokio::test]
    async fn test_failed_item_does_not_block_batch() {
        let (prefetcher, _source) = setup(
            MockImageSource::new()
                .with_png(M1, 300, 300)
                .with_bytes(M2, Bytes::from_static(b"not an image"))
                .with_png(M3, 300, 300)
                .with_delay(Duration::from_millis(10)),
        );
        let batch = vec![post(None, &[M1]), post(None, &[M2]), post(None, &[M3])];

        let summary = tokio::time::timeout(Duration::from_secs(5), prefetcher.prefetch(&batch))
            .await
            .expect("prefetch should settle");

        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(prefetcher.images_for(&batch[0].id).len(), 1);
        assert!(prefetcher.images_for(&batch[1].id).is_empty());
        assert_eq!(prefetcher.images_for(&batch[2].id).len(), 1);
    }

    #[tokio::test]
    async fn test_batch_bounded_by_max_items() {
        let source = Arc::new(MockImageSource::new().with_png(M1, 10, 10).with_png(M2, 10, 10));
        let loader = Arc::new(ImageLoader::new(
            Arc::new(MemoryImageCache::with_default_limit()),
            source.clone(),
            ImageLoaderConfig::default(),
        ));
        let prefetcher = FeedPrefetcher::new(
            loader,
            PrefetchConfig {
                max_items: 1,
                ..PrefetchConfig::default()
            },
        );

        let batch = vec![post(None, &[M1]), post(None, &[M2])];
        let summary = prefetcher.prefetch(&batch).await;

        assert_eq!(summary.requested, 1);
        assert_eq!(source.calls_for(M2), 0);
        assert!(prefetcher.images_for(&batch[1].id).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_urls_are_skipped() {
        let (prefetcher, source) = setup(MockImageSource::new());
        let batch = vec![post(Some("ftp://example.com/a.png"), &["", "not a url"])];

        let summary = prefetcher.prefetch(&batch).await;

        assert_eq!(summary, PrefetchSummary::default());
        assert_eq!(source.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_prefetch_detached() {
        let (prefetcher, _source) = setup(MockImageSource::new().with_png(A1, 50, 50));
        let prefetcher = Arc::new(prefetcher);
        let batch = vec![post(Some(A1), &[])];
        let id = batch[0].id;

        let summary = prefetcher
            .prefetch_detached(batch)
            .await
            .expect("task should not panic");

        assert_eq!(summary.fetched, 1);
        assert_eq!(prefetcher.images_for(&id).len(), 1);
    }

    #[test]
    fn test_unknown_post_has_no_images() {
        let (prefetcher, _source) = setup(MockImageSource::new());
        assert!(prefetcher.images_for(&PostId::new_random()).is_empty());
    }
}
