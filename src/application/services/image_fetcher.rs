//! Cancellable, per-requester image loads.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, FetchState, LoadedImage};
use crate::domain::ports::ImageLoaderPort;
use crate::domain::{CancelToken, ImageResult};

/// Per-requester image load with cooperative cancellation.
///
/// One fetcher belongs to one view-like owner. `load` returns the bitmap or
/// `None` ("keep the placeholder"); it never surfaces an error. `cancel`
/// abandons the running load; the result of a cancelled load is never handed
/// out and, unless another requester shares the same in-flight load, never
/// reaches the cache.
///
/// A `cancel` that arrives before the load has started still wins: it trips
/// the token the next `load` picks up. The token is replaced once a load ends.
pub struct ImageFetcher {
    loader: Arc<dyn ImageLoaderPort>,
    target_pixel_size: u32,
    // Lock order: `state` before `token`.
    state: Mutex<FetchState>,
    token: Mutex<CancelToken>,
}

impl std::fmt::Debug for ImageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageFetcher")
            .field("target_pixel_size", &self.target_pixel_size)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl ImageFetcher {
    /// Creates an idle fetcher that loads at `target_pixel_size` (longest edge).
    #[must_use]
    pub fn new(loader: Arc<dyn ImageLoaderPort>, target_pixel_size: u32) -> Self {
        Self {
            loader,
            target_pixel_size,
            state: Mutex::new(FetchState::Idle),
            token: Mutex::new(CancelToken::new()),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> FetchState {
        self.state.lock().clone()
    }

    /// Loads `url` at this fetcher's pixel size; `None` means keep the placeholder.
    pub async fn load(&self, url: &str) -> Option<Arc<image::DynamicImage>> {
        let Some(key) = CacheKey::parse(url) else {
            trace!(url, "Ignoring non-http(s) image url");
            *self.state.lock() = FetchState::Idle;
            return None;
        };

        let Some(token) = self.begin() else {
            debug!(key = %key, "Image load cancelled before start");
            return self.finish(None, None);
        };

        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => None,
            result = self.loader.load(&key, self.target_pixel_size) => Some(result),
        };

        if outcome.is_none() {
            debug!(key = %key, "Image load cancelled");
        }
        self.finish(Some(&token), outcome)
    }

    /// Moves to `Loading` with the current token, or to `Cancelled` if that
    /// token was already tripped.
    fn begin(&self) -> Option<CancelToken> {
        let mut state = self.state.lock();
        let token = self.token.lock().clone();
        if token.is_cancelled() {
            return None;
        }
        trace!("Fetcher state change: Loading");
        *state = FetchState::Loading;
        Some(token)
    }

    fn finish(
        &self,
        token: Option<&CancelToken>,
        outcome: Option<ImageResult<LoadedImage>>,
    ) -> Option<Arc<image::DynamicImage>> {
        let mut state = self.state.lock();
        let cancelled = token.is_none_or(CancelToken::is_cancelled);

        let (next, image) = match outcome {
            Some(Ok(loaded)) if !cancelled => (FetchState::Loaded, Some(loaded.image)),
            Some(Err(e)) if !cancelled => {
                debug!(error = %e, "Image load failed, keeping placeholder");
                (FetchState::Failed(e), None)
            }
            _ => (FetchState::Cancelled, None),
        };

        *self.token.lock() = CancelToken::new();
        trace!(state = ?next, "Fetcher state change");
        *state = next;
        image
    }

    /// Cancels the running load, or the next one if none has started yet.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        self.token.lock().cancel();
        if state.is_loading() {
            *state = FetchState::Cancelled;
        }
    }

    /// Returns true if the last load ended with a transport or decode failure.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        matches!(&*self.state.lock(), FetchState::Failed(_))
    }
}
