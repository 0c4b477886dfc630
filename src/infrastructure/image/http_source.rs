//! HTTP image source with a small protocol-level response cache.
//!
//! Fresh responses (per `Cache-Control: max-age`) are served without I/O.
//! Stale responses carrying `ETag` or `Last-Modified` are revalidated with a
//! conditional request; a `304 Not Modified` reuses the stored body.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::{
    CACHE_CONTROL, ETAG, HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use tracing::{debug, trace};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{ImageError, ImageResult};
use crate::domain::ports::ImageSourcePort;

/// Configuration for [`HttpImageSource`].
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Maximum stored responses.
    pub cache_entries: usize,
    /// Bodies larger than this are never stored.
    pub max_cached_body: usize,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: format!("{}/{}", crate::NAME, crate::VERSION),
            cache_entries: 128,
            max_cached_body: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct CacheDirectives {
    no_store: bool,
    no_cache: bool,
    max_age: Option<Duration>,
}

impl CacheDirectives {
    fn parse(value: &str) -> Self {
        let mut directives = Self::default();
        for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (name, arg) = token
                .split_once('=')
                .map_or((token, None), |(name, arg)| {
                    (name.trim(), Some(arg.trim().trim_matches('"')))
                });

            match name.to_ascii_lowercase().as_str() {
                "no-store" => directives.no_store = true,
                "no-cache" => directives.no_cache = true,
                "max-age" => {
                    directives.max_age = arg
                        .and_then(|a| a.parse::<u64>().ok())
                        .map(Duration::from_secs);
                }
                _ => {}
            }
        }
        directives
    }

    fn from_headers(headers: &HeaderMap) -> Self {
        let joined = headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(",");
        Self::parse(&joined)
    }
}

#[derive(Debug, Clone)]
struct CachedResponse {
    body: Bytes,
    etag: Option<HeaderValue>,
    last_modified: Option<HeaderValue>,
    fresh_until: Option<Instant>,
    always_revalidate: bool,
}

impl CachedResponse {
    fn is_fresh(&self, now: Instant) -> bool {
        !self.always_revalidate && self.fresh_until.is_some_and(|until| now < until)
    }

    fn refresh(&mut self, directives: CacheDirectives, now: Instant) {
        self.fresh_until = directives.max_age.map(|age| now + age);
        self.always_revalidate = directives.no_cache;
    }
}

/// Fetches image bytes over HTTP(S) with `reqwest`.
pub struct HttpImageSource {
    client: reqwest::Client,
    responses: Mutex<LruCache<CacheKey, CachedResponse>>,
    max_cached_body: usize,
}

impl std::fmt::Debug for HttpImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpImageSource")
            .field("max_cached_body", &self.max_cached_body)
            .finish_non_exhaustive()
    }
}

impl HttpImageSource {
    /// Creates a new source.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: &HttpSourceConfig) -> ImageResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ImageError::network(format!("Failed to create HTTP client: {e}")))?;

        let capacity = NonZeroUsize::new(config.cache_entries).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            client,
            responses: Mutex::new(LruCache::new(capacity)),
            max_cached_body: config.max_cached_body,
        })
    }

    /// Number of stored responses.
    #[must_use]
    pub fn cached_responses(&self) -> usize {
        self.responses.lock().len()
    }

    fn store(&self, key: &CacheKey, response: CachedResponse, directives: CacheDirectives) {
        let mut responses = self.responses.lock();
        if directives.no_store
            || response.body.is_empty()
            || response.body.len() > self.max_cached_body
        {
            responses.pop(key);
            return;
        }
        responses.put(key.clone(), response);
    }
}

#[async_trait]
impl ImageSourcePort for HttpImageSource {
    async fn fetch(&self, key: &CacheKey) -> ImageResult<Bytes> {
        let now = Instant::now();
        let cached = self.responses.lock().get(key).cloned();

        if let Some(stored) = &cached
            && stored.is_fresh(now)
        {
            trace!(key = %key, "HTTP cache fresh hit");
            return Ok(stored.body.clone());
        }

        let mut request = self.client.get(key.as_str());
        if let Some(stored) = &cached {
            if let Some(etag) = &stored.etag {
                request = request.header(IF_NONE_MATCH, etag.clone());
            }
            if let Some(last_modified) = &stored.last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified.clone());
            }
        }

        let response = request.send().await?;
        let status = response.status();
        let directives = CacheDirectives::from_headers(response.headers());

        if status == StatusCode::NOT_MODIFIED {
            let Some(mut stored) = cached else {
                return Err(ImageError::HttpStatus {
                    status: status.as_u16(),
                });
            };
            debug!(key = %key, "HTTP cache revalidated");
            stored.refresh(directives, now);
            let body = stored.body.clone();
            self.store(key, stored, directives);
            return Ok(body);
        }

        if !status.is_success() {
            return Err(ImageError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let etag = response.headers().get(ETAG).cloned();
        let last_modified = response.headers().get(LAST_MODIFIED).cloned();
        let body = response.bytes().await?;

        let mut stored = CachedResponse {
            body: body.clone(),
            etag,
            last_modified,
            fresh_until: None,
            always_revalidate: false,
        };
        stored.refresh(directives, now);
        self.store(key, stored, directives);

        trace!(key = %key, len = body.len(), "Downloaded image bytes");
        Ok(body)
    }
}
