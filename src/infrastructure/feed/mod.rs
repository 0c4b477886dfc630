//! Feed page download.

use std::path::Path;
use std::time::Duration;

use reqwest::{Client, Url, header};
use tracing::{debug, warn};

use crate::domain::entities::FeedPost;
use crate::domain::errors::FeedError;

/// Downloads pages of feed posts as JSON arrays.
#[derive(Debug, Clone)]
pub struct FeedClient {
    client: Client,
}

impl FeedClient {
    /// Creates a client with the given request timeout and `User-Agent`.
    ///
    /// # Errors
    /// Returns error if HTTP client creation fails.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FeedError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Downloads one page of posts from `url`.
    ///
    /// # Errors
    /// Returns error on transport failure, a non-success status or a body
    /// that is not a JSON array of posts.
    pub async fn fetch_page(&self, url: &str) -> Result<Vec<FeedPost>, FeedError> {
        let url = Url::parse(url).map_err(|_| FeedError::InvalidSource {
            source_name: url.to_string(),
        })?;

        debug!(url = %url, "Fetching feed page");

        let response = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to reach feed server");
                if e.is_timeout() {
                    FeedError::network("request timed out")
                } else if e.is_connect() {
                    FeedError::network("failed to connect to feed server")
                } else {
                    FeedError::network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FeedError::network(e.to_string()))?;
        let posts = parse_page(&body)?;

        debug!(url = %url, posts = posts.len(), "Feed page fetched");
        Ok(posts)
    }

    /// Loads a page from a URL or, when `source` is not an http(s) URL, from a file.
    ///
    /// # Errors
    /// As [`fetch_page`](Self::fetch_page) or [`load_file`].
    pub async fn load(&self, source: &str) -> Result<Vec<FeedPost>, FeedError> {
        if source.starts_with("http://") || source.starts_with("https://") {
            self.fetch_page(source).await
        } else {
            load_file(Path::new(source)).await
        }
    }
}

/// Parses a JSON array of posts.
///
/// # Errors
/// Returns [`FeedError::Parse`] if the bytes are not a valid page.
pub fn parse_page(bytes: &[u8]) -> Result<Vec<FeedPost>, FeedError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Reads a page of posts from a JSON file.
///
/// # Errors
/// Returns error if the file cannot be read or parsed.
pub async fn load_file(path: &Path) -> Result<Vec<FeedPost>, FeedError> {
    let bytes = tokio::fs::read(path).await?;
    let posts = parse_page(&bytes)?;
    debug!(path = ?path, posts = posts.len(), "Feed page loaded from file");
    Ok(posts)
}
