//! Domain layer with core entities, errors and port definitions.

/// Cooperative cancellation.
pub mod cancellation;
/// Network reachability state.
pub mod connection;
/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use cancellation::CancelToken;
pub use connection::Reachability;
pub use entities::{CacheKey, FeedPost, LoadedImage};
pub use errors::{FeedError, ImageError, ImageResult};
pub use ports::{ImageCachePort, ImageLoaderPort, ImageSourcePort};
