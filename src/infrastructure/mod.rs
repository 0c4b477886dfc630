//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// Feed page download.
pub mod feed;
/// Image handling (decoding, caching, loading).
pub mod image;
/// Reachability probing.
pub mod network;

pub use config::{AppConfig, CliArgs, Command, ConfigError, LogLevel, StorageManager};
pub use feed::FeedClient;
pub use image::{
    CacheStats, HttpImageSource, HttpSourceConfig, ImageLoader, ImageLoaderConfig,
    MemoryImageCache,
};
pub use network::TcpPathMonitor;
