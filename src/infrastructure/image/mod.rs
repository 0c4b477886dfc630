//! Image handling infrastructure.
//!
//! This module provides:
//! - Thumbnail decoding bounded by a pixel target
//! - Memory caching bounded by decoded byte cost
//! - HTTP fetching with protocol-level response caching
//! - Async single-flight loading pipeline

pub mod downsampler;
pub mod http_source;
pub mod loader;
pub mod memory_cache;

pub use downsampler::{DecodeLimits, decoded_cost, downsample, target_pixel_size};
pub use http_source::{HttpImageSource, HttpSourceConfig};
pub use loader::{ImageLoader, ImageLoaderConfig};
pub use memory_cache::{CacheStats, DEFAULT_COST_LIMIT, MemoryImageCache};
