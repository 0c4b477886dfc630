mod image_cache_port;
mod image_source_port;

pub use image_cache_port::{ImageCachePort, ImageLoaderPort};
pub use image_source_port::ImageSourcePort;
