//! Domain entity definitions.

mod feed;
mod image;

pub use feed::{
    FeedPost, ImageRole, MediaId, MediaItem, MediaKind, PostAuthor, PostId, SubItemId, UserId,
};
pub use image::{CacheKey, FetchState, ImageSource, LoadedImage, PurgeReason};
