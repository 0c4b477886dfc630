//! Social feed content as seen by the image pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::image::CacheKey;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generates a random id.
            #[must_use]
            pub fn new_random() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a feed post.
    PostId
);
uuid_id!(
    /// Identifier of a user profile.
    UserId
);
uuid_id!(
    /// Identifier of a media attachment.
    MediaId
);

/// Author block embedded in a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostAuthor {
    /// Profile id.
    pub id: UserId,
    /// Handle shown next to the avatar.
    pub username: String,
    /// Avatar image URL, if the user uploaded one.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Kind of media attached to a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still photo.
    #[default]
    Photo,
    /// Video clip; only its poster thumbnail is loaded.
    Video,
}

/// A media attachment of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    /// Attachment id.
    pub id: MediaId,
    /// Photo or video.
    #[serde(default)]
    pub kind: MediaKind,
    /// Thumbnail URL.
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// Source width in pixels, if known.
    #[serde(default)]
    pub width: Option<u32>,
    /// Source height in pixels, if known.
    #[serde(default)]
    pub height: Option<u32>,
}

/// A post in the social feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPost {
    /// Post id.
    pub id: PostId,
    /// Who posted it.
    pub author: PostAuthor,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Optional caption text.
    #[serde(default)]
    pub caption: Option<String>,
    /// Attached media, in display order.
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

/// Identifies one image slot within a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubItemId {
    /// The author's avatar.
    Avatar(UserId),
    /// The thumbnail of a media attachment.
    Media(MediaId),
}

/// What an image slot is used for, which decides its pixel budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    /// Small round profile picture.
    Avatar,
    /// Media thumbnail in the feed cell.
    Thumbnail,
}

impl FeedPost {
    /// Returns every image slot of this post with a usable URL.
    ///
    /// Slots whose URL does not parse into a [`CacheKey`] are skipped.
    #[must_use]
    pub fn image_slots(&self) -> Vec<(SubItemId, ImageRole, CacheKey)> {
        let avatar = self
            .author
            .avatar_url
            .as_deref()
            .and_then(CacheKey::parse)
            .map(|key| (SubItemId::Avatar(self.author.id), ImageRole::Avatar, key));

        let media = self.media.iter().filter_map(|item| {
            item.thumbnail_url
                .as_deref()
                .and_then(CacheKey::parse)
                .map(|key| (SubItemId::Media(item.id), ImageRole::Thumbnail, key))
        });

        avatar.into_iter().chain(media).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post_json() -> &'static str {
        r#"{
            "id": "3f1c9c52-6a3f-4a0b-9d35-2f8a4b9a1e01",
            "author": {
                "id": "0b6e3f0e-8f5b-4a9e-b4b8-6b2a9d7c1f02",
                "username": "liftlog",
                "avatar_url": "https://cdn.example.com/avatars/liftlog.jpg"
            },
            "created_at": "2026-03-01T07:30:00Z",
            "caption": "Leg day",
            "media": [
                { "id": "6a2d9f44-1c3e-4f7a-8b9c-0d1e2f3a4b03", "kind": "photo",
                  "thumbnail_url": "https://cdn.example.com/m/1.jpg" },
                { "id": "7b3e0a55-2d4f-4a8b-9c0d-1e2f3a4b5c04", "kind": "video",
                  "thumbnail_url": "ftp://cdn.example.com/m/2.jpg" }
            ]
        }"#
    }

    #[test]
    fn test_deserialize_post() -> Result<(), serde_json::Error> {
        let post: FeedPost = serde_json::from_str(post_json())?;
        assert_eq!(post.author.username, "liftlog");
        assert_eq!(post.media.len(), 2);
        assert_eq!(post.media[1].kind, MediaKind::Video);
        Ok(())
    }

    #[test]
    fn test_image_slots_skip_unusable_urls() -> Result<(), serde_json::Error> {
        let post: FeedPost = serde_json::from_str(post_json())?;
        let slots = post.image_slots();

        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].0, SubItemId::Avatar(post.author.id));
        assert_eq!(slots[0].1, ImageRole::Avatar);
        assert_eq!(slots[1].0, SubItemId::Media(post.media[0].id));
        Ok(())
    }

    #[test]
    fn test_post_without_media_or_avatar() {
        let post = FeedPost {
            id: PostId::new_random(),
            author: PostAuthor {
                id: UserId::new_random(),
                username: "quiet".to_string(),
                avatar_url: None,
            },
            created_at: Utc::now(),
            caption: None,
            media: Vec::new(),
        };
        assert!(post.image_slots().is_empty());
    }
}
