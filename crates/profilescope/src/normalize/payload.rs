//! Mapping embedded JSON items onto tiles.
//!
//! Items are classified by an explicit discriminator field when one is
//! present and by their key set otherwise. A category only maps the shapes it
//! accepts.

use super::registry::CategorySpec;
use crate::document::walk_json;
use crate::types::{ContentTile, Engagement};
use serde_json::{Map, Value};

/// Fields that name an item's type, checked in this order.
const DISCRIMINATORS: &[&str] = &["__typename", "@type", "type", "kind"];

const USER_KEYS: &[&str] = &["username", "userName", "creatorUsername", "mutableName", "handle"];
const NESTED_USER_KEYS: &[&str] = &["creator", "author", "user", "owner"];
const DESCRIPTION_KEYS: &[&str] = &[
    "title",
    "description",
    "caption",
    "storyTitle",
    "lensName",
    "name",
    "displayName",
];
const THUMBNAIL_KEYS: &[&str] = &[
    "thumbnailUrl",
    "thumbnail",
    "previewImageUrl",
    "snapPreviewUrl",
    "posterUrl",
    "iconUrl",
    "imageUrl",
    "image",
    "profilePictureUrl",
    "bitmojiUrl",
];
const CANONICAL_KEYS: &[&str] = &["canonicalUrl", "shareUrl", "webUrl", "deepLinkUrl", "url"];
const ID_KEYS: &[&str] = &["snapId", "storyId", "highlightId", "lensId", "scannableUuid", "id"];

/// What an embedded item describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    Snap,
    Story,
    Lens,
    PublicProfile,
    Unknown,
}

impl PayloadShape {
    pub fn classify(item: &Map<String, Value>) -> Self {
        for field in DISCRIMINATORS {
            if let Some(tag) = item.get(*field).and_then(Value::as_str) {
                let shape = Self::from_tag(tag);
                if shape != PayloadShape::Unknown {
                    return shape;
                }
            }
        }
        Self::from_keys(item)
    }

    fn from_tag(tag: &str) -> Self {
        let tag = tag.to_ascii_lowercase();
        if tag.contains("lens") {
            PayloadShape::Lens
        } else if tag.contains("story") || tag.contains("highlight") {
            PayloadShape::Story
        } else if tag.contains("snap") || tag.contains("spotlight") || tag.contains("video") {
            PayloadShape::Snap
        } else if tag.contains("profile") || tag.contains("person") || tag.contains("account") || tag == "user" {
            PayloadShape::PublicProfile
        } else {
            PayloadShape::Unknown
        }
    }

    fn from_keys(item: &Map<String, Value>) -> Self {
        let has = |keys: &[&str]| keys.iter().any(|k| item.contains_key(*k));
        if has(&["lensId", "lensName", "scannableUuid", "lensIconUrl"]) {
            PayloadShape::Lens
        } else if has(&["storyId", "storyTitle", "highlightId", "snapList"]) {
            PayloadShape::Story
        } else if has(&[
            "snapId",
            "snapUrls",
            "mediaUrl",
            "videoUrl",
            "viewCount",
            "thumbnailUrl",
            "snapMediaType",
        ]) {
            PayloadShape::Snap
        } else if has(&["username", "mutableName", "displayName", "profilePictureUrl"]) {
            PayloadShape::PublicProfile
        } else {
            PayloadShape::Unknown
        }
    }
}

/// Objects found under the category's collection keys, in document order.
pub fn collect_items<'a>(payloads: &'a [Value], spec: &CategorySpec, max_depth: usize) -> Vec<&'a Value> {
    let mut items = Vec::new();
    for payload in payloads {
        walk_json(payload, max_depth, &mut |key, value, _| {
            if let (Some(k), Value::Object(_)) = (key, value) {
                if spec.collection_keys.contains(&k) {
                    items.push(value);
                }
            }
        });
    }
    items
}

/// Map an embedded item onto a tile. Items of a shape the category does not
/// accept yield `None`.
pub fn tile_from_payload(spec: &CategorySpec, item: &Value) -> Option<ContentTile> {
    let obj = item.as_object()?;
    let shape = PayloadShape::classify(obj);
    if !spec.accepted_shapes.contains(&shape) {
        tracing::trace!("{}: ignoring {shape:?} payload", spec.category);
        return None;
    }

    let mut tile = ContentTile::empty(spec.category);
    tile.user = string_at(obj, USER_KEYS).or_else(|| nested_user(obj));
    tile.description = string_at(obj, DESCRIPTION_KEYS);
    tile.thumbnail_url = string_at(obj, THUMBNAIL_KEYS);
    tile.canonical_url = string_at(obj, CANONICAL_KEYS).or_else(|| {
        let prefix = spec.canonical_prefix?;
        let id = if prefix == "add" {
            tile.user.clone()?
        } else {
            string_at(obj, ID_KEYS)?
        };
        Some(format!("/{prefix}/{id}"))
    });

    if spec.reads_engagement {
        if let Some(engagement) = tile.kind.engagement_mut() {
            *engagement = Engagement {
                views: counter_at(obj, &["viewCount", "views", "playCount"]),
                comments: counter_at(obj, &["commentCount", "comments"]),
                shares: counter_at(obj, &["shareCount", "shares"]),
            };
        }
    }
    Some(tile)
}

/// First non-empty string under `keys`. A value wrapped in an object
/// (`{"value": "..."}`, `{"url": "..."}`) is unwrapped one level.
fn string_at(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::String(s) => non_empty(s),
        Value::Object(inner) => inner.values().find_map(|v| v.as_str().and_then(non_empty)),
        _ => None,
    })
}

fn nested_user(obj: &Map<String, Value>) -> Option<String> {
    NESTED_USER_KEYS
        .iter()
        .filter_map(|k| obj.get(*k)?.as_object())
        .find_map(|inner| string_at(inner, USER_KEYS))
}

/// Counters are kept as displayed: numbers render in decimal, strings as-is.
fn counter_at(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => non_empty(s),
        _ => None,
    })
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
