//! Profile record extraction.

use super::fields::{is_counter_token, parse_compact_count};
use super::registry::ProfileRules;
use crate::cascade::extract_document_field;
use crate::document::{normalize_url, walk_json, PageDocument, MAX_JSON_DEPTH};
use crate::types::{ProfileRecord, Subject};
use serde_json::{Map, Value};
use url::Url;

/// Keys under which pages embed the public profile object.
const PROFILE_KEYS: &[&str] = &["userProfile", "publicProfileInfo", "userInfo", "profile"];

/// Build the record for `subject`. `None` when no display name can be found.
pub fn extract_profile(
    doc: &PageDocument,
    subject: &Subject,
    rules: &ProfileRules,
    base: &Url,
) -> Option<ProfileRecord> {
    let embedded = profile_object(&doc.payloads);
    let from_payload = |keys: &[&str]| embedded.and_then(|obj| scalar_at(obj, keys));

    let display_name = extract_document_field(&doc.html, &rules.display_name)
        .or_else(|| from_payload(&["displayName", "title", "name"]))?;

    let bio = extract_document_field(&doc.html, &rules.bio).or_else(|| from_payload(&["bio", "description"]));

    let avatar_url = extract_document_field(&doc.html, &rules.avatar)
        .or_else(|| from_payload(&["profilePictureUrl", "avatarUrl", "bitmojiAvatarUrl", "image"]))
        .and_then(|raw| normalize_url(&raw, base));

    let follower_count = extract_document_field(&doc.html, &rules.followers)
        .and_then(|label| leading_count(&label))
        .or_else(|| {
            from_payload(&["subscriberCount", "followerCount", "followers"])
                .and_then(|raw| parse_compact_count(&raw))
        });

    let category = extract_document_field(&doc.html, &rules.category)
        .or_else(|| from_payload(&["categoryStringId", "creatorCategory", "category"]));

    Some(ProfileRecord {
        username: subject.as_str().to_string(),
        display_name,
        bio,
        avatar_url,
        follower_count,
        category,
    })
}

/// The first embedded object describing a profile: one stored under a
/// well-known key, or a JSON-LD `Person`/`ProfilePage`.
fn profile_object(payloads: &[Value]) -> Option<&Map<String, Value>> {
    for payload in payloads {
        let mut found: Option<&Map<String, Value>> = None;
        walk_json(payload, MAX_JSON_DEPTH, &mut |key, value, _| {
            if found.is_some() {
                return;
            }
            let Some(obj) = value.as_object() else {
                return;
            };
            let keyed = key.is_some_and(|k| PROFILE_KEYS.contains(&k));
            let typed = matches!(
                obj.get("@type").and_then(Value::as_str),
                Some("Person" | "ProfilePage")
            );
            if keyed || typed {
                found = Some(obj);
            }
        });
        if found.is_some() {
            return found;
        }
    }
    None
}

/// First non-empty string or number under `keys`, looking one level into
/// nested objects (`mainEntity`, `image: {url}`) as well.
fn scalar_at(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    let direct = |map: &Map<String, Value>| {
        keys.iter().find_map(|k| match map.get(*k)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Object(inner) => inner
                .get("url")
                .or_else(|| inner.get("value"))
                .and_then(Value::as_str)
                .map(String::from),
            _ => None,
        })
    };
    direct(obj).or_else(|| {
        obj.values()
            .filter_map(Value::as_object)
            .find_map(|inner| direct(inner))
    })
}

/// The count in a label like "1.2M Subscribers".
fn leading_count(label: &str) -> Option<u64> {
    label
        .split_whitespace()
        .find(|token| is_counter_token(token))
        .and_then(parse_compact_count)
}
