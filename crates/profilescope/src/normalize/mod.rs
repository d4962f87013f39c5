//! Tab content normalizer.
//!
//! Turns a parsed page into typed tiles for one category. Two kinds of source
//! feed it: items from embedded JSON payloads and tile elements in the
//! markup. Both go through [`TileSource`], then share one post-processing
//! pass: dropping tiles with no text of their own, owner defaulting, URL
//! normalization, invariant filtering, self-mention filtering and
//! deduplication.

pub mod fields;
pub mod payload;
pub mod profile;
pub mod registry;

pub use payload::PayloadShape;
pub use registry::{CategoryRegistry, CategorySpec};

use crate::cascade::{extract_field, select_nodes};
use crate::document::{normalize_url, PageDocument, MAX_JSON_DEPTH};
use crate::types::{Category, ContentTile, Engagement, Subject, TabContent};
use scraper::ElementRef;
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

/// Where a tile comes from.
pub enum TileSource<'a> {
    ScriptPayload(&'a Value),
    AnchorElement(ElementRef<'a>),
}

impl<'a> TileSource<'a> {
    /// Map the source onto a raw tile. Payloads of a foreign shape yield `None`.
    pub fn into_tile(self, spec: &CategorySpec) -> Option<ContentTile> {
        match self {
            TileSource::ScriptPayload(item) => payload::tile_from_payload(spec, item),
            TileSource::AnchorElement(el) => Some(tile_from_element(spec, el)),
        }
    }
}

fn tile_from_element(spec: &CategorySpec, el: ElementRef<'_>) -> ContentTile {
    let mut tile = ContentTile::empty(spec.category);
    tile.user = extract_field(el, &spec.user);
    tile.description = extract_field(el, &spec.description);
    tile.thumbnail_url = extract_field(el, &spec.thumbnail);
    tile.canonical_url = extract_field(el, &spec.canonical);
    if spec.reads_engagement {
        if let Some(engagement) = tile.kind.engagement_mut() {
            let text = el.text().collect::<Vec<_>>().join(" ");
            *engagement = engagement_from_counters(fields::counter_run(&text));
        }
    }
    tile
}

/// Counters in display order are views, comments, shares.
fn engagement_from_counters(counters: Vec<String>) -> Engagement {
    let mut it = counters.into_iter();
    Engagement {
        views: it.next(),
        comments: it.next(),
        shares: it.next(),
    }
}

/// Category-aware page normalizer. Built once, shared across requests.
pub struct Normalizer {
    registry: CategoryRegistry,
    base: Url,
}

impl Normalizer {
    /// `base` resolves relative URLs found in pages.
    pub fn new(base: Url) -> Self {
        Self {
            registry: CategoryRegistry::new(),
            base,
        }
    }

    pub fn registry(&self) -> &CategoryRegistry {
        &self.registry
    }

    /// Extract `category` content for `subject` from a parsed page.
    pub fn normalize(&self, doc: &PageDocument, subject: &Subject, category: Category) -> TabContent {
        let tiles = self.tiles(doc, subject, category);
        match category {
            Category::Profile => TabContent::Profile {
                record: profile::extract_profile(
                    doc,
                    subject,
                    self.registry.profile_rules(),
                    &self.base,
                ),
                tiles,
            },
            category => TabContent::Tiles { category, tiles },
        }
    }

    /// Valid, deduplicated tiles for `category`, payload items first.
    pub fn tiles(&self, doc: &PageDocument, subject: &Subject, category: Category) -> Vec<ContentTile> {
        let spec = self.registry.spec(category);

        let mut sources: Vec<TileSource<'_>> = payload::collect_items(&doc.payloads, spec, MAX_JSON_DEPTH)
            .into_iter()
            .map(TileSource::ScriptPayload)
            .collect();
        sources.extend(
            select_nodes(doc.html.root_element(), &spec.tile_nodes)
                .into_iter()
                .map(TileSource::AnchorElement),
        );

        let raw: Vec<ContentTile> = sources
            .into_iter()
            .filter_map(|source| source.into_tile(spec))
            .collect();
        let found = raw.len();
        let tiles = self.finish(raw, spec, subject);
        tracing::debug!(
            "{subject}/{category}: {} tiles kept of {found} candidates",
            tiles.len()
        );
        tiles
    }

    fn finish(&self, raw: Vec<ContentTile>, spec: &CategorySpec, subject: &Subject) -> Vec<ContentTile> {
        let mut seen = HashSet::new();
        let mut seen_mentions = HashSet::new();
        let mut out = Vec::new();

        for mut tile in raw {
            tile.user = tile.user.as_deref().and_then(fields::clean_handle);
            // Owner defaulting must not turn a bare thumbnail into a tile.
            if !tile.has_text() {
                continue;
            }
            if tile.user.is_none() && spec.owner_is_subject {
                tile.user = Some(subject.as_str().to_string());
            }
            tile.thumbnail_url = tile
                .thumbnail_url
                .as_deref()
                .and_then(|u| normalize_url(u, &self.base));
            tile.canonical_url = tile
                .canonical_url
                .as_deref()
                .and_then(|u| normalize_url(u, &self.base));

            if !tile.satisfies_invariants() {
                continue;
            }
            if spec.excludes_subject && tile.user.as_deref().is_some_and(|u| subject.matches_user(u)) {
                continue;
            }
            if spec.category == Category::Tagged {
                let mention = (
                    tile.user.as_deref().map(str::to_ascii_lowercase),
                    tile.description.clone(),
                );
                if !seen_mentions.insert(mention) {
                    continue;
                }
            }
            if !seen.insert(dedup_key(&tile)) {
                continue;
            }
            out.push(tile);
        }
        out
    }
}

/// Canonical URL without query or fragment when present, otherwise the
/// (user, description, thumbnail) triple.
fn dedup_key(tile: &ContentTile) -> String {
    match tile.canonical_url.as_deref() {
        Some(url) => {
            let bare = url.split(['?', '#']).next().unwrap_or(url);
            format!("url:{}", bare.trim_end_matches('/'))
        }
        None => format!(
            "fields:{}\u{1f}{}\u{1f}{}",
            tile.user.as_deref().unwrap_or_default().to_ascii_lowercase(),
            tile.description.as_deref().unwrap_or_default(),
            tile.thumbnail_url.as_deref().unwrap_or_default()
        ),
    }
}
