//! Owned, `Send` view of a canonical content page.
//!
//! Strategies run across `.await` points (probes, manifest fetches), so the
//! parsed tree is reduced to plain data before any of them starts.

use crate::document::PageDocument;
use scraper::Selector;
use serde_json::Value;
use url::Url;

/// Attributes of one element worth scanning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementAttrs {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
}

impl ElementAttrs {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MediaSnapshot {
    /// Page URL relative references resolve against.
    pub base: Option<Url>,
    pub payloads: Vec<Value>,
    pub scripts: Vec<String>,
    /// Elements carrying `data-*` or `style` attributes, in document order.
    pub elements: Vec<ElementAttrs>,
    /// `src` of `<video>` and nested `<source>` elements, then `og:video`
    /// meta content.
    pub media_sources: Vec<String>,
}

impl MediaSnapshot {
    /// A snapshot with nothing but the page URL; URL-only strategies still work.
    pub fn empty(canonical_url: &str) -> Self {
        Self {
            base: Url::parse(canonical_url).ok(),
            ..Default::default()
        }
    }

    /// Parse `body` and reduce it. Unparsable bodies give an empty snapshot.
    pub fn from_body(canonical_url: &str, body: &str) -> Self {
        match PageDocument::parse(body) {
            Ok(doc) => Self::from_document(canonical_url, &doc),
            Err(e) => {
                tracing::debug!("{canonical_url}: unusable document: {e}");
                Self::empty(canonical_url)
            }
        }
    }

    pub fn from_document(canonical_url: &str, doc: &PageDocument) -> Self {
        let mut snapshot = Self::empty(canonical_url);
        snapshot.payloads = doc.payloads.clone();
        snapshot.scripts = doc.scripts.clone();

        for el in doc.html.root_element().descendants().filter_map(scraper::ElementRef::wrap) {
            let value = el.value();
            let interesting = value
                .attrs()
                .any(|(name, _)| name.starts_with("data-") || name == "style");
            if interesting {
                snapshot.elements.push(ElementAttrs {
                    tag: value.name().to_string(),
                    attrs: value.attrs().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                });
            }
        }

        if let Ok(sel) = Selector::parse("video[src], video source[src]") {
            snapshot.media_sources.extend(
                doc.html
                    .select(&sel)
                    .filter_map(|el| el.value().attr("src"))
                    .map(String::from),
            );
        }
        if let Ok(sel) = Selector::parse(
            r#"meta[property="og:video"], meta[property="og:video:url"], meta[property="og:video:secure_url"]"#,
        ) {
            snapshot.media_sources.extend(
                doc.html
                    .select(&sel)
                    .filter_map(|el| el.value().attr("content"))
                    .map(String::from),
            );
        }
        snapshot
    }
}
