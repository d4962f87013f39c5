//! Parsed page: the `scraper` tree plus decoded embedded payloads.
//!
//! `scraper::Html` is `!Send`, so a [`PageDocument`] is built and consumed
//! inside synchronous code and never held across an `.await`.

use crate::error::ScopeError;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

/// Deepest level any walk over decoded JSON descends to.
pub const MAX_JSON_DEPTH: usize = 10;

/// A document ready for extraction.
pub struct PageDocument {
    pub html: Html,
    /// Decoded JSON blocks embedded in the page (`__NEXT_DATA__`, ld+json,
    /// application/json). A bare JSON response lands here too.
    pub payloads: Vec<Value>,
    /// Bodies of inline `<script>` elements, in document order.
    pub scripts: Vec<String>,
}

impl PageDocument {
    /// Parse raw text into a tree. Empty input, or input that is neither
    /// markup nor JSON, is a parse failure.
    pub fn parse(raw: &str) -> Result<Self, ScopeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ScopeError::Parse("empty document".to_string()));
        }

        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                return Ok(Self {
                    html: Html::parse_document(""),
                    payloads: vec![value],
                    scripts: Vec::new(),
                });
            }
        }

        if !trimmed.contains('<') {
            return Err(ScopeError::Parse("document contains no markup".to_string()));
        }

        let html = Html::parse_document(raw);
        let payloads = decode_payloads(&html);
        let scripts = inline_scripts(&html);
        Ok(Self {
            html,
            payloads,
            scripts,
        })
    }
}

fn decode_payloads(html: &Html) -> Vec<Value> {
    let Ok(sel) = Selector::parse(
        r#"script#__NEXT_DATA__, script[type="application/json"], script[type="application/ld+json"]"#,
    ) else {
        return Vec::new();
    };
    html.select(&sel)
        .filter_map(|el| {
            let text = el.inner_html();
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            match serde_json::from_str::<Value>(text) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::debug!("skipping undecodable embedded payload: {e}");
                    None
                }
            }
        })
        .collect()
}

fn inline_scripts(html: &Html) -> Vec<String> {
    let Ok(sel) = Selector::parse("script:not([src])") else {
        return Vec::new();
    };
    html.select(&sel)
        .map(|el| el.text().collect::<String>())
        .filter(|s| !s.trim().is_empty())
        .collect()
}

/// Depth-first, document-order walk over a decoded JSON value.
///
/// `visit` receives the key the value was found under (array elements inherit
/// their array's key), the value and its depth. Nodes deeper than `max_depth`
/// are not visited and each node is visited once.
pub fn walk_json<'a>(
    root: &'a Value,
    max_depth: usize,
    visit: &mut dyn FnMut(Option<&'a str>, &'a Value, usize),
) {
    let mut seen: HashSet<*const Value> = HashSet::new();
    let mut stack: Vec<(Option<&'a str>, &'a Value, usize)> = vec![(None, root, 0)];

    while let Some((key, value, depth)) = stack.pop() {
        if !seen.insert(value as *const Value) {
            continue;
        }
        visit(key, value, depth);
        if depth >= max_depth {
            continue;
        }
        match value {
            Value::Object(map) => {
                for (k, v) in map.iter().rev() {
                    stack.push((Some(k.as_str()), v, depth + 1));
                }
            }
            Value::Array(items) => {
                for v in items.iter().rev() {
                    stack.push((key, v, depth + 1));
                }
            }
            _ => {}
        }
    }
}

/// First string found under any of `keys` (case-sensitive) within `value`.
pub fn find_string(value: &Value, keys: &[&str], max_depth: usize) -> Option<String> {
    let mut found = None;
    walk_json(value, max_depth, &mut |key, v, _| {
        if found.is_some() {
            return;
        }
        if let (Some(k), Some(s)) = (key, v.as_str()) {
            if keys.contains(&k) && !s.trim().is_empty() {
                found = Some(s.trim().to_string());
            }
        }
    });
    found
}

/// Make a scraped URL absolute. Script, data and blob URLs are dropped.
pub fn normalize_url(raw: &str, base: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("data:") || lower.starts_with("blob:") {
        return None;
    }
    if let Some(rest) = raw.strip_prefix("//") {
        return Url::parse(&format!("https://{rest}")).ok().map(String::from);
    }
    base.join(raw).ok().map(String::from)
}

/// Collapse runs of whitespace into single spaces.
pub fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_document_is_parse_failure() {
        assert!(matches!(PageDocument::parse("   \n"), Err(ScopeError::Parse(_))));
        assert!(matches!(PageDocument::parse("plain words"), Err(ScopeError::Parse(_))));
    }

    #[test]
    fn test_payloads_and_scripts_are_collected() {
        let html = r#"
        <html><head>
        <script id="__NEXT_DATA__" type="application/json">{"props":{"pageProps":{"a":1}}}</script>
        <script type="application/ld+json">{"@type":"Person","name":"Alice"}</script>
        <script type="application/ld+json">{broken</script>
        <script src="/bundle.js"></script>
        <script>window.x = 1;</script>
        </head><body></body></html>
        "#;
        let doc = PageDocument::parse(html).unwrap();
        assert_eq!(doc.payloads.len(), 2);
        assert_eq!(doc.payloads[0]["props"]["pageProps"]["a"], 1);
        // JSON blocks are inline scripts as well.
        assert!(doc.scripts.iter().any(|s| s.contains("window.x")));
        assert!(!doc.scripts.iter().any(|s| s.is_empty()));
    }

    #[test]
    fn test_bare_json_document() {
        let doc = PageDocument::parse(r#"{"userProfile":{"username":"alice"}}"#).unwrap();
        assert_eq!(doc.payloads.len(), 1);
        assert!(doc.scripts.is_empty());
    }

    #[test]
    fn test_walk_json_respects_depth() {
        let mut v = json!("leaf");
        for i in 0..15 {
            v = json!({ format!("k{i}"): v });
        }
        let mut max_seen = 0;
        walk_json(&v, MAX_JSON_DEPTH, &mut |_, _, depth| max_seen = max_seen.max(depth));
        assert_eq!(max_seen, MAX_JSON_DEPTH);
    }

    #[test]
    fn test_walk_json_array_items_inherit_key() {
        let v = json!({"urls": ["a", "b"]});
        let mut keyed = Vec::new();
        walk_json(&v, 5, &mut |k, val, _| {
            if let Some(s) = val.as_str() {
                keyed.push((k.map(String::from), s.to_string()));
            }
        });
        assert_eq!(
            keyed,
            vec![
                (Some("urls".to_string()), "a".to_string()),
                (Some("urls".to_string()), "b".to_string())
            ]
        );
    }

    #[test]
    fn test_find_string() {
        let v = json!({"a": {"b": {"displayName": "  Alice  "}}});
        assert_eq!(find_string(&v, &["displayName"], 10).as_deref(), Some("Alice"));
        assert_eq!(find_string(&v, &["displayName"], 2), None);
    }

    #[test]
    fn test_normalize_url() {
        let base = Url::parse("https://www.snapchat.com/add/alice").unwrap();
        assert_eq!(
            normalize_url("/spotlight/abc", &base).as_deref(),
            Some("https://www.snapchat.com/spotlight/abc")
        );
        assert_eq!(
            normalize_url("//cf-st.sc-cdn.net/x.jpg", &base).as_deref(),
            Some("https://cf-st.sc-cdn.net/x.jpg")
        );
        assert_eq!(normalize_url("javascript:void(0)", &base), None);
        assert_eq!(normalize_url("data:image/png;base64,AAA", &base), None);
        assert_eq!(normalize_url("#", &base), None);
    }
}
