//! Selector cascade engine.
//!
//! A logical field (display name, tile description, thumbnail...) is described
//! by an ordered list of [`ExtractionRule`]s. Rules are evaluated strictly in
//! order and the first one that yields a non-empty value wins; the remaining
//! rules are never evaluated. Upstream class names churn, so each field
//! layers several cheap, weak predicates instead of relying on one selector.
//!
//! A rule that matches nothing is a miss, not an error. A rule whose CSS
//! selector does not parse logs a warning once and never fires.

use crate::document::collapse_ws;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Post-processing applied to an accessor's raw value. Returning `None`
/// means the node did not yield a value.
pub type Transform = fn(&str) -> Option<String>;

type CustomFn = dyn for<'a> Fn(ElementRef<'a>) -> Option<String> + Send + Sync;

/// How a matched node is turned into a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessor {
    /// Whitespace-collapsed text content.
    Text,
    /// Value of the named attribute.
    Attr(&'static str),
}

enum Predicate {
    /// Descendants of the scope matching a selector. `None` if the selector
    /// failed to parse.
    Descendant(Option<Selector>),
    /// The scope element itself.
    Scope,
    Custom(Arc<CustomFn>),
}

/// One (predicate, accessor) step in a cascade.
pub struct ExtractionRule {
    name: &'static str,
    predicate: Predicate,
    accessor: Accessor,
    transform: Option<Transform>,
}

impl fmt::Debug for ExtractionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionRule")
            .field("name", &self.name)
            .field("accessor", &self.accessor)
            .finish()
    }
}

impl ExtractionRule {
    /// Match descendants of the scope with a CSS selector.
    pub fn css(name: &'static str, selector: &str, accessor: Accessor) -> Self {
        Self {
            name,
            predicate: Predicate::Descendant(parse_selector(name, selector)),
            accessor,
            transform: None,
        }
    }

    pub fn text(name: &'static str, selector: &str) -> Self {
        Self::css(name, selector, Accessor::Text)
    }

    pub fn attr(name: &'static str, selector: &str, attr: &'static str) -> Self {
        Self::css(name, selector, Accessor::Attr(attr))
    }

    /// Read from the scope element itself.
    pub fn own(name: &'static str, accessor: Accessor) -> Self {
        Self {
            name,
            predicate: Predicate::Scope,
            accessor,
            transform: None,
        }
    }

    /// Arbitrary logic over the scope element.
    pub fn custom<F>(name: &'static str, f: F) -> Self
    where
        F: for<'a> Fn(ElementRef<'a>) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            name,
            predicate: Predicate::Custom(Arc::new(f)),
            accessor: Accessor::Text,
            transform: None,
        }
    }

    pub fn map(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the rule can ever fire (its selector parsed).
    pub fn is_usable(&self) -> bool {
        !matches!(self.predicate, Predicate::Descendant(None))
    }

    /// First non-empty value this rule yields within `scope`.
    fn evaluate(&self, scope: ElementRef<'_>) -> Option<String> {
        match &self.predicate {
            Predicate::Descendant(None) => None,
            Predicate::Descendant(Some(sel)) => scope.select(sel).find_map(|el| self.read(el)),
            Predicate::Scope => self.read(scope),
            Predicate::Custom(f) => f(scope).and_then(|v| self.finish(&v)),
        }
    }

    /// Every non-empty value this rule yields within `scope`.
    fn evaluate_all(&self, scope: ElementRef<'_>) -> Vec<String> {
        match &self.predicate {
            Predicate::Descendant(None) => Vec::new(),
            Predicate::Descendant(Some(sel)) => {
                scope.select(sel).filter_map(|el| self.read(el)).collect()
            }
            _ => self.evaluate(scope).into_iter().collect(),
        }
    }

    fn read(&self, el: ElementRef<'_>) -> Option<String> {
        let raw = match self.accessor {
            Accessor::Text => collapse_ws(&el.text().collect::<Vec<_>>().join(" ")),
            Accessor::Attr(attr) => el.value().attr(attr)?.to_string(),
        };
        self.finish(&raw)
    }

    fn finish(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match self.transform {
            Some(t) => t(trimmed).filter(|v| !v.trim().is_empty()),
            None => Some(trimmed.to_string()),
        }
    }
}

fn parse_selector(rule: &str, selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(sel) => Some(sel),
        Err(e) => {
            tracing::warn!("rule {rule}: invalid selector {selector:?}: {e:?}");
            None
        }
    }
}

/// Evaluate `rules` in order within `scope`; first non-empty value wins.
pub fn extract_field(scope: ElementRef<'_>, rules: &[ExtractionRule]) -> Option<String> {
    for rule in rules {
        if let Some(value) = rule.evaluate(scope) {
            tracing::trace!("rule {} fired", rule.name);
            return Some(value);
        }
    }
    None
}

/// [`extract_field`] over a whole document.
pub fn extract_document_field(html: &Html, rules: &[ExtractionRule]) -> Option<String> {
    extract_field(html.root_element(), rules)
}

/// Distinct values of the first rule that yields anything, in document order.
pub fn extract_all(scope: ElementRef<'_>, rules: &[ExtractionRule]) -> Vec<String> {
    for rule in rules {
        let values = rule.evaluate_all(scope);
        if !values.is_empty() {
            let mut seen = HashSet::new();
            return values.into_iter().filter(|v| seen.insert(v.clone())).collect();
        }
    }
    Vec::new()
}

/// A named selector for collecting nodes (tile roots) rather than values.
pub struct NodeRule {
    name: &'static str,
    selector: Option<Selector>,
}

impl NodeRule {
    pub fn new(name: &'static str, selector: &str) -> Self {
        Self {
            name,
            selector: parse_selector(name, selector),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Nodes matched by the first rule that matches anything.
pub fn select_nodes<'a>(scope: ElementRef<'a>, rules: &[NodeRule]) -> Vec<ElementRef<'a>> {
    for rule in rules {
        let Some(sel) = &rule.selector else {
            continue;
        };
        let nodes: Vec<ElementRef<'a>> = scope.select(sel).collect();
        if !nodes.is_empty() {
            tracing::trace!("node rule {} matched {} nodes", rule.name, nodes.len());
            return nodes;
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(body: &str) -> Html {
        Html::parse_document(&format!("<html><head></head><body>{body}</body></html>"))
    }

    #[test]
    fn test_first_firing_rule_wins_and_rest_are_skipped() {
        let html = doc(r#"<h1>  Alice   Smith </h1><h2>Other</h2>"#);
        let rules = vec![
            ExtractionRule::text("missing", ".display-name"),
            ExtractionRule::text("heading", "h1"),
            ExtractionRule::custom("must-not-run", |_| panic!("evaluated past the firing rule")),
        ];
        assert_eq!(extract_document_field(&html, &rules).as_deref(), Some("Alice Smith"));
    }

    #[test]
    fn test_no_rule_fires_returns_none() {
        let html = doc("<p>nothing here</p>");
        let rules = vec![
            ExtractionRule::text("a", ".nope"),
            ExtractionRule::attr("b", "img", "src"),
        ];
        assert_eq!(extract_document_field(&html, &rules), None);
    }

    #[test]
    fn test_empty_node_does_not_fire() {
        let html = doc(r#"<span class="bio">   </span><meta name="description" content="Hi there">"#);
        let rules = vec![
            ExtractionRule::text("bio-span", ".bio"),
            ExtractionRule::attr("meta", r#"meta[name="description"]"#, "content"),
        ];
        assert_eq!(extract_document_field(&html, &rules).as_deref(), Some("Hi there"));
    }

    #[test]
    fn test_later_matching_node_is_used_when_first_is_empty() {
        let html = doc(r#"<img alt=""><img alt="Sunset">"#);
        let rules = vec![ExtractionRule::attr("alt", "img", "alt")];
        assert_eq!(extract_document_field(&html, &rules).as_deref(), Some("Sunset"));
    }

    #[test]
    fn test_invalid_selector_never_fires() {
        let rule = ExtractionRule::text("broken", "div[[");
        assert!(!rule.is_usable());
        let html = doc("<div>x</div>");
        let rules = vec![rule, ExtractionRule::text("div", "div")];
        assert_eq!(extract_document_field(&html, &rules).as_deref(), Some("x"));
    }

    #[test]
    fn test_transform_rejecting_value_moves_on() {
        fn only_handles(s: &str) -> Option<String> {
            s.strip_prefix('@').map(String::from)
        }
        let html = doc(r#"<span class="u">plain</span><span class="u">@carol</span>"#);
        let rules = vec![ExtractionRule::text("handle", ".u").map(only_handles)];
        assert_eq!(extract_document_field(&html, &rules).as_deref(), Some("carol"));
    }

    #[test]
    fn test_own_accessor_reads_scope() {
        let html = doc(r#"<a id="t" href="/spotlight/abc">x</a>"#);
        let sel = Selector::parse("#t").unwrap();
        let anchor = html.select(&sel).next().unwrap();
        let rules = vec![ExtractionRule::own("href", Accessor::Attr("href"))];
        assert_eq!(extract_field(anchor, &rules).as_deref(), Some("/spotlight/abc"));
    }

    #[test]
    fn test_extract_all_dedups_first_firing_rule() {
        let html = doc(r#"<a class="t">A</a><a class="t">B</a><a class="t">A</a><b>C</b>"#);
        let rules = vec![
            ExtractionRule::text("none", ".zzz"),
            ExtractionRule::text("tabs", "a.t"),
            ExtractionRule::text("bold", "b"),
        ];
        assert_eq!(extract_all(html.root_element(), &rules), vec!["A", "B"]);
    }

    #[test]
    fn test_select_nodes_cascade() {
        let html = doc(r#"<div class="tile">1</div><div class="tile">2</div><a>3</a>"#);
        let rules = vec![
            NodeRule::new("missing", "[data-testid=tile]"),
            NodeRule::new("class", "div.tile"),
            NodeRule::new("anchor", "a"),
        ];
        assert_eq!(select_nodes(html.root_element(), &rules).len(), 2);
    }
}
