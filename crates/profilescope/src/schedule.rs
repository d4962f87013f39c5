//! Category availability: navigation detection and background probing.

use crate::clock::Clock;
use crate::types::Category;
use scraper::{Html, Selector};
use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Availability of one (subject, category).
///
/// `Unvalidated → Checking → {Available, Empty}`. A failed check drops back
/// to `Unvalidated`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TabState {
    #[default]
    Unvalidated,
    Checking,
    Available,
    Empty,
}

impl TabState {
    pub fn is_settled(self) -> bool {
        matches!(self, TabState::Available | TabState::Empty)
    }
}

/// Elements that make up a page's tab navigation.
const NAV_SELECTORS: &[&str] = &[
    r#"[role="tablist"] [role="tab"]"#,
    r#"[role="tablist"] a[href]"#,
    r#"a[href*="tab="]"#,
    r#"nav a[href]"#,
    r#"[data-testid*="tab"]"#,
];

/// Categories the subject page links to in its navigation. `None` when the
/// page has no recognizable navigation; callers then probe each category.
/// Profile is always included.
pub fn detect_categories(html: &Html) -> Option<BTreeSet<Category>> {
    let mut found = BTreeSet::new();
    for raw in NAV_SELECTORS {
        let Ok(sel) = Selector::parse(raw) else {
            continue;
        };
        for el in html.select(&sel) {
            let from_href = el.value().attr("href").and_then(category_from_href);
            let label = el.text().collect::<Vec<_>>().join(" ");
            let from_label = category_from_label(&label)
                .or_else(|| el.value().attr("aria-label").and_then(category_from_label));
            found.extend(from_href.or(from_label));
        }
    }
    found.remove(&Category::Profile);
    if found.is_empty() {
        return None;
    }
    found.insert(Category::Profile);
    Some(found)
}

fn category_from_href(href: &str) -> Option<Category> {
    let query = href.split_once('?')?.1;
    let query = query.split('#').next().unwrap_or(query);
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "tab")
        .and_then(|(_, v)| category_from_label(v))
}

/// Match a tab label or `tab=` value to a category.
pub fn category_from_label(label: &str) -> Option<Category> {
    let label = label.trim().to_ascii_lowercase();
    let first = label.split_whitespace().next()?;
    match first {
        "spotlight" | "spotlights" => Some(Category::Spotlight),
        "stories" | "story" => Some(Category::Stories),
        "lenses" | "lens" => Some(Category::Lenses),
        "tagged" | "mentions" => Some(Category::Tagged),
        "related" | "similar" => Some(Category::Related),
        _ => None,
    }
}

/// Cooperative queue of category probes. Pauses between probes so
/// background validation never bursts requests upstream.
pub struct ValidationQueue {
    queue: VecDeque<Category>,
    pause: Duration,
    clock: Arc<dyn Clock>,
}

impl ValidationQueue {
    pub fn new(categories: impl IntoIterator<Item = Category>, pause: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: categories.into_iter().collect(),
            pause,
            clock,
        }
    }

    /// Take the next category to probe.
    pub fn next(&mut self) -> Option<Category> {
        self.queue.pop_front()
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Probe every queued category in order, pausing between probes.
    /// `probe` returns `Some(has_content)` or `None` when the check failed;
    /// `record` sees each outcome as soon as it is known.
    pub async fn run<P, Fut, R>(mut self, mut probe: P, mut record: R)
    where
        P: FnMut(Category) -> Fut,
        Fut: Future<Output = Option<bool>>,
        R: FnMut(Category, Option<bool>),
    {
        let mut first = true;
        while let Some(category) = self.next() {
            if !first {
                self.clock.sleep(self.pause).await;
            }
            first = false;
            let outcome = probe(category).await;
            tracing::debug!("validated {category}: {outcome:?}");
            record(category, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_detect_from_tablist() {
        let html = Html::parse_document(
            r#"<div role="tablist">
                <button role="tab">Spotlight</button>
                <button role="tab">Lenses</button>
            </div>"#,
        );
        let found = detect_categories(&html).unwrap();
        assert_eq!(
            found.into_iter().collect::<Vec<_>>(),
            vec![Category::Profile, Category::Spotlight, Category::Lenses]
        );
    }

    #[test]
    fn test_detect_from_tab_links() {
        let html = Html::parse_document(
            r#"<a href="/add/alice?locale=en-US&tab=Tagged">Tagged</a>
               <a href="/add/alice?tab=Related#top">More like this</a>"#,
        );
        let found = detect_categories(&html).unwrap();
        assert!(found.contains(&Category::Tagged));
        assert!(found.contains(&Category::Related));
        assert!(!found.contains(&Category::Spotlight));
    }

    #[test]
    fn test_no_navigation_means_probe() {
        let html = Html::parse_document("<main><h1>Alice</h1><nav><a href='/'>Home</a></nav></main>");
        assert!(detect_categories(&html).is_none());
    }

    #[test]
    fn test_labels() {
        assert_eq!(category_from_label(" Stories "), Some(Category::Stories));
        assert_eq!(category_from_label("Related accounts"), Some(Category::Related));
        assert_eq!(category_from_label("Home"), None);
    }

    #[tokio::test]
    async fn test_queue_pauses_between_probes() {
        let clock = Arc::new(ManualClock::new());
        let queue = ValidationQueue::new(
            [Category::Spotlight, Category::Stories, Category::Lenses],
            Duration::from_millis(250),
            clock.clone(),
        );
        assert_eq!(queue.remaining(), 3);

        let mut outcomes = Vec::new();
        queue
            .run(
                |category| async move { Some(category == Category::Stories) },
                |category, outcome| outcomes.push((category, outcome)),
            )
            .await;

        assert_eq!(
            outcomes,
            vec![
                (Category::Spotlight, Some(false)),
                (Category::Stories, Some(true)),
                (Category::Lenses, Some(false)),
            ]
        );
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(250); 2]);
    }
}
