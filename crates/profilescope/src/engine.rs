//! `ProfileScope`: the request path from (subject, category) to typed tiles.
//!
//! A tab request first waits (up to a deadline) for its category to be
//! confirmed, then checks the response cache, and only on a miss fetches,
//! parses and normalizes the page. Unconfirmed categories are never fetched. Every request also
//! takes a ticket from the [`RequestTracker`]; a result whose ticket has been
//! superseded by a newer request for the same key is dropped instead of
//! becoming visible.
//!
//! Category availability is learned in the background. The profile page's
//! tab navigation settles every category at once; without navigation each
//! category is probed through a [`ValidationQueue`].

use crate::cache::{CacheStats, ResponseCache};
use crate::clock::{Clock, SystemClock};
use crate::config::ScopeConfig;
use crate::document::PageDocument;
use crate::error::{FailureKind, FetchFailure, ScopeError, ScopeResult};
use crate::fetch::{DocumentSource, HttpFetcher, ServiceHealth};
use crate::normalize::Normalizer;
use crate::resolve::Resolver;
use crate::schedule::{detect_categories, TabState, ValidationQueue};
use crate::types::{Category, ProfileRecord, Subject, TabContent, TabKey, VideoResolution};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use url::Url;

/// Proof that a request was issued; presented again at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub key: TabKey,
    pub id: u64,
}

/// Stale-response guard.
///
/// Tickets come from one monotonically increasing counter. Only the newest
/// ticket per key may commit; older ones are rejected when they finish.
pub struct RequestTracker<V> {
    next: AtomicU64,
    latest: DashMap<TabKey, u64>,
    committed: DashMap<TabKey, V>,
}

impl<V: Clone> RequestTracker<V> {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            latest: DashMap::new(),
            committed: DashMap::new(),
        }
    }

    /// Start a request for `key`, superseding any earlier one.
    pub fn issue(&self, key: TabKey) -> Ticket {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.latest.insert(key.clone(), id);
        Ticket { key, id }
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.latest
            .get(&ticket.key)
            .is_some_and(|latest| *latest == ticket.id)
    }

    /// Publish `value` if `ticket` is still the newest for its key.
    pub fn commit(&self, ticket: &Ticket, value: V) -> bool {
        // The read guard blocks `issue` for this key until the write lands.
        let Some(latest) = self.latest.get(&ticket.key) else {
            return false;
        };
        if *latest != ticket.id {
            tracing::debug!(
                "discarding stale result for {} (ticket {} < {})",
                ticket.key,
                ticket.id,
                *latest
            );
            return false;
        }
        self.committed.insert(ticket.key.clone(), value);
        true
    }

    /// The last committed value for `key`.
    pub fn visible(&self, key: &TabKey) -> Option<V> {
        self.committed.get(key).map(|v| v.value().clone())
    }
}

impl<V: Clone> Default for RequestTracker<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle on a spawned tab request.
pub struct TabRequest {
    ticket: Ticket,
    handle: JoinHandle<ScopeResult<Option<TabContent>>>,
}

impl TabRequest {
    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    /// Cancel the request; its in-flight fetch is dropped.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the outcome. `Ok(None)` means the request was superseded or
    /// aborted.
    pub async fn join(self) -> ScopeResult<Option<TabContent>> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(None),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

type Validation = Shared<BoxFuture<'static, ()>>;

/// The extraction engine.
pub struct ProfileScope {
    config: ScopeConfig,
    base: Url,
    source: Arc<dyn DocumentSource>,
    cache: ResponseCache<TabKey, TabContent>,
    normalizer: Normalizer,
    resolver: Resolver,
    clock: Arc<dyn Clock>,
    availability: DashMap<Subject, [TabState; 6]>,
    validations: DashMap<Subject, Validation>,
    /// Woken whenever a category state changes.
    settled: Notify,
    tracker: RequestTracker<TabContent>,
}

impl ProfileScope {
    /// An engine fetching over HTTP from `config.base_url`.
    pub fn new(config: ScopeConfig) -> ScopeResult<Self> {
        config.validate()?;
        let fetcher = HttpFetcher::new(&config)?;
        Self::with_source(config, Arc::new(fetcher), Arc::new(SystemClock))
    }

    /// An engine reading documents from `source` and time from `clock`.
    pub fn with_source(
        config: ScopeConfig,
        source: Arc<dyn DocumentSource>,
        clock: Arc<dyn Clock>,
    ) -> ScopeResult<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| ScopeError::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        Ok(Self {
            cache: ResponseCache::with_clock(config.cache_capacity, Arc::clone(&clock)),
            normalizer: Normalizer::new(base.clone()),
            resolver: Resolver::new(Arc::clone(&source), config.cdn_templates.clone()),
            availability: DashMap::new(),
            validations: DashMap::new(),
            settled: Notify::new(),
            tracker: RequestTracker::new(),
            config,
            base,
            source,
            clock,
        })
    }

    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }

    /// Upstream path of a subject's category page.
    pub fn tab_resource(&self, subject: &Subject, category: Category, locale: &str) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("locale", locale);
        if let Some(tab) = category.tab_param() {
            query.append_pair("tab", tab);
        }
        format!("/add/{}?{}", subject.as_str(), query.finish())
    }

    /// Tiles (and, for profile, the record) of one category in the default
    /// locale.
    pub async fn fetch_tab(self: &Arc<Self>, subject: &Subject, category: Category) -> ScopeResult<TabContent> {
        self.fetch_tab_in(subject, category, &self.config.locale).await
    }

    /// Fails with `Unconfirmed` when validation has not settled `category`
    /// within the configured deadline.
    pub async fn fetch_tab_in(
        self: &Arc<Self>,
        subject: &Subject,
        category: Category,
        locale: &str,
    ) -> ScopeResult<TabContent> {
        match self.confirm(subject, category).await {
            TabState::Available => self.cached_extract(subject, category, locale).await,
            TabState::Empty => {
                tracing::debug!("{subject}/{category}: known empty, not fetching");
                Ok(TabContent::empty(category))
            }
            state => {
                tracing::debug!("{subject}/{category}: still {state:?}, not fetching");
                Err(ScopeError::Unconfirmed {
                    subject: subject.to_string(),
                    category,
                })
            }
        }
    }

    /// The settled state of `category`, waiting for validation until it
    /// settles, validation ends or the deadline passes.
    async fn confirm(self: &Arc<Self>, subject: &Subject, category: Category) -> TabState {
        let state = self.tab_state(subject, category);
        if state.is_settled() {
            return state;
        }
        let mut validation = self.validation_for(subject);
        let deadline = tokio::time::sleep(self.config.validation_deadline());
        tokio::pin!(deadline);
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let state = self.tab_state(subject, category);
            if state.is_settled() {
                return state;
            }
            tokio::select! {
                _ = &mut validation => return self.tab_state(subject, category),
                _ = notified.as_mut() => {}
                _ = &mut deadline => {
                    tracing::info!("{subject}/{category}: not confirmed within the validation deadline");
                    return self.tab_state(subject, category);
                }
            }
        }
    }

    /// Extraction through the cache with no availability check. Validation
    /// reads pages through here.
    async fn cached_extract(&self, subject: &Subject, category: Category, locale: &str) -> ScopeResult<TabContent> {
        let key = TabKey::new(subject.clone(), category, locale);
        self.cache
            .get_or_fetch(key, self.config.cache_ttl(), || {
                self.extract(subject, category, locale)
            })
            .await
    }

    async fn extract(&self, subject: &Subject, category: Category, locale: &str) -> ScopeResult<TabContent> {
        let resource = self.tab_resource(subject, category, locale);
        let raw = self
            .source
            .fetch(&resource)
            .await
            .map_err(|failure| self.fetch_error(failure))?;
        let content = self.normalize_body(&raw.body, subject, category)?;
        tracing::debug!("{subject}/{category}: {} tiles", content.tiles().len());
        Ok(content)
    }

    fn normalize_body(&self, body: &str, subject: &Subject, category: Category) -> ScopeResult<TabContent> {
        let doc = PageDocument::parse(body)?;
        if category == Category::Profile {
            if let Some(found) = detect_categories(&doc.html) {
                self.apply_detected(subject, &found);
            }
        }
        Ok(self.normalizer.normalize(&doc, subject, category))
    }

    /// Timeouts surface as `Degraded` once the fetcher reports it.
    fn fetch_error(&self, failure: FetchFailure) -> ScopeError {
        match self.source.health() {
            ServiceHealth::Degraded {
                consecutive_timeouts,
            } if failure.kind == FailureKind::Timeout => ScopeError::Degraded {
                consecutive_timeouts,
            },
            _ => ScopeError::Fetch(failure),
        }
    }

    /// The subject's profile record, if the page carries one.
    pub async fn profile(&self, subject: &Subject) -> ScopeResult<Option<ProfileRecord>> {
        let content = self
            .cached_extract(subject, Category::Profile, &self.config.locale)
            .await?;
        Ok(content.record().cloned())
    }

    /// Request a tab under the stale-response guard. `Ok(None)` when a newer
    /// request for the same key was issued before this one finished.
    pub async fn load_tab(self: &Arc<Self>, subject: &Subject, category: Category) -> ScopeResult<Option<TabContent>> {
        let ticket = self.issue(subject, category);
        self.complete(ticket, subject, category).await
    }

    /// Like [`load_tab`](Self::load_tab), on its own task.
    pub fn spawn_tab_request(self: &Arc<Self>, subject: Subject, category: Category) -> TabRequest {
        let ticket = self.issue(&subject, category);
        let this = Arc::clone(self);
        let task_ticket = ticket.clone();
        let handle = tokio::spawn(async move { this.complete(task_ticket, &subject, category).await });
        TabRequest { ticket, handle }
    }

    fn issue(&self, subject: &Subject, category: Category) -> Ticket {
        self.tracker
            .issue(TabKey::new(subject.clone(), category, self.config.locale.as_str()))
    }

    async fn complete(
        self: &Arc<Self>,
        ticket: Ticket,
        subject: &Subject,
        category: Category,
    ) -> ScopeResult<Option<TabContent>> {
        match self.fetch_tab(subject, category).await {
            Ok(content) => Ok(self.tracker.commit(&ticket, content.clone()).then_some(content)),
            Err(_) if !self.tracker.is_current(&ticket) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// What the newest committed request for (subject, category) produced.
    pub fn visible_tab(&self, subject: &Subject, category: Category) -> Option<TabContent> {
        self.tracker
            .visible(&TabKey::new(subject.clone(), category, self.config.locale.as_str()))
    }

    pub fn tab_state(&self, subject: &Subject, category: Category) -> TabState {
        if category == Category::Profile {
            return TabState::Available;
        }
        self.availability
            .get(subject)
            .map(|states| states[category.index()])
            .unwrap_or_default()
    }

    fn set_state(&self, subject: &Subject, category: Category, state: TabState) {
        self.availability.entry(subject.clone()).or_default()[category.index()] = state;
        self.settled.notify_waiters();
    }

    fn apply_detected(&self, subject: &Subject, found: &BTreeSet<Category>) {
        {
            let mut states = self.availability.entry(subject.clone()).or_default();
            for category in Category::ALL {
                states[category.index()] = if found.contains(&category) {
                    TabState::Available
                } else {
                    TabState::Empty
                };
            }
        }
        self.settled.notify_waiters();
        tracing::info!("{subject}: navigation lists {found:?}");
    }

    /// Categories confirmed to exist. Profile always is.
    pub fn confirmed_categories(&self, subject: &Subject) -> BTreeSet<Category> {
        Category::ALL
            .into_iter()
            .filter(|&c| self.tab_state(subject, c) == TabState::Available)
            .collect()
    }

    /// Validate the subject's categories, waiting at most `deadline`. On
    /// timeout the categories confirmed so far are returned and validation
    /// carries on in the background.
    pub async fn available_categories(self: &Arc<Self>, subject: &Subject, deadline: Duration) -> BTreeSet<Category> {
        let settled = Category::ALL[1..]
            .iter()
            .all(|&c| self.tab_state(subject, c).is_settled());
        if !settled {
            let validation = self.validation_for(subject);
            if tokio::time::timeout(deadline, validation).await.is_err() {
                tracing::info!(
                    "{subject}: validation deadline of {}ms elapsed",
                    deadline.as_millis()
                );
            }
        }
        self.confirmed_categories(subject)
    }

    /// The running validation for `subject`, spawning one if none is.
    fn validation_for(self: &Arc<Self>, subject: &Subject) -> Validation {
        self.validations
            .entry(subject.clone())
            .or_insert_with(|| {
                let this = Arc::clone(self);
                let subject = subject.clone();
                let handle = tokio::spawn(async move {
                    this.validate(&subject).await;
                    this.validations.remove(&subject);
                });
                async move {
                    if let Err(e) = handle.await {
                        tracing::warn!("validation task failed: {e}");
                    }
                }
                .boxed()
                .shared()
            })
            .clone()
    }

    async fn validate(&self, subject: &Subject) {
        if let Err(e) = self.cached_extract(subject, Category::Profile, &self.config.locale).await {
            tracing::warn!("{subject}: profile page unavailable for validation: {e}");
        }

        let pending: Vec<Category> = Category::ALL[1..]
            .iter()
            .copied()
            .filter(|&c| !self.tab_state(subject, c).is_settled())
            .collect();
        if pending.is_empty() {
            return;
        }
        for &category in &pending {
            self.set_state(subject, category, TabState::Checking);
        }

        ValidationQueue::new(pending, self.config.validation_pause(), Arc::clone(&self.clock))
            .run(
                |category| async move {
                    match self.cached_extract(subject, category, &self.config.locale).await {
                        Ok(content) => Some(!content.is_empty()),
                        Err(e) => {
                            tracing::debug!("{subject}/{category}: probe failed: {e}");
                            None
                        }
                    }
                },
                |category, outcome| {
                    let state = match outcome {
                        Some(true) => TabState::Available,
                        Some(false) => TabState::Empty,
                        None => TabState::Unvalidated,
                    };
                    self.set_state(subject, category, state);
                },
            )
            .await;
        tracing::info!("{subject}: available {:?}", self.confirmed_categories(subject));
    }

    /// Find a playable URL for a content item. Relative paths resolve
    /// against the upstream base.
    pub async fn resolve_video(&self, canonical_url: &str) -> ScopeResult<Option<VideoResolution>> {
        let target = self.canonical_target(canonical_url)?;
        Ok(self.resolver.resolve(target.as_str()).await)
    }

    fn canonical_target(&self, raw: &str) -> ScopeResult<Url> {
        let raw = raw.trim();
        let parsed = if raw.starts_with('/') && !raw.starts_with("//") {
            self.base.join(raw)
        } else {
            Url::parse(raw)
        };
        match parsed {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
            Ok(url) => Err(ScopeError::InvalidUrl(format!("{raw}: unsupported scheme {}", url.scheme()))),
            Err(e) => Err(ScopeError::InvalidUrl(format!("{raw}: {e}"))),
        }
    }

    /// Drop the cached tab so the next request refetches.
    pub fn invalidate(&self, subject: &Subject, category: Category) {
        self.cache
            .invalidate(&TabKey::new(subject.clone(), category, self.config.locale.as_str()));
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fetch::{ProbeOutcome, RawDocument};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySource {
        pages: HashMap<String, String>,
        delay: Duration,
        fetched: Mutex<Vec<String>>,
    }

    impl MemorySource {
        fn fetches_of(&self, resource: &str) -> usize {
            self.fetched.lock().unwrap().iter().filter(|r| *r == resource).count()
        }
    }

    #[async_trait]
    impl DocumentSource for MemorySource {
        async fn fetch(&self, resource: &str) -> Result<RawDocument, FetchFailure> {
            self.fetched.lock().unwrap().push(resource.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.pages.get(resource) {
                Some(body) => Ok(RawDocument {
                    url: resource.to_string(),
                    status: 200,
                    content_type: Some("text/html".into()),
                    body: body.clone(),
                }),
                None => Err(FetchFailure::status(404, "not found")),
            }
        }

        async fn probe(&self, url: &str) -> Result<ProbeOutcome, FetchFailure> {
            Err(FetchFailure::status(404, url.to_string()))
        }
    }

    const PROFILE: &str = "/add/alice?locale=en-US";
    const SPOTLIGHT: &str = "/add/alice?locale=en-US&tab=Spotlight";
    const LENSES: &str = "/add/alice?locale=en-US&tab=Lenses";

    const SPOTLIGHT_PAGE: &str = r#"<html><body>
        <a href="/spotlight/a1"><img src="/t/a1.jpg"><span>Sunset vibes</span><span>12K 3K 500</span></a>
        </body></html>"#;

    fn engine(source: MemorySource, clock: Arc<dyn Clock>) -> (Arc<ProfileScope>, Arc<MemorySource>) {
        let source = Arc::new(source);
        let scope = ProfileScope::with_source(ScopeConfig::default(), source.clone(), clock).unwrap();
        (Arc::new(scope), source)
    }

    fn alice() -> Subject {
        Subject::parse("alice").unwrap()
    }

    fn pages(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_tracker_rejects_superseded_ticket() {
        let tracker: RequestTracker<&str> = RequestTracker::new();
        let key = TabKey::new(Subject::parse("x").unwrap(), Category::Spotlight, "en-US");
        let a = tracker.issue(key.clone());
        let b = tracker.issue(key.clone());
        assert!(b.id > a.id);

        assert!(tracker.commit(&b, "from B"));
        assert!(!tracker.commit(&a, "from A"));
        assert_eq!(tracker.visible(&key), Some("from B"));
        assert!(!tracker.is_current(&a));
    }

    #[test]
    fn test_tab_resource_paths() {
        let (scope, _) = engine(MemorySource::default(), Arc::new(ManualClock::new()));
        assert_eq!(scope.tab_resource(&alice(), Category::Profile, "en-US"), PROFILE);
        assert_eq!(scope.tab_resource(&alice(), Category::Spotlight, "en-US"), SPOTLIGHT);
    }

    #[tokio::test]
    async fn test_superseded_request_is_discarded() {
        let source = MemorySource {
            pages: pages(&[(SPOTLIGHT, SPOTLIGHT_PAGE)]),
            delay: Duration::from_millis(20),
            ..Default::default()
        };
        let (scope, _) = engine(source, Arc::new(SystemClock));

        let first = scope.spawn_tab_request(alice(), Category::Spotlight);
        let second = scope.spawn_tab_request(alice(), Category::Spotlight);
        assert!(second.ticket().id > first.ticket().id);

        assert_eq!(first.join().await.unwrap(), None);
        let content = second.join().await.unwrap().unwrap();
        assert_eq!(content.tiles().len(), 1);
        assert_eq!(scope.visible_tab(&alice(), Category::Spotlight), Some(content));
    }

    #[tokio::test]
    async fn test_aborted_request_joins_as_none() {
        let source = MemorySource {
            pages: pages(&[(SPOTLIGHT, SPOTLIGHT_PAGE)]),
            delay: Duration::from_secs(5),
            ..Default::default()
        };
        let (scope, _) = engine(source, Arc::new(SystemClock));
        let request = scope.spawn_tab_request(alice(), Category::Spotlight);
        request.abort();
        assert_eq!(request.join().await.unwrap(), None);
        assert_eq!(scope.visible_tab(&alice(), Category::Spotlight), None);
    }

    #[tokio::test]
    async fn test_navigation_settles_categories_and_skips_empty_fetches() {
        let profile = r#"<html><body><h1>Alice</h1>
            <div role="tablist"><button role="tab">Spotlight</button></div>
            </body></html>"#;
        let source = MemorySource {
            pages: pages(&[(PROFILE, profile), (SPOTLIGHT, SPOTLIGHT_PAGE)]),
            ..Default::default()
        };
        let (scope, source) = engine(source, Arc::new(ManualClock::new()));

        let found = scope.available_categories(&alice(), Duration::from_secs(5)).await;
        assert_eq!(
            found.into_iter().collect::<Vec<_>>(),
            vec![Category::Profile, Category::Spotlight]
        );
        assert_eq!(scope.tab_state(&alice(), Category::Lenses), TabState::Empty);

        let lenses = scope.fetch_tab(&alice(), Category::Lenses).await.unwrap();
        assert!(lenses.is_empty());
        assert_eq!(source.fetches_of(LENSES), 0);
    }

    #[tokio::test]
    async fn test_first_request_confirms_category_before_fetching() {
        let profile = r#"<html><body><h1>Alice</h1>
            <div role="tablist"><button role="tab">Spotlight</button></div>
            </body></html>"#;
        let source = MemorySource {
            pages: pages(&[(PROFILE, profile), (SPOTLIGHT, SPOTLIGHT_PAGE), (LENSES, SPOTLIGHT_PAGE)]),
            ..Default::default()
        };
        let (scope, source) = engine(source, Arc::new(ManualClock::new()));

        let lenses = scope.fetch_tab(&alice(), Category::Lenses).await.unwrap();
        assert!(lenses.is_empty());
        assert_eq!(source.fetches_of(PROFILE), 1);
        assert_eq!(source.fetches_of(LENSES), 0);

        let spotlight = scope.fetch_tab(&alice(), Category::Spotlight).await.unwrap();
        assert_eq!(spotlight.tiles().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_check_leaves_category_unconfirmed() {
        let source = MemorySource {
            pages: pages(&[(SPOTLIGHT, SPOTLIGHT_PAGE)]),
            ..Default::default()
        };
        let (scope, source) = engine(source, Arc::new(ManualClock::new()));

        let err = scope.fetch_tab(&alice(), Category::Lenses).await.unwrap_err();
        assert!(matches!(
            err,
            ScopeError::Unconfirmed {
                category: Category::Lenses,
                ..
            }
        ));
        // Only validation touched the page.
        assert_eq!(source.fetches_of(LENSES), 1);
        assert_eq!(scope.tab_state(&alice(), Category::Lenses), TabState::Unvalidated);
    }

    #[tokio::test]
    async fn test_probing_without_navigation() {
        let empty = "<html><body><p>Nothing here yet</p></body></html>";
        let source = MemorySource {
            pages: pages(&[
                (PROFILE, "<html><body><h1>Alice</h1></body></html>"),
                (SPOTLIGHT, SPOTLIGHT_PAGE),
                ("/add/alice?locale=en-US&tab=Stories", empty),
                (LENSES, empty),
                ("/add/alice?locale=en-US&tab=Tagged", empty),
            ]),
            ..Default::default()
        };
        let clock = Arc::new(ManualClock::new());
        let (scope, _) = engine(source, clock.clone());

        let found = scope.available_categories(&alice(), Duration::from_secs(5)).await;
        assert_eq!(
            found.into_iter().collect::<Vec<_>>(),
            vec![Category::Profile, Category::Spotlight]
        );
        assert_eq!(scope.tab_state(&alice(), Category::Stories), TabState::Empty);
        // The related page is missing, so that probe failed and stays open.
        assert_eq!(scope.tab_state(&alice(), Category::Related), TabState::Unvalidated);
        assert_eq!(clock.sleeps().len(), 4);
    }

    #[tokio::test]
    async fn test_deadline_returns_profile_only() {
        let source = MemorySource {
            pages: pages(&[(PROFILE, "<html><body><h1>Alice</h1></body></html>")]),
            delay: Duration::from_millis(500),
            ..Default::default()
        };
        let (scope, _) = engine(source, Arc::new(SystemClock));
        let found = scope.available_categories(&alice(), Duration::from_millis(20)).await;
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![Category::Profile]);
    }

    #[tokio::test]
    async fn test_repeat_requests_hit_cache() {
        let source = MemorySource {
            pages: pages(&[(SPOTLIGHT, SPOTLIGHT_PAGE)]),
            ..Default::default()
        };
        let (scope, source) = engine(source, Arc::new(ManualClock::new()));
        scope.fetch_tab(&alice(), Category::Spotlight).await.unwrap();
        scope.fetch_tab(&alice(), Category::Spotlight).await.unwrap();
        // Validation read the page once; both requests were served from cache.
        assert_eq!(source.fetches_of(SPOTLIGHT), 1);
        assert_eq!(scope.cache_stats().hits, 2);
        assert_eq!(scope.tab_state(&alice(), Category::Spotlight), TabState::Available);

        scope.invalidate(&alice(), Category::Spotlight);
        scope.fetch_tab(&alice(), Category::Spotlight).await.unwrap();
        assert_eq!(source.fetches_of(SPOTLIGHT), 2);
    }

    struct TimingOut;

    #[async_trait]
    impl DocumentSource for TimingOut {
        async fn fetch(&self, _resource: &str) -> Result<RawDocument, FetchFailure> {
            Err(FetchFailure::timeout("10s elapsed"))
        }

        async fn probe(&self, _url: &str) -> Result<ProbeOutcome, FetchFailure> {
            Err(FetchFailure::timeout("10s elapsed"))
        }

        fn health(&self) -> ServiceHealth {
            ServiceHealth::Degraded {
                consecutive_timeouts: 3,
            }
        }
    }

    #[tokio::test]
    async fn test_timeouts_surface_as_degraded() {
        let scope = Arc::new(
            ProfileScope::with_source(ScopeConfig::default(), Arc::new(TimingOut), Arc::new(ManualClock::new()))
                .unwrap(),
        );
        let err = scope.fetch_tab(&alice(), Category::Profile).await.unwrap_err();
        assert!(matches!(
            err,
            ScopeError::Degraded {
                consecutive_timeouts: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_resolve_video_rejects_foreign_schemes() {
        let (scope, _) = engine(MemorySource::default(), Arc::new(ManualClock::new()));
        assert!(matches!(
            scope.resolve_video("javascript:alert(1)").await,
            Err(ScopeError::InvalidUrl(_))
        ));
        assert_eq!(
            scope.canonical_target("/spotlight/vid123").unwrap().as_str(),
            "https://www.snapchat.com/spotlight/vid123"
        );
    }
}
