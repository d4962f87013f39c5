//! Video URL resolver.
//!
//! Runs a fixed chain of strategies over one canonical content page. The
//! first strategy whose candidate passes validation wins and the rest are
//! never invoked. Exhausting the chain yields `None`; callers fall back to
//! the tile thumbnail.

pub mod manifest;
pub mod media;
pub mod snapshot;
pub mod strategies;

pub use snapshot::MediaSnapshot;
pub use strategies::{default_strategies, Candidate, ResolveContext, ResolveStrategy};

use crate::fetch::DocumentSource;
use crate::types::VideoResolution;
use manifest::ManifestKind;
use std::sync::Arc;

/// Unconfirmed candidates probed per strategy before moving on.
const MAX_PROBES_PER_STRATEGY: usize = 4;

pub struct Resolver {
    source: Arc<dyn DocumentSource>,
    strategies: Vec<Box<dyn ResolveStrategy>>,
    cdn_templates: Vec<String>,
}

impl Resolver {
    pub fn new(source: Arc<dyn DocumentSource>, cdn_templates: Vec<String>) -> Self {
        Self::with_strategies(source, default_strategies(), cdn_templates)
    }

    /// A resolver running `strategies` in the given order.
    pub fn with_strategies(
        source: Arc<dyn DocumentSource>,
        strategies: Vec<Box<dyn ResolveStrategy>>,
        cdn_templates: Vec<String>,
    ) -> Self {
        Self {
            source,
            strategies,
            cdn_templates,
        }
    }

    /// Fetch `canonical_url` once and run the chain over it. A failed fetch
    /// leaves an empty page; URL-only strategies still run.
    pub async fn resolve(&self, canonical_url: &str) -> Option<VideoResolution> {
        let snapshot = match self.source.fetch(canonical_url).await {
            Ok(raw) => MediaSnapshot::from_body(canonical_url, &raw.body),
            Err(e) => {
                tracing::warn!("resolve {canonical_url}: page unavailable: {e}");
                MediaSnapshot::empty(canonical_url)
            }
        };
        self.resolve_snapshot(canonical_url, &snapshot).await
    }

    /// Run the chain over an already captured page.
    pub async fn resolve_snapshot(
        &self,
        canonical_url: &str,
        snapshot: &MediaSnapshot,
    ) -> Option<VideoResolution> {
        let ctx = ResolveContext {
            canonical_url,
            snapshot,
            source: self.source.as_ref(),
            cdn_templates: &self.cdn_templates,
        };

        for strategy in &self.strategies {
            let candidates = strategy.candidates(&ctx).await;
            if candidates.is_empty() {
                tracing::debug!("strategy {} ({}) found nothing", strategy.index(), strategy.name());
                continue;
            }
            if let Some(url) = self.first_valid(&ctx, candidates).await {
                tracing::info!(
                    "resolved {canonical_url} via strategy {} ({}): {url}",
                    strategy.index(),
                    strategy.name()
                );
                return Some(VideoResolution {
                    url,
                    strategy_index: strategy.index(),
                    confidence: strategy.confidence(),
                });
            }
            tracing::debug!(
                "strategy {} ({}): no candidate passed validation",
                strategy.index(),
                strategy.name()
            );
        }

        tracing::info!("resolve {canonical_url}: all strategies exhausted");
        None
    }

    /// A candidate is valid when already verified, when it carries a video
    /// extension, or when a probe reports video content. Unverified manifest
    /// URLs are skipped so the streaming strategy can read them down to a
    /// segment.
    async fn first_valid(&self, ctx: &ResolveContext<'_>, candidates: Vec<Candidate>) -> Option<String> {
        let mut probes = 0;
        for candidate in candidates {
            if candidate.verified {
                return Some(candidate.url);
            }
            if ManifestKind::of(&candidate.url).is_some() {
                tracing::debug!("{}: manifest, left for the streaming strategy", candidate.url);
                continue;
            }
            if media::has_video_extension(&candidate.url) {
                return Some(candidate.url);
            }
            if probes >= MAX_PROBES_PER_STRATEGY {
                continue;
            }
            probes += 1;
            if ctx.confirm(&candidate.url).await {
                return Some(candidate.url);
            }
        }
        None
    }
}
