//! profilescope: resilient extraction of profile pages into typed tab content and playable media URLs.

pub mod cache;
pub mod cascade;
pub mod clock;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod normalize;
pub mod resolve;
pub mod schedule;
pub mod types;

pub use cache::{CacheStats, ResponseCache};
pub use cascade::{extract_field, Accessor, ExtractionRule};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ScopeConfig;
pub use document::PageDocument;
pub use engine::{ProfileScope, RequestTracker, TabRequest, Ticket};
pub use error::{FailureKind, FetchFailure, ScopeError, ScopeResult};
pub use fetch::{DocumentSource, HttpFetcher, ProbeOutcome, RawDocument, ServiceHealth};
pub use normalize::Normalizer;
pub use resolve::Resolver;
pub use schedule::{TabState, ValidationQueue};
pub use types::*;
