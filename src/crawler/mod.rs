//! Crawler module for fetching, extracting and gating job records
//!
//! This module contains the core harvesting pipeline, including:
//! - HTTP and rendered fetching with retry, backoff and jitter
//! - Selector-driven record extraction with fallbacks
//! - Global and per-site rate limiting
//! - The deduplication gate in front of the sink
//! - Overall crawl orchestration with a bounded worker pool

mod coordinator;
mod dedup;
mod extractor;
mod fetcher;
mod limiter;
mod render;

pub use coordinator::{CrawlOrchestrator, OrchestratorSettings};
pub use dedup::{Deduplicator, DEFAULT_SEEN_TTL};
pub use extractor::{Extraction, ExtractionError, Extractor, SelectorExtractor};
pub use fetcher::{
    build_http_client, Backoff, FetchError, FetchRequest, Fetcher, HttpTransport, PageContent,
    RetryPolicy, RetryingFetcher, Transport, UserAgentPool, DEFAULT_USER_AGENT,
};
pub use limiter::{AcquireError, RateLimiter, RatePermit};
pub use render::{RenderError, RenderTransport, RenderedPage, Renderer};
