//! Job Harvester: a polite harvester for paginated job listings
//!
//! This crate walks listing pages described by per-site selector maps, follows
//! detail links across a bounded worker pool, deduplicates every record
//! against a seen-set with expiry, and upserts each unique record exactly once.

pub mod config;
pub mod crawler;
pub mod output;
pub mod record;
pub mod site;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Errors raised while driving a target through the pipeline
///
/// Fetch, extraction and store failures are folded into per-target outcomes;
/// only a broken state machine escapes as an error.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Invalid target transition: {from} -> {to}")]
    InvalidTransition {
        from: state::TargetState,
        to: state::TargetState,
    },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector in config: {0}")]
    InvalidSelector(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::CrawlOrchestrator;
pub use output::{RunOutcome, SiteOutcome};
pub use record::{CandidateRecord, IdentityKey};
pub use site::{CrawlTarget, SiteDefinition, TargetRole};
