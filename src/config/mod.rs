//! Configuration module for the harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use job_harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Harvesting {} sites with {} workers", config.sites.len(), config.harvester.workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, HarvesterConfig, IdentityConfig, OutputConfig, PaginationConfig, SelectorList,
    SiteConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};

use crate::site::SiteDefinition;
use crate::ConfigResult;
use std::sync::Arc;

impl Config {
    /// Builds the immutable site definitions shared by the run
    pub fn site_definitions(&self) -> ConfigResult<Vec<Arc<SiteDefinition>>> {
        self.sites
            .iter()
            .map(|site| SiteDefinition::from_config(site, &self.harvester).map(Arc::new))
            .collect()
    }
}
