use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for the harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub harvester: HarvesterConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(rename = "site", default)]
    pub sites: Vec<SiteConfig>,
}

/// Pipeline-wide tuning: worker pool, pacing, retries and expiry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HarvesterConfig {
    /// Maximum number of fetches in flight across all sites
    pub workers: u32,

    /// Lower bound of the randomized per-site spacing (milliseconds)
    pub min_delay_ms: u64,

    /// Upper bound of the randomized per-site spacing (milliseconds)
    pub max_delay_ms: u64,

    /// Attempts per target before it is marked failed
    pub max_attempts: u32,

    /// First backoff delay; doubles per attempt (milliseconds)
    pub backoff_base_ms: u64,

    /// Backoff cap (milliseconds)
    pub backoff_max_ms: u64,

    pub http_timeout_secs: u64,
    pub render_timeout_secs: u64,

    /// How long an identity stays in the seen-set
    pub seen_ttl_days: u32,

    /// Listing page ceiling for sites that do not set `max-pages`
    pub default_max_pages: u32,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            min_delay_ms: 1000,
            max_delay_ms: 3000,
            max_attempts: 3,
            backoff_base_ms: 4000,
            backoff_max_ms: 10000,
            http_timeout_secs: 10,
            render_timeout_secs: 90,
            seen_ttl_days: 30,
            default_max_pages: 50,
        }
    }
}

/// User agent strings rotated per fetch attempt
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    pub agents: Vec<String>,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            agents: vec![crate::crawler::DEFAULT_USER_AGENT.to_string()],
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// One selector or an ordered list of fallbacks
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SelectorList {
    One(String),
    Many(Vec<String>),
}

impl SelectorList {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(selector) => vec![selector.clone()],
            Self::Many(selectors) => selectors.clone(),
        }
    }
}

/// Identity configuration: the string `"url"` or a list of field names
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum IdentityConfig {
    Url(String),
    Fields(Vec<String>),
}

/// Pagination configuration; exactly one of the two modes is set
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct PaginationConfig {
    /// Selector for the "next page" control
    pub next_selector: Option<String>,

    /// URL containing a `{page}` placeholder
    pub url_template: Option<String>,

    /// First page index for the template
    #[serde(default = "default_start_page")]
    pub start: u32,
}

fn default_start_page() -> u32 {
    1
}

/// One `[[site]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SiteConfig {
    pub name: String,
    pub base_url: String,

    #[serde(default)]
    pub js_required: bool,

    /// Selector the rendered page must show before content is read
    pub wait_for: Option<String>,

    pub max_pages: Option<u32>,

    #[serde(default)]
    pub follow_details: bool,

    pub identity: Option<IdentityConfig>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    pub selectors: BTreeMap<String, SelectorList>,

    pub detail_selectors: Option<BTreeMap<String, SelectorList>>,

    pub pagination: Option<PaginationConfig>,
}

impl SiteConfig {
    /// Listing selectors with every entry expanded to a list
    pub fn selector_entries(&self) -> BTreeMap<String, Vec<String>> {
        expand(&self.selectors)
    }

    /// Detail selectors with every entry expanded to a list
    pub fn detail_selector_entries(&self) -> BTreeMap<String, Vec<String>> {
        self.detail_selectors
            .as_ref()
            .map(expand)
            .unwrap_or_default()
    }
}

fn expand(map: &BTreeMap<String, SelectorList>) -> BTreeMap<String, Vec<String>> {
    map.iter()
        .map(|(field, list)| (field.clone(), list.to_vec()))
        .collect()
}
