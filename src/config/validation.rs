use crate::config::types::{
    Config, HarvesterConfig, IdentityConfig, OutputConfig, PaginationConfig, SiteConfig,
    UserAgentConfig,
};
use crate::site::{FieldSelector, CARD_FIELD, LINK_FIELD, PAGE_PLACEHOLDER};
use crate::ConfigError;
use reqwest::header::{HeaderName, HeaderValue};
use scraper::Selector;
use std::collections::{BTreeMap, HashSet};
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_harvester_config(&config.harvester)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_sites(&config.sites)?;
    Ok(())
}

/// Validates pipeline tuning
fn validate_harvester_config(config: &HarvesterConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 100 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 100, got {}",
            config.workers
        )));
    }

    if config.min_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "min-delay-ms ({}) must not exceed max-delay-ms ({})",
            config.min_delay_ms, config.max_delay_ms
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max-attempts must be >= 1".to_string(),
        ));
    }

    if config.backoff_base_ms == 0 || config.backoff_base_ms > config.backoff_max_ms {
        return Err(ConfigError::Validation(format!(
            "backoff-base-ms must be > 0 and <= backoff-max-ms, got {} / {}",
            config.backoff_base_ms, config.backoff_max_ms
        )));
    }

    if config.http_timeout_secs < 1 || config.render_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "fetch timeouts must be at least 1 second".to_string(),
        ));
    }

    if config.seen_ttl_days < 1 {
        return Err(ConfigError::Validation(
            "seen-ttl-days must be >= 1".to_string(),
        ));
    }

    if config.default_max_pages < 1 {
        return Err(ConfigError::Validation(
            "default-max-pages must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates the user agent pool
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.agents.is_empty() {
        return Err(ConfigError::Validation(
            "user-agent.agents must list at least one agent".to_string(),
        ));
    }

    for agent in &config.agents {
        if agent.trim().is_empty() {
            return Err(ConfigError::Validation(
                "user-agent.agents cannot contain empty strings".to_string(),
            ));
        }
        if HeaderValue::from_str(agent).is_err() {
            return Err(ConfigError::Validation(format!(
                "user agent '{}' is not a valid header value",
                agent
            )));
        }
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates every `[[site]]` entry and their names
fn validate_sites(sites: &[SiteConfig]) -> Result<(), ConfigError> {
    if sites.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[site]] must be configured".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for site in sites {
        validate_site_name(&site.name)?;
        if !names.insert(site.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate site name '{}'",
                site.name
            )));
        }
        validate_site(site)?;
    }

    Ok(())
}

fn validate_site_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "site name cannot be empty".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "site name must contain only alphanumeric characters, '-' and '_', got '{}'",
            name
        )));
    }

    Ok(())
}

fn validate_site(site: &SiteConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&site.base_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("site '{}' base-url '{}': {}", site.name, site.base_url, e))
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "site '{}' base-url must be http or https",
            site.name
        )));
    }

    let listing = site.selector_entries();
    for required in [CARD_FIELD, "title", LINK_FIELD] {
        if listing.get(required).map_or(true, |list| list.is_empty()) {
            return Err(ConfigError::Validation(format!(
                "site '{}' selectors must define '{}'",
                site.name, required
            )));
        }
    }
    validate_selector_entries(&site.name, &listing)?;

    match (site.follow_details, &site.detail_selectors) {
        (true, None) => {
            return Err(ConfigError::Validation(format!(
                "site '{}' sets follow-details but has no [site.detail-selectors]",
                site.name
            )));
        }
        (false, Some(_)) => {
            return Err(ConfigError::Validation(format!(
                "site '{}' has detail-selectors but follow-details is false",
                site.name
            )));
        }
        (true, Some(_)) => {
            let detail = site.detail_selector_entries();
            if detail.get("title").map_or(true, |list| list.is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "site '{}' detail-selectors must define 'title'",
                    site.name
                )));
            }
            validate_selector_entries(&site.name, &detail)?;
        }
        (false, None) => {}
    }

    if let Some(pagination) = &site.pagination {
        validate_pagination(&site.name, pagination)?;
    }

    if let Some(IdentityConfig::Url(value)) = &site.identity {
        if value != "url" {
            return Err(ConfigError::Validation(format!(
                "site '{}' identity must be \"url\" or a list of fields, got \"{}\"",
                site.name, value
            )));
        }
    }
    if let Some(IdentityConfig::Fields(fields)) = &site.identity {
        if fields.is_empty() || fields.iter().any(|f| f.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "site '{}' identity fields cannot be empty",
                site.name
            )));
        }
    }

    for (name, value) in &site.headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err()
            || HeaderValue::from_str(value).is_err()
        {
            return Err(ConfigError::Validation(format!(
                "site '{}' has an invalid header '{}'",
                site.name, name
            )));
        }
    }

    if let Some(wait_for) = &site.wait_for {
        validate_css(&site.name, wait_for)?;
    }

    if site.max_pages == Some(0) {
        return Err(ConfigError::Validation(format!(
            "site '{}' max-pages must be >= 1",
            site.name
        )));
    }

    Ok(())
}

fn validate_selector_entries(
    site: &str,
    entries: &BTreeMap<String, Vec<String>>,
) -> Result<(), ConfigError> {
    for (field, selectors) in entries {
        for raw in selectors {
            if field == CARD_FIELD {
                validate_css(site, raw)?;
            } else {
                validate_css(site, &FieldSelector::parse(raw).css)?;
            }
        }
    }
    Ok(())
}

fn validate_pagination(site: &str, pagination: &PaginationConfig) -> Result<(), ConfigError> {
    match (&pagination.next_selector, &pagination.url_template) {
        (Some(selector), None) => validate_css(site, &FieldSelector::parse(selector).css),
        (None, Some(template)) => {
            if !template.contains(PAGE_PLACEHOLDER) {
                return Err(ConfigError::Validation(format!(
                    "site '{}' url-template must contain {}",
                    site, PAGE_PLACEHOLDER
                )));
            }
            let sample = template.replace(PAGE_PLACEHOLDER, &pagination.start.to_string());
            Url::parse(&sample).map_err(|e| {
                ConfigError::InvalidUrl(format!("site '{}' url-template: {}", site, e))
            })?;
            Ok(())
        }
        _ => Err(ConfigError::Validation(format!(
            "site '{}' pagination must set exactly one of next-selector or url-template",
            site
        ))),
    }
}

/// Checks that a CSS selector parses
fn validate_css(site: &str, css: &str) -> Result<(), ConfigError> {
    if css.trim().is_empty() {
        return Err(ConfigError::InvalidSelector(format!(
            "site '{}' has an empty selector",
            site
        )));
    }

    Selector::parse(css)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector(format!("site '{}' '{}': {:?}", site, css, e)))
}
