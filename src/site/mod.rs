//! Site definitions and crawl targets
//!
//! A `SiteDefinition` is built once per configured site at run start and is
//! shared read-only (behind an `Arc`) by every target that belongs to it.

mod target;

pub use target::{CrawlTarget, TargetRole};

use crate::config::{HarvesterConfig, IdentityConfig, PaginationConfig, SiteConfig};
use crate::ConfigError;
use std::collections::BTreeMap;
use url::Url;

/// Selector key that marks one listing card
pub const CARD_FIELD: &str = "job-list";

/// Field that carries the record's link; reads `href` unless told otherwise
pub const LINK_FIELD: &str = "link";

/// Placeholder replaced by the page index in URL-template pagination
pub const PAGE_PLACEHOLDER: &str = "{page}";

/// One selector entry: a CSS selector plus an optional attribute to read
///
/// Written in configuration as `css` or `css@attribute`, e.g. `a.apply@href`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelector {
    pub css: String,
    pub attr: Option<String>,
}

impl FieldSelector {
    /// Parses the `css@attribute` notation
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some((css, attr)) = raw.rsplit_once('@') {
            if is_attribute_name(attr) && !css.trim().is_empty() {
                return Self {
                    css: css.trim().to_string(),
                    attr: Some(attr.to_string()),
                };
            }
        }

        Self {
            css: raw.to_string(),
            attr: None,
        }
    }
}

fn is_attribute_name(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
}

/// Field name to ordered selector list; the first selector that yields a
/// non-empty value wins
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorMap {
    /// Selector matching one listing card (listing maps only)
    pub card: Option<String>,

    /// Per-field selectors, tried in order
    pub fields: BTreeMap<String, Vec<FieldSelector>>,
}

impl SelectorMap {
    /// Builds a selector map from configured field -> selector lists
    ///
    /// The `job-list` entry is lifted out as the card selector.
    pub fn from_entries(entries: &BTreeMap<String, Vec<String>>) -> Self {
        let mut map = SelectorMap::default();

        for (field, selectors) in entries {
            if field == CARD_FIELD {
                map.card = selectors.first().map(|s| s.trim().to_string());
                continue;
            }

            let parsed = selectors
                .iter()
                .filter(|s| !s.trim().is_empty())
                .map(|s| FieldSelector::parse(s))
                .collect();
            map.fields.insert(field.clone(), parsed);
        }

        map
    }

    pub fn get(&self, field: &str) -> Option<&[FieldSelector]> {
        self.fields.get(field).map(Vec::as_slice)
    }
}

/// How a site's listing loop finds its next page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationRule {
    /// Single listing page
    None,

    /// Follow the link under this selector
    NextSelector(FieldSelector),

    /// Substitute an increasing page index into a URL template
    UrlTemplate { template: String, start: u32 },
}

impl PaginationRule {
    /// Renders the template URL for a page index
    pub fn page_url(&self, index: u32) -> Option<Url> {
        match self {
            Self::UrlTemplate { template, .. } => {
                Url::parse(&template.replace(PAGE_PLACEHOLDER, &index.to_string())).ok()
            }
            _ => None,
        }
    }

    /// Index of the first listing page
    pub fn start_index(&self) -> u32 {
        match self {
            Self::UrlTemplate { start, .. } => *start,
            _ => 0,
        }
    }
}

/// Which stable fields make up a record's identity key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityRule {
    /// Canonical form of the record's link
    Url,

    /// Named field values, in order
    Fields(Vec<String>),
}

/// Immutable per-site configuration
#[derive(Debug, Clone)]
pub struct SiteDefinition {
    pub name: String,
    pub base_url: Url,
    pub listing: SelectorMap,

    /// Present when listing cards should be followed to detail pages
    pub detail: Option<SelectorMap>,

    pub pagination: PaginationRule,
    pub js_required: bool,
    pub wait_for: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub max_pages: u32,
    pub identity: IdentityRule,
}

impl SiteDefinition {
    /// Builds a site definition from its validated configuration entry
    pub fn from_config(config: &SiteConfig, defaults: &HarvesterConfig) -> Result<Self, ConfigError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("site '{}' base-url: {}", config.name, e))
        })?;

        let listing = SelectorMap::from_entries(&config.selector_entries());
        let detail = if config.follow_details {
            Some(SelectorMap::from_entries(&config.detail_selector_entries()))
        } else {
            None
        };

        let pagination = match &config.pagination {
            None => PaginationRule::None,
            Some(PaginationConfig {
                next_selector: Some(selector),
                ..
            }) => PaginationRule::NextSelector(FieldSelector::parse(selector)),
            Some(PaginationConfig {
                url_template: Some(template),
                start,
                ..
            }) => PaginationRule::UrlTemplate {
                template: template.clone(),
                start: *start,
            },
            Some(_) => PaginationRule::None,
        };

        let identity = match &config.identity {
            Some(IdentityConfig::Url(_)) => IdentityRule::Url,
            Some(IdentityConfig::Fields(fields)) => IdentityRule::Fields(fields.clone()),
            None if config.follow_details => IdentityRule::Url,
            None => IdentityRule::Fields(vec!["title".to_string(), "location".to_string()]),
        };

        Ok(Self {
            name: config.name.clone(),
            base_url,
            listing,
            detail,
            pagination,
            js_required: config.js_required,
            wait_for: config.wait_for.clone(),
            headers: config.headers.clone(),
            max_pages: config.max_pages.unwrap_or(defaults.default_max_pages),
            identity,
        })
    }

    /// Whether listing cards are followed to detail pages
    pub fn follows_details(&self) -> bool {
        self.detail.is_some()
    }

    /// URL of the first listing page
    pub fn first_page_url(&self) -> Url {
        self.pagination
            .page_url(self.pagination.start_index())
            .unwrap_or_else(|| self.base_url.clone())
    }

    /// Selector map used for a given role
    pub fn selectors_for(&self, role: TargetRole) -> &SelectorMap {
        match role {
            TargetRole::Listing => &self.listing,
            TargetRole::Detail => self.detail.as_ref().unwrap_or(&self.listing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_selector_plain() {
        let selector = FieldSelector::parse(" h2.title ");
        assert_eq!(selector.css, "h2.title");
        assert_eq!(selector.attr, None);
    }

    #[test]
    fn test_field_selector_with_attribute() {
        let selector = FieldSelector::parse("a.apply@data-href");
        assert_eq!(selector.css, "a.apply");
        assert_eq!(selector.attr.as_deref(), Some("data-href"));
    }

    #[test]
    fn test_field_selector_keeps_at_inside_attribute_match() {
        let selector = FieldSelector::parse(r#"a[href*="@"]"#);
        assert_eq!(selector.css, r#"a[href*="@"]"#);
        assert_eq!(selector.attr, None);
    }

    #[test]
    fn test_selector_map_lifts_card_selector() {
        let mut entries = BTreeMap::new();
        entries.insert("job-list".to_string(), vec![".card".to_string()]);
        entries.insert(
            "location".to_string(),
            vec![".loc".to_string(), "#where".to_string()],
        );

        let map = SelectorMap::from_entries(&entries);
        assert_eq!(map.card.as_deref(), Some(".card"));
        assert!(map.get("job-list").is_none());
        assert_eq!(map.get("location").map(|s| s.len()), Some(2));
    }

    #[test]
    fn test_template_page_url() {
        let rule = PaginationRule::UrlTemplate {
            template: "https://example.com/jobs?pg={page}&size=20".to_string(),
            start: 1,
        };
        assert_eq!(rule.start_index(), 1);
        assert_eq!(
            rule.page_url(3).unwrap().as_str(),
            "https://example.com/jobs?pg=3&size=20"
        );
    }

    #[test]
    fn test_selector_pagination_has_no_template_url() {
        let rule = PaginationRule::NextSelector(FieldSelector::parse(".next"));
        assert!(rule.page_url(2).is_none());
        assert_eq!(rule.start_index(), 0);
    }
}
