use crate::site::SiteDefinition;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Which kind of page a target points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetRole {
    /// A listing page holding many cards and maybe a "next" link
    Listing,

    /// A single record's own page
    Detail,
}

impl TargetRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::Detail => "detail",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "listing" => Some(Self::Listing),
            "detail" => Some(Self::Detail),
            _ => None,
        }
    }
}

impl fmt::Display for TargetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of fetch work
///
/// Targets are never mutated after creation. Retries reuse the same value
/// and count attempts alongside it.
#[derive(Debug, Clone)]
pub struct CrawlTarget {
    pub url: Url,
    pub site: Arc<SiteDefinition>,
    pub role: TargetRole,
}

impl CrawlTarget {
    pub fn listing(url: Url, site: Arc<SiteDefinition>) -> Self {
        Self {
            url,
            site,
            role: TargetRole::Listing,
        }
    }

    pub fn detail(url: Url, site: Arc<SiteDefinition>) -> Self {
        Self {
            url,
            site,
            role: TargetRole::Detail,
        }
    }

    pub fn site_name(&self) -> &str {
        &self.site.name
    }
}

impl fmt::Display for CrawlTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.site.name, self.role, self.url)
    }
}
