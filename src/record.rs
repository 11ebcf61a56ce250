//! Extracted records and their identity keys
//!
//! Records have a fixed schema per role. Listing cards must carry a title and
//! a link; detail pages always carry their own URL as the link. Every other
//! configured field lands in `extra`.

use crate::site::{IdentityRule, SiteDefinition, TargetRole, LINK_FIELD};
use crate::url::canonical_url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Why a raw field set could not become a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing mandatory field '{0}'")]
    MissingField(&'static str),

    #[error("link '{0}' is not an absolute URL")]
    InvalidLink(String),

    #[error("no identity could be derived")]
    NoIdentity,
}

/// Deterministic, non-empty deduplication and upsert key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Key for a stored record
    pub fn for_record(site: &str, body: &str) -> Option<Self> {
        Self::namespaced("job", site, body)
    }

    /// Key for a detail link discovered on a listing page
    pub fn for_link(site: &str, url: &Url) -> Self {
        let body = canonical_url(url.as_str())
            .map(|u| u.to_string())
            .unwrap_or_else(|_| url.to_string());
        Self(format!("link:{}:{}", site, body))
    }

    fn namespaced(namespace: &str, site: &str, body: &str) -> Option<Self> {
        let body = body.trim();
        if body.is_empty() {
            None
        } else {
            Some(Self(format!("{}:{}:{}", namespace, site, body)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Field values of one record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFields {
    pub title: String,
    pub link: String,
    pub location: String,
    pub description: String,
    pub company: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl RecordFields {
    fn from_raw(mut raw: BTreeMap<String, String>) -> Self {
        let mut take = |name: &str| raw.remove(name).unwrap_or_default();
        let title = take("title");
        let link = take(LINK_FIELD);
        let location = take("location");
        let description = take("description");
        let company = take("company");

        Self {
            title,
            link,
            location,
            description,
            company,
            extra: raw,
        }
    }

    /// Looks up a field by its configured name
    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            "title" => Some(&self.title),
            LINK_FIELD => Some(&self.link),
            "location" => Some(&self.location),
            "description" => Some(&self.description),
            "company" => Some(&self.company),
            other => self.extra.get(other).map(String::as_str),
        }
    }
}

/// An extracted record that has not been persisted yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    pub site: String,
    pub role: TargetRole,
    pub identity: IdentityKey,
    pub source_url: Url,
    pub fields: RecordFields,
}

impl CandidateRecord {
    /// Builds a record from one listing card
    ///
    /// Title and link are mandatory; every other field defaults to empty.
    pub fn from_listing(
        site: &SiteDefinition,
        page_url: &Url,
        raw: BTreeMap<String, String>,
    ) -> Result<Self, RecordError> {
        let fields = RecordFields::from_raw(raw);

        if fields.title.is_empty() {
            return Err(RecordError::MissingField("title"));
        }
        if fields.link.is_empty() {
            return Err(RecordError::MissingField("link"));
        }
        if Url::parse(&fields.link).is_err() {
            return Err(RecordError::InvalidLink(fields.link));
        }

        Self::with_identity(site, TargetRole::Listing, page_url, fields)
    }

    /// Builds the single record of a detail page
    pub fn from_detail(
        site: &SiteDefinition,
        page_url: &Url,
        raw: BTreeMap<String, String>,
    ) -> Result<Self, RecordError> {
        let mut fields = RecordFields::from_raw(raw);
        fields.link = page_url.to_string();

        Self::with_identity(site, TargetRole::Detail, page_url, fields)
    }

    fn with_identity(
        site: &SiteDefinition,
        role: TargetRole,
        page_url: &Url,
        fields: RecordFields,
    ) -> Result<Self, RecordError> {
        let identity =
            derive_identity(&site.name, &site.identity, &fields).ok_or(RecordError::NoIdentity)?;

        Ok(Self {
            site: site.name.clone(),
            role,
            identity,
            source_url: page_url.clone(),
            fields,
        })
    }

    /// The record's link as a URL, when it has one
    pub fn link_url(&self) -> Option<Url> {
        Url::parse(&self.fields.link).ok()
    }
}

/// Derives the identity key of a record under a site's identity rule
///
/// Field values are trimmed, lowercased and joined with `|`. A rule whose
/// fields are all empty yields no key.
pub fn derive_identity(site: &str, rule: &IdentityRule, fields: &RecordFields) -> Option<IdentityKey> {
    match rule {
        IdentityRule::Url => {
            let url = canonical_url(&fields.link).ok()?;
            IdentityKey::for_record(site, url.as_str())
        }
        IdentityRule::Fields(names) => {
            let values: Vec<String> = names
                .iter()
                .map(|name| fields.get(name).unwrap_or("").trim().to_lowercase())
                .collect();

            if values.iter().all(|v| v.is_empty()) {
                return None;
            }
            IdentityKey::for_record(site, &values.join("|"))
        }
    }
}
