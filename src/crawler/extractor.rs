//! Selector-driven record extraction
//!
//! Turns a fetched page into candidate records plus, for listing pages, the
//! next pagination link. Every field has an ordered selector list; the
//! first selector that yields a non-empty value wins. A card that fails to
//! become a record is dropped and logged without affecting its siblings.

use crate::crawler::fetcher::PageContent;
use crate::record::{CandidateRecord, RecordError};
use crate::site::{CrawlTarget, FieldSelector, PaginationRule, SelectorMap, TargetRole, LINK_FIELD};
use crate::url::resolve_link;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

/// Why part of a page produced no record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("invalid selector '{0}'")]
    InvalidSelector(String),

    #[error("page has no element matching '{0}'")]
    NoCards(String),

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Everything pulled out of one page
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub records: Vec<CandidateRecord>,

    /// Next listing page, when pagination follows a "next" control
    pub next_page: Option<Url>,

    /// Card elements matched on a listing page
    pub cards_seen: usize,

    /// Cards or fields that could not be turned into records
    pub dropped: Vec<ExtractionError>,
}

/// Extracts records from fetched page content
pub trait Extractor: Send + Sync {
    fn extract(&self, page: &PageContent, target: &CrawlTarget) -> Extraction;
}

/// Extractor driven by a site's selector maps
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorExtractor;

impl SelectorExtractor {
    pub fn new() -> Self {
        Self
    }
}

struct CompiledField {
    selector: Selector,
    attr: Option<String>,
}

impl Extractor for SelectorExtractor {
    fn extract(&self, page: &PageContent, target: &CrawlTarget) -> Extraction {
        let document = Html::parse_document(&page.body);
        let base = document_base(&document, &page.url);
        let site = &target.site;
        let selectors = site.selectors_for(target.role);

        let mut extraction = Extraction::default();
        let fields = compile_fields(selectors, &mut extraction.dropped);

        match target.role {
            TargetRole::Listing => {
                extract_cards(&document, &base, target, selectors, &fields, &mut extraction);
                if let PaginationRule::NextSelector(next) = &site.pagination {
                    extraction.next_page = find_next_page(&document, &base, next, &page.url);
                }
            }
            TargetRole::Detail => {
                let raw = read_fields(document.root_element(), &fields, &base);
                match CandidateRecord::from_detail(site, &page.url, raw) {
                    Ok(record) => extraction.records.push(record),
                    Err(e) => {
                        tracing::warn!("No record on detail page {}: {}", page.url, e);
                        extraction.dropped.push(e.into());
                    }
                }
            }
        }

        extraction
    }
}

fn extract_cards(
    document: &Html,
    base: &Url,
    target: &CrawlTarget,
    selectors: &SelectorMap,
    fields: &BTreeMap<String, Vec<CompiledField>>,
    extraction: &mut Extraction,
) {
    let Some(card_css) = selectors.card.as_deref() else {
        extraction
            .dropped
            .push(ExtractionError::InvalidSelector("<missing card selector>".to_string()));
        return;
    };

    let card_selector = match Selector::parse(card_css) {
        Ok(selector) => selector,
        Err(e) => {
            tracing::warn!("Invalid card selector '{}': {:?}", card_css, e);
            extraction
                .dropped
                .push(ExtractionError::InvalidSelector(card_css.to_string()));
            return;
        }
    };

    for (index, card) in document.select(&card_selector).enumerate() {
        extraction.cards_seen += 1;
        let raw = read_fields(card, fields, base);

        match CandidateRecord::from_listing(&target.site, &target.url, raw) {
            Ok(record) => extraction.records.push(record),
            Err(e) => {
                tracing::debug!("Dropping card {} on {}: {}", index, target.url, e);
                extraction.dropped.push(e.into());
            }
        }
    }

    if extraction.cards_seen == 0 {
        tracing::debug!("No cards matching '{}' on {}", card_css, target.url);
        extraction
            .dropped
            .push(ExtractionError::NoCards(card_css.to_string()));
    }
}

fn compile_fields(
    selectors: &SelectorMap,
    errors: &mut Vec<ExtractionError>,
) -> BTreeMap<String, Vec<CompiledField>> {
    let mut compiled = BTreeMap::new();

    for (field, list) in &selectors.fields {
        let mut entries = Vec::with_capacity(list.len());
        for entry in list {
            match Selector::parse(&entry.css) {
                Ok(selector) => entries.push(CompiledField {
                    selector,
                    attr: entry
                        .attr
                        .clone()
                        .or_else(|| (field == LINK_FIELD).then(|| "href".to_string())),
                }),
                Err(e) => {
                    tracing::warn!("Skipping invalid selector '{}' for {}: {:?}", entry.css, field, e);
                    errors.push(ExtractionError::InvalidSelector(entry.css.clone()));
                }
            }
        }
        compiled.insert(field.clone(), entries);
    }

    compiled
}

/// Reads every configured field within `scope`; missing fields become ""
fn read_fields(
    scope: ElementRef<'_>,
    fields: &BTreeMap<String, Vec<CompiledField>>,
    base: &Url,
) -> BTreeMap<String, String> {
    fields
        .iter()
        .map(|(name, selectors)| {
            let value = selectors
                .iter()
                .find_map(|compiled| read_one(scope, compiled, name == LINK_FIELD, base))
                .unwrap_or_default();
            (name.clone(), value)
        })
        .collect()
}

fn read_one(
    scope: ElementRef<'_>,
    compiled: &CompiledField,
    is_link: bool,
    base: &Url,
) -> Option<String> {
    let candidates = scope.select(&compiled.selector).chain(
        compiled
            .selector
            .matches(&scope)
            .then_some(scope),
    );

    for element in candidates {
        let value = match &compiled.attr {
            Some(attr) => element.value().attr(attr).map(str::to_string),
            None => Some(element_text(element)),
        };

        let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) else {
            continue;
        };

        if is_link {
            if let Some(url) = resolve_link(&value, base) {
                return Some(url.to_string());
            }
            continue;
        }
        return Some(value);
    }

    None
}

/// Text content with whitespace runs collapsed to single spaces
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Honors `<base href>` when the page declares one
fn document_base(document: &Html, page_url: &Url) -> Url {
    let Ok(selector) = Selector::parse("base[href]") else {
        return page_url.clone();
    };

    document
        .select(&selector)
        .next()
        .and_then(|base| base.value().attr("href"))
        .and_then(|href| resolve_link(href, page_url))
        .unwrap_or_else(|| page_url.clone())
}

fn find_next_page(
    document: &Html,
    base: &Url,
    next: &FieldSelector,
    page_url: &Url,
) -> Option<Url> {
    let selector = match Selector::parse(&next.css) {
        Ok(selector) => selector,
        Err(e) => {
            tracing::warn!("Invalid next-page selector '{}': {:?}", next.css, e);
            return None;
        }
    };
    let attr = next.attr.as_deref().unwrap_or("href");

    document
        .select(&selector)
        .filter_map(|element| element.value().attr(attr))
        .find_map(|href| resolve_link(href, base))
        .filter(|url| url != page_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::{IdentityRule, SiteDefinition};
    use std::sync::Arc;

    fn entries(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(field, list)| {
                (
                    field.to_string(),
                    list.iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect()
    }

    fn listing_site(pagination: PaginationRule) -> Arc<SiteDefinition> {
        Arc::new(SiteDefinition {
            name: "acme".to_string(),
            base_url: Url::parse("https://jobs.acme.example/search").unwrap(),
            listing: SelectorMap::from_entries(&entries(&[
                ("job-list", &[".card"]),
                ("title", &["h2"]),
                ("link", &["a"]),
                ("location", &[".missing", ".loc"]),
            ])),
            detail: None,
            pagination,
            js_required: false,
            wait_for: None,
            headers: BTreeMap::new(),
            max_pages: 10,
            identity: IdentityRule::Fields(vec!["title".to_string(), "location".to_string()]),
        })
    }

    fn page(url: &str, body: &str) -> PageContent {
        PageContent {
            url: Url::parse(url).unwrap(),
            status: 200,
            body: body.to_string(),
        }
    }

    fn listing_target(site: Arc<SiteDefinition>) -> CrawlTarget {
        CrawlTarget::listing(Url::parse("https://jobs.acme.example/search").unwrap(), site)
    }

    #[test]
    fn test_card_missing_title_is_dropped() {
        let body = r#"
            <div class="card"><h2>Backend Engineer</h2><a href="/jobs/1">View</a></div>
            <div class="card"><a href="/jobs/2">View</a></div>
        "#;
        let target = listing_target(listing_site(PaginationRule::None));
        let extraction = SelectorExtractor::new()
            .extract(&page("https://jobs.acme.example/search", body), &target);

        assert_eq!(extraction.cards_seen, 2);
        assert_eq!(extraction.records.len(), 1);
        assert_eq!(extraction.records[0].fields.title, "Backend Engineer");
        assert_eq!(
            extraction.records[0].fields.link,
            "https://jobs.acme.example/jobs/1"
        );
        assert_eq!(
            extraction.dropped,
            vec![ExtractionError::Record(RecordError::MissingField("title"))]
        );
    }

    #[test]
    fn test_selector_fallback_takes_first_non_empty() {
        let body = r#"<div class="card"><h2>Designer</h2><a href="/j/3">x</a><span class="loc"> Remote </span></div>"#;
        let target = listing_target(listing_site(PaginationRule::None));
        let extraction = SelectorExtractor::new()
            .extract(&page("https://jobs.acme.example/search", body), &target);

        assert_eq!(extraction.records[0].fields.location, "Remote");
    }

    #[test]
    fn test_missing_optional_field_is_empty() {
        let body = r#"<div class="card"><h2>Designer</h2><a href="/j/3">x</a></div>"#;
        let target = listing_target(listing_site(PaginationRule::None));
        let extraction = SelectorExtractor::new()
            .extract(&page("https://jobs.acme.example/search", body), &target);

        assert_eq!(extraction.records.len(), 1);
        assert_eq!(extraction.records[0].fields.location, "");
        assert_eq!(extraction.records[0].fields.company, "");
    }

    #[test]
    fn test_text_whitespace_is_collapsed() {
        let body = "<div class=\"card\"><h2>\n  Senior\n   <b>Data</b>  Engineer </h2><a href=\"/j\">x</a></div>";
        let target = listing_target(listing_site(PaginationRule::None));
        let extraction = SelectorExtractor::new()
            .extract(&page("https://jobs.acme.example/search", body), &target);

        assert_eq!(extraction.records[0].fields.title, "Senior Data Engineer");
    }

    #[test]
    fn test_next_page_resolved_against_base_href() {
        let body = r#"
            <html><head><base href="https://cdn.acme.example/list/"></head>
            <body><a class="next" href="page-2">Next</a></body></html>
        "#;
        let site = listing_site(PaginationRule::NextSelector(FieldSelector::parse("a.next")));
        let extraction = SelectorExtractor::new()
            .extract(&page("https://jobs.acme.example/search", body), &listing_target(site));

        assert_eq!(
            extraction.next_page.unwrap().as_str(),
            "https://cdn.acme.example/list/page-2"
        );
    }

    #[test]
    fn test_no_next_link_ends_pagination() {
        let body = r#"<div class="card"><h2>A</h2><a href="/1">x</a></div><a class="next" href="javascript:void(0)">Next</a>"#;
        let site = listing_site(PaginationRule::NextSelector(FieldSelector::parse("a.next")));
        let extraction = SelectorExtractor::new()
            .extract(&page("https://jobs.acme.example/search", body), &listing_target(site));

        assert!(extraction.next_page.is_none());
    }

    #[test]
    fn test_card_that_is_itself_the_link() {
        let mut site = (*listing_site(PaginationRule::None)).clone();
        site.listing = SelectorMap::from_entries(&entries(&[
            ("job-list", &["a.card"]),
            ("title", &[".t"]),
            ("link", &["a.card"]),
        ]));
        let body = r#"<a class="card" href="/jobs/5"><span class="t">QA</span></a>"#;
        let extraction = SelectorExtractor::new().extract(
            &page("https://jobs.acme.example/search", body),
            &listing_target(Arc::new(site)),
        );

        assert_eq!(extraction.records[0].fields.link, "https://jobs.acme.example/jobs/5");
    }

    #[test]
    fn test_attribute_selector() {
        let mut site = (*listing_site(PaginationRule::None)).clone();
        site.listing = SelectorMap::from_entries(&entries(&[
            ("job-list", &["li"]),
            ("title", &["h3"]),
            ("link", &["button@data-url"]),
            ("company", &["@ignored", "img@alt"]),
        ]));
        let body = r#"<ul><li><h3>Ops</h3><button data-url="/o/1">Apply</button><img alt="Acme Corp"></li></ul>"#;
        let extraction = SelectorExtractor::new().extract(
            &page("https://jobs.acme.example/search", body),
            &listing_target(Arc::new(site)),
        );

        let record = &extraction.records[0];
        assert_eq!(record.fields.link, "https://jobs.acme.example/o/1");
        assert_eq!(record.fields.company, "Acme Corp");
    }

    #[test]
    fn test_detail_page_yields_one_record() {
        let mut site = (*listing_site(PaginationRule::None)).clone();
        site.detail = Some(SelectorMap::from_entries(&entries(&[
            ("title", &["h1"]),
            ("description", &[".body"]),
        ])));
        site.identity = IdentityRule::Url;
        let target = CrawlTarget::detail(
            Url::parse("https://jobs.acme.example/jobs/9").unwrap(),
            Arc::new(site),
        );
        let body = r#"<h1>Platform Engineer</h1><div class="body">Build things.</div>"#;

        let extraction = SelectorExtractor::new()
            .extract(&page("https://jobs.acme.example/jobs/9", body), &target);

        assert_eq!(extraction.records.len(), 1);
        let record = &extraction.records[0];
        assert_eq!(record.role, TargetRole::Detail);
        assert_eq!(record.fields.description, "Build things.");
        assert_eq!(record.identity.as_str(), "job:acme:https://jobs.acme.example/jobs/9");
    }

    #[test]
    fn test_page_without_cards_yields_nothing() {
        let target = listing_target(listing_site(PaginationRule::None));
        let extraction = SelectorExtractor::new()
            .extract(&page("https://jobs.acme.example/search", "<p>No openings</p>"), &target);

        assert_eq!(extraction.cards_seen, 0);
        assert!(extraction.records.is_empty());
        assert_eq!(
            extraction.dropped,
            vec![ExtractionError::NoCards(".card".to_string())]
        );
    }
}
