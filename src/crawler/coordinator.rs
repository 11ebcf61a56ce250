//! Crawl orchestration
//!
//! This module drives a harvest run end to end:
//! - One listing/pagination loop per site, all sites concurrently
//! - A bounded worker pool shared by every site's detail targets
//! - The dedup gate in front of every sink write
//! - Journal updates so an interrupted run can resume
//! - Run-level cancellation that stops new fetches promptly
//!
//! Per-target failures become `TargetOutcome::Failed` and are counted;
//! they never abort sibling targets, the site's loop or other sites.

use crate::config::HarvesterConfig;
use crate::crawler::dedup::Deduplicator;
use crate::crawler::extractor::{ExtractionError, Extractor};
use crate::crawler::fetcher::{FetchError, Fetcher, PageContent};
use crate::crawler::limiter::RateLimiter;
use crate::output::{RunOutcome, SiteOutcome, TargetOutcome};
use crate::record::{CandidateRecord, IdentityKey};
use crate::site::{CrawlTarget, PaginationRule, SiteDefinition};
use crate::state::{SiteState, TargetState};
use crate::storage::{PendingTarget, RunJournal, Sink, SiteCursor};
use crate::url::canonical_url;
use crate::HarvestError;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Worker pool and store retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Number of detail workers
    pub workers: usize,

    /// Extra upsert attempts after a store error
    pub store_retries: u32,
}

impl OrchestratorSettings {
    pub fn from_config(config: &HarvesterConfig) -> Self {
        Self {
            workers: config.workers.max(1) as usize,
            store_retries: 1,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&HarvesterConfig::default())
    }
}

/// Template-paginated sites give up after this many failed pages in a row
const MAX_CONSECUTIVE_LISTING_FAILURES: u32 = 3;

/// Result of a rate-limited fetch
enum Fetched {
    Page(PageContent),
    Failed(FetchError),
    Cancelled,
}

/// Why a site's listing loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopEnd {
    Exhausted,
    Ceiling,
    Cycle,
    Cancelled,
    Failed,
}

impl LoopEnd {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Exhausted => "pagination exhausted",
            Self::Ceiling => "page ceiling reached",
            Self::Cycle => "pagination cycled back to a visited page",
            Self::Cancelled => "cancelled",
            Self::Failed => "listing page failed",
        }
    }
}

fn enter(site: &str, state: SiteState) {
    tracing::trace!("Site {} -> {}", site, state);
}

/// Coordinates fetch → extract → gate → persist for every configured site
///
/// All collaborators are injected; cloning shares them.
#[derive(Clone)]
pub struct CrawlOrchestrator {
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    dedup: Deduplicator,
    limiter: Arc<RateLimiter>,
    sink: Arc<dyn Sink>,
    journal: Option<Arc<dyn RunJournal>>,
    settings: OrchestratorSettings,
    cancel: CancellationToken,
}

impl CrawlOrchestrator {
    /// Creates an orchestrator
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Retrieves pages, retrying transient failures
    /// * `extractor` - Turns pages into candidate records
    /// * `dedup` - Gate applied before any sink write
    /// * `limiter` - Global and per-site fetch pacing
    /// * `sink` - Idempotent record store
    /// * `settings` - Worker count and store retries
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
        dedup: Deduplicator,
        limiter: Arc<RateLimiter>,
        sink: Arc<dyn Sink>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            dedup,
            limiter,
            sink,
            journal: None,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Records cursors and pending targets so the run can be resumed
    pub fn with_journal(mut self, journal: Arc<dyn RunJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Uses an existing token, e.g. one shared with the fetcher's retries
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Stops issuing new fetches; in-flight fetches finish normally
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Runs every site to completion or cancellation
    ///
    /// # Arguments
    ///
    /// * `sites` - Immutable site definitions for this run
    ///
    /// # Returns
    ///
    /// Per-site counters. Site-level errors are reported in the outcome,
    /// never returned.
    pub async fn run(&self, sites: &[Arc<SiteDefinition>]) -> RunOutcome {
        let workers = self.settings.workers.max(1);
        let (queue, receiver) = mpsc::channel::<CrawlTarget>(workers * 4);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut outcomes: BTreeMap<String, SiteOutcome> = sites
            .iter()
            .map(|site| (site.name.clone(), SiteOutcome::new(&site.name)))
            .collect();

        let mut pool = JoinSet::new();
        for id in 0..workers {
            let this = self.clone();
            let receiver = Arc::clone(&receiver);
            pool.spawn(async move { this.worker_loop(id, receiver).await });
        }
        tracing::info!(
            "Harvesting {} site(s) with {} worker(s)",
            sites.len(),
            workers
        );

        let (cursors, pending) = self.load_journal().await;
        self.requeue_pending(pending, sites, &queue, &mut outcomes)
            .await;

        let mut loops = JoinSet::new();
        for site in sites {
            let this = self.clone();
            let site = Arc::clone(site);
            let cursor = cursors.get(&site.name).cloned();
            let queue = queue.clone();
            loops.spawn(async move { this.run_site(site, cursor, queue).await });
        }
        drop(queue);

        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok(outcome) => {
                    if let Some(total) = outcomes.get_mut(&outcome.site) {
                        total.absorb(&outcome);
                    }
                }
                Err(e) => tracing::error!("Site loop ended abnormally: {}", e),
            }
        }

        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(tallies) => {
                    for (site, tally) in tallies {
                        outcomes
                            .entry(site.clone())
                            .or_insert_with(|| SiteOutcome::new(&site))
                            .absorb(&tally);
                    }
                }
                Err(e) => tracing::error!("Worker ended abnormally: {}", e),
            }
        }

        for site in sites {
            tracing::debug!(
                "{} request(s) started against {}",
                self.limiter.request_count(&site.name).await,
                site.name
            );
        }

        let outcome = RunOutcome {
            sites: outcomes,
            cancelled: self.cancel.is_cancelled(),
        };
        let totals = outcome.totals();
        tracing::info!(
            "Run finished: {} accepted, {} skipped, {} failed, {} listing pages{}",
            totals.accepted,
            totals.skipped,
            totals.failed,
            totals.pages_visited,
            if outcome.cancelled { " (cancelled)" } else { "" }
        );
        outcome
    }

    // ===== Listing loops =====

    async fn run_site(
        &self,
        site: Arc<SiteDefinition>,
        cursor: Option<SiteCursor>,
        queue: mpsc::Sender<CrawlTarget>,
    ) -> SiteOutcome {
        let mut outcome = SiteOutcome::new(&site.name);
        let (mut url, mut page_index, mut pages_visited) = starting_point(&site, cursor);
        let mut visited: HashSet<String> = HashSet::new();
        let mut consecutive_failures = 0u32;

        tracing::info!("Starting site {} at {}", site.name, url);

        let end = loop {
            if pages_visited >= site.max_pages {
                break LoopEnd::Ceiling;
            }
            let visit_key = canonical_url(url.as_str())
                .map(|u| u.to_string())
                .unwrap_or_else(|_| url.to_string());
            if !visited.insert(visit_key) {
                break LoopEnd::Cycle;
            }
            if self.cancel.is_cancelled() {
                break LoopEnd::Cancelled;
            }

            self.save_cursor(&site.name, &url, page_index, pages_visited)
                .await;

            enter(&site.name, SiteState::Listing);
            let target = CrawlTarget::listing(url.clone(), Arc::clone(&site));
            let page = match self.fetch_gated(&target).await {
                Fetched::Page(page) => page,
                Fetched::Cancelled => break LoopEnd::Cancelled,
                Fetched::Failed(err) => {
                    outcome.failed += 1;
                    consecutive_failures += 1;

                    // Template pages stay addressable after a transient failure
                    let skip_to = match &site.pagination {
                        PaginationRule::UrlTemplate { .. }
                            if err.is_transient()
                                && consecutive_failures < MAX_CONSECUTIVE_LISTING_FAILURES =>
                        {
                            site.pagination.page_url(page_index + 1)
                        }
                        _ => None,
                    };

                    match skip_to {
                        Some(next) => {
                            tracing::warn!(
                                "Listing page {} for {} failed: {}; moving on to {}",
                                url,
                                site.name,
                                err,
                                next
                            );
                            page_index += 1;
                            url = next;
                            continue;
                        }
                        None => {
                            tracing::error!("Listing page {} for {} failed: {}", url, site.name, err);
                            outcome.error = Some(err.to_string());
                            break LoopEnd::Failed;
                        }
                    }
                }
            };
            consecutive_failures = 0;
            pages_visited += 1;
            outcome.pages_visited += 1;

            enter(&site.name, SiteState::Extracting);
            let extraction = self.extractor.extract(&page, &target);
            outcome.dropped += extraction
                .dropped
                .iter()
                .filter(|e| matches!(e, ExtractionError::Record(_)))
                .count() as u32;
            tracing::debug!(
                "{} page {}: {} card(s), {} record(s)",
                site.name,
                pages_visited,
                extraction.cards_seen,
                extraction.records.len()
            );

            enter(&site.name, SiteState::Scheduling);
            let cards_seen = extraction.cards_seen;
            let next_link = extraction.next_page.clone();

            if site.follows_details() {
                let scheduled = self
                    .schedule_details(&site, extraction.records, &queue, &mut outcome)
                    .await;
                if !scheduled {
                    break LoopEnd::Cancelled;
                }
            } else {
                outcome.records_extracted += extraction.records.len() as u32;
                for record in &extraction.records {
                    let result = self
                        .gate_and_persist(record, TargetState::Extracting)
                        .await
                        .unwrap_or_else(|e| TargetOutcome::Failed {
                            reason: e.to_string(),
                        });
                    if let TargetOutcome::Failed { reason } = &result {
                        tracing::warn!("Record {} failed: {}", record.identity, reason);
                    }
                    outcome.record(&result);
                }
            }

            let next = match &site.pagination {
                PaginationRule::None => None,
                PaginationRule::NextSelector(_) => next_link,
                PaginationRule::UrlTemplate { .. } if cards_seen > 0 => {
                    page_index += 1;
                    site.pagination.page_url(page_index)
                }
                PaginationRule::UrlTemplate { .. } => None,
            };

            match next {
                Some(next) => url = next,
                None => break LoopEnd::Exhausted,
            }
        };

        enter(&site.name, SiteState::Done);
        match end {
            LoopEnd::Exhausted | LoopEnd::Ceiling | LoopEnd::Cycle => {
                self.clear_cursor(&site.name).await;
                tracing::info!(
                    "Site {} done after {} page(s): {}",
                    site.name,
                    outcome.pages_visited,
                    end.as_str()
                );
            }
            LoopEnd::Cancelled | LoopEnd::Failed => {
                tracing::info!(
                    "Site {} stopped after {} page(s): {}",
                    site.name,
                    outcome.pages_visited,
                    end.as_str()
                );
            }
        }

        outcome
    }

    /// Gates each listing link and hands accepted ones to the pool
    ///
    /// Returns `false` when cancelled mid-way.
    async fn schedule_details(
        &self,
        site: &Arc<SiteDefinition>,
        records: Vec<CandidateRecord>,
        queue: &mpsc::Sender<CrawlTarget>,
        outcome: &mut SiteOutcome,
    ) -> bool {
        for record in records {
            let Some(link) = record.link_url() else {
                outcome.dropped += 1;
                continue;
            };

            let key = IdentityKey::for_link(&site.name, &link);
            match self.dedup.should_process(&key).await {
                Ok(true) => {}
                Ok(false) => {
                    outcome.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Seen-set check for {} failed: {}", link, e);
                    outcome.failed += 1;
                    continue;
                }
            }

            if let Some(journal) = &self.journal {
                if let Err(e) = journal.add_pending(&site.name, &link).await {
                    tracing::warn!("Could not journal pending target {}: {}", link, e);
                }
            }

            let target = CrawlTarget::detail(link, Arc::clone(site));
            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => false,
                result = queue.send(target) => result.is_ok(),
            };
            if !sent {
                return false;
            }
            outcome.detail_targets += 1;
        }

        true
    }

    // ===== Workers =====

    async fn worker_loop(
        &self,
        id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<CrawlTarget>>>,
    ) -> HashMap<String, SiteOutcome> {
        let mut tallies: HashMap<String, SiteOutcome> = HashMap::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                target = async { receiver.lock().await.recv().await } => target,
            };
            let Some(target) = next else {
                break;
            };

            let (outcome, extracted) = self.process_detail(&target).await;
            match &outcome {
                TargetOutcome::Persisted(result) => {
                    tracing::debug!("Worker {} persisted {} ({:?})", id, target.url, result)
                }
                TargetOutcome::Duplicate => {
                    tracing::debug!("Worker {} skipped duplicate {}", id, target.url)
                }
                TargetOutcome::Failed { reason } => {
                    tracing::warn!("Target {} failed: {}", target, reason)
                }
                TargetOutcome::Abandoned => {
                    tracing::debug!("Worker {} left {} pending", id, target.url)
                }
            }

            let tally = tallies
                .entry(target.site_name().to_string())
                .or_insert_with(|| SiteOutcome::new(target.site_name()));
            tally.record(&outcome);
            if extracted {
                tally.records_extracted += 1;
            }
        }

        tracing::debug!("Worker {} stopped", id);
        tallies
    }

    /// Runs one detail target and settles its journal and link marker
    async fn process_detail(&self, target: &CrawlTarget) -> (TargetOutcome, bool) {
        let (outcome, extracted) = match self.run_detail(target).await {
            Ok(result) => result,
            Err(e) => (
                TargetOutcome::Failed {
                    reason: e.to_string(),
                },
                false,
            ),
        };

        if matches!(outcome, TargetOutcome::Abandoned) {
            return (outcome, extracted);
        }
        if matches!(outcome, TargetOutcome::Failed { .. }) {
            let link_key = IdentityKey::for_link(target.site_name(), &target.url);
            if let Err(e) = self.dedup.release(&link_key).await {
                tracing::warn!("Could not release {}: {}", link_key, e);
            }
        }

        self.forget_pending(target).await;
        (outcome, extracted)
    }

    async fn run_detail(&self, target: &CrawlTarget) -> Result<(TargetOutcome, bool), HarvestError> {
        let state = TargetState::Queued.advance(TargetState::Fetching)?;

        let page = match self.fetch_gated(target).await {
            Fetched::Page(page) => page,
            Fetched::Cancelled => return Ok((TargetOutcome::Abandoned, false)),
            Fetched::Failed(err) => {
                state.advance(TargetState::Failed)?;
                return Ok((
                    TargetOutcome::Failed {
                        reason: err.to_string(),
                    },
                    false,
                ));
            }
        };

        let state = state.advance(TargetState::Extracting)?;
        let extraction = self.extractor.extract(&page, target);
        let Some(record) = extraction.records.into_iter().next() else {
            state.advance(TargetState::Failed)?;
            let reason = extraction
                .dropped
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no record on detail page".to_string());
            return Ok((TargetOutcome::Failed { reason }, false));
        };

        let outcome = self.gate_and_persist(&record, state).await?;
        Ok((outcome, true))
    }

    // ===== Shared steps =====

    /// Holds a rate-limiter permit for the duration of one fetch
    async fn fetch_gated(&self, target: &CrawlTarget) -> Fetched {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Fetched::Cancelled,
            permit = self.limiter.acquire(target.site_name()) => permit,
        };
        let Ok(permit) = permit else {
            return Fetched::Cancelled;
        };

        let result = self.fetcher.fetch(target).await;
        drop(permit);

        match result {
            Ok(page) => Fetched::Page(page),
            Err(_) if self.cancel.is_cancelled() => Fetched::Cancelled,
            Err(err) => Fetched::Failed(err),
        }
    }

    /// Applies the dedup gate, then upserts with one retry on store errors
    async fn gate_and_persist(
        &self,
        record: &CandidateRecord,
        state: TargetState,
    ) -> Result<TargetOutcome, HarvestError> {
        let state = state.advance(TargetState::Gating)?;

        match self.dedup.should_process(&record.identity).await {
            Ok(true) => {}
            Ok(false) => {
                state.advance(TargetState::Skipped)?;
                return Ok(TargetOutcome::Duplicate);
            }
            Err(e) => {
                state.advance(TargetState::Failed)?;
                return Ok(TargetOutcome::Failed {
                    reason: format!("seen-set check failed: {}", e),
                });
            }
        }

        let state = state.advance(TargetState::Persisting)?;
        let mut retries = 0;
        loop {
            match self.sink.upsert(record).await {
                Ok(result) => {
                    state.advance(TargetState::Done)?;
                    return Ok(TargetOutcome::Persisted(result));
                }
                Err(e) if retries < self.settings.store_retries => {
                    retries += 1;
                    tracing::warn!("Upsert of {} failed: {}; retrying", record.identity, e);
                }
                Err(e) => {
                    state.advance(TargetState::Failed)?;
                    if let Err(release_err) = self.dedup.release(&record.identity).await {
                        tracing::warn!("Could not release {}: {}", record.identity, release_err);
                    }
                    return Ok(TargetOutcome::Failed {
                        reason: format!("store error: {}", e),
                    });
                }
            }
        }
    }

    // ===== Journal =====

    async fn load_journal(&self) -> (HashMap<String, SiteCursor>, Vec<PendingTarget>) {
        let Some(journal) = &self.journal else {
            return (HashMap::new(), Vec::new());
        };

        let cursors = journal.load_cursors().await.unwrap_or_else(|e| {
            tracing::warn!("Could not load site cursors: {}", e);
            HashMap::new()
        });
        let pending = journal.load_pending().await.unwrap_or_else(|e| {
            tracing::warn!("Could not load pending targets: {}", e);
            Vec::new()
        });
        (cursors, pending)
    }

    async fn requeue_pending(
        &self,
        pending: Vec<PendingTarget>,
        sites: &[Arc<SiteDefinition>],
        queue: &mpsc::Sender<CrawlTarget>,
        outcomes: &mut BTreeMap<String, SiteOutcome>,
    ) {
        if pending.is_empty() {
            return;
        }
        tracing::info!("Re-enqueueing {} pending detail target(s)", pending.len());

        let by_name: HashMap<&str, &Arc<SiteDefinition>> =
            sites.iter().map(|site| (site.name.as_str(), site)).collect();

        for entry in pending {
            let Ok(url) = Url::parse(&entry.url) else {
                tracing::warn!("Skipping pending target with bad URL {}", entry.url);
                continue;
            };
            let Some(site) = by_name.get(entry.site.as_str()) else {
                tracing::warn!("Dropping pending target for unknown site {}", entry.site);
                if let Some(journal) = &self.journal {
                    let _ = journal.remove_pending(&entry.site, &url).await;
                }
                continue;
            };

            let target = CrawlTarget::detail(url, Arc::clone(site));
            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => false,
                result = queue.send(target) => result.is_ok(),
            };
            if !sent {
                return;
            }
            if let Some(outcome) = outcomes.get_mut(&entry.site) {
                outcome.detail_targets += 1;
            }
        }
    }

    async fn save_cursor(&self, site: &str, url: &Url, page_index: u32, pages_visited: u32) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal
                .save_cursor(site, url, page_index, pages_visited)
                .await
            {
                tracing::warn!("Could not save cursor for {}: {}", site, e);
            }
        }
    }

    async fn clear_cursor(&self, site: &str) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.clear_cursor(site).await {
                tracing::warn!("Could not clear cursor for {}: {}", site, e);
            }
        }
    }

    async fn forget_pending(&self, target: &CrawlTarget) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.remove_pending(target.site_name(), &target.url).await {
                tracing::warn!("Could not clear pending target {}: {}", target.url, e);
            }
        }
    }
}

/// Where a site's loop starts: its saved cursor, else its first page
fn starting_point(site: &SiteDefinition, cursor: Option<SiteCursor>) -> (Url, u32, u32) {
    if let Some(cursor) = cursor {
        match Url::parse(&cursor.next_url) {
            Ok(url) => {
                tracing::info!(
                    "Resuming {} at {} ({} page(s) already visited)",
                    site.name,
                    url,
                    cursor.pages_visited
                );
                return (url, cursor.page_index, cursor.pages_visited);
            }
            Err(e) => tracing::warn!("Ignoring bad cursor for {}: {}", site.name, e),
        }
    }

    (site.first_page_url(), site.pagination.start_index(), 0)
}
