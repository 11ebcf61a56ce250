//! Shared harness for the integration tests

use job_harvester::config::{load_config_with_hash, Config};
use job_harvester::crawler::{
    build_http_client, CrawlOrchestrator, Deduplicator, HttpTransport, OrchestratorSettings,
    RateLimiter, RetryPolicy, RetryingFetcher, SelectorExtractor, UserAgentPool,
};
use job_harvester::output::RunOutcome;
use job_harvester::storage::{RunJournal, RunStatus, SqliteStorage};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A loaded configuration plus the database it writes to
pub struct Harness {
    pub config: Config,
    pub config_hash: String,
    pub storage: Arc<SqliteStorage>,
    _dir: TempDir,
}

/// Writes a config with fast pacing and the given `[[site]]` tables, then loads it
pub fn harness(sites_toml: &str) -> Harness {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let config_path = dir.path().join("harvest.toml");

    let toml = format!(
        r#"
[harvester]
workers = 3
min-delay-ms = 0
max-delay-ms = 0
max-attempts = 3
backoff-base-ms = 10
backoff-max-ms = 40
http-timeout-secs = 5

[user-agent]
agents = ["HarvesterTest/1.0"]

[output]
database-path = "{}"

{}
"#,
        db_path.display(),
        sites_toml
    );
    std::fs::write(&config_path, toml).unwrap();

    let (config, config_hash) = load_config_with_hash(&config_path).unwrap();
    let storage = Arc::new(SqliteStorage::open(Path::new(&config.output.database_path)).unwrap());

    Harness {
        config,
        config_hash,
        storage,
        _dir: dir,
    }
}

impl Harness {
    /// Builds an orchestrator wired the same way the binary wires it
    pub fn orchestrator(&self) -> CrawlOrchestrator {
        let h = &self.config.harvester;
        let fetcher = RetryingFetcher::new(
            Arc::new(HttpTransport::new(build_http_client(h).unwrap())),
            RetryPolicy::from_config(h),
            UserAgentPool::new(self.config.user_agent.agents.clone()),
        );

        CrawlOrchestrator::new(
            Arc::new(fetcher),
            Arc::new(SelectorExtractor::new()),
            Deduplicator::with_days(self.storage.clone(), h.seen_ttl_days),
            Arc::new(RateLimiter::from_config(h)),
            self.storage.clone(),
            OrchestratorSettings::from_config(h),
        )
        .with_journal(self.storage.clone())
    }

    /// Runs one harvest and stamps the run's final status
    pub async fn run(&self) -> RunOutcome {
        let start = self
            .storage
            .begin_run(&self.config_hash, false)
            .await
            .unwrap();
        let sites = self.config.site_definitions().unwrap();

        let outcome = self.orchestrator().run(&sites).await;

        let status = if outcome.all_sites_failed() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        self.storage.finish_run(start.run_id, status).await.unwrap();
        outcome
    }
}

/// One listing card
pub fn card(title: &str, href: &str, location: &str) -> String {
    format!(
        r#"<li class="job-card"><h2 class="title">{}</h2><a class="view" href="{}">View</a><span class="location">{}</span></li>"#,
        title, href, location
    )
}

/// Wraps cards (and an optional next link) in a listing page
pub fn listing_page(cards: &[String], next: Option<&str>) -> String {
    let next = next
        .map(|href| format!(r#"<nav class="pagination"><a class="next" href="{}">Next</a></nav>"#, href))
        .unwrap_or_default();
    format!(
        "<html><body><ul class=\"jobs\">{}</ul>{}</body></html>",
        cards.join(""),
        next
    )
}

/// Serves `body` at `route` with a 200 status
pub async fn serve(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

/// `[[site]]` table for a listing-only site following a "next" link
pub fn listing_site(name: &str, base_url: &str) -> String {
    format!(
        r#"
[[site]]
name = "{}"
base-url = "{}"

[site.selectors]
job-list = ".job-card"
title = ["h2.title", "h3"]
link = "a.view"
location = ".location"

[site.pagination]
next-selector = ".pagination a.next"
"#,
        name, base_url
    )
}
