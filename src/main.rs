//! Job Harvester main entry point
//!
//! This is the command-line interface for the job listing harvester.

use anyhow::{bail, Context};
use clap::Parser;
use job_harvester::config::{load_config_with_hash, Config};
use job_harvester::crawler::{
    build_http_client, CrawlOrchestrator, Deduplicator, HttpTransport, OrchestratorSettings,
    RateLimiter, RetryPolicy, RetryingFetcher, SelectorExtractor, UserAgentPool,
};
use job_harvester::output::{load_statistics, print_run_summary, print_statistics};
use job_harvester::storage::{RunJournal, RunStatus, SqliteStorage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Job Harvester: a polite harvester for paginated job listings
///
/// Job Harvester walks each configured site's listing pages, follows detail
/// links when asked to, and upserts every unique posting exactly once
/// inside the seen-set window.
#[derive(Parser, Debug)]
#[command(name = "job-harvester")]
#[command(version)]
#[command(about = "A polite harvester for paginated job listings", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Start a fresh run, discarding saved cursors and pending targets
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be harvested without fetching
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config)
    } else {
        handle_harvest(config, &config_hash, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("job_harvester=info,warn"),
            1 => EnvFilter::new("job_harvester=debug,info"),
            2 => EnvFilter::new("job_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be harvested
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Job Harvester Dry Run ===\n");

    let h = &config.harvester;
    println!("Harvester Configuration:");
    println!("  Workers: {}", h.workers);
    println!("  Per-site delay: {}-{}ms", h.min_delay_ms, h.max_delay_ms);
    println!(
        "  Attempts: {} (backoff {}ms, capped at {}ms)",
        h.max_attempts, h.backoff_base_ms, h.backoff_max_ms
    );
    println!("  Seen-set TTL: {} days", h.seen_ttl_days);

    println!("\nUser Agents ({}):", config.user_agent.agents.len());
    for agent in &config.user_agent.agents {
        println!("  - {}", agent);
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    let sites = config.site_definitions()?;
    println!("\nSites ({}):", sites.len());
    for site in &sites {
        println!(
            "  - {} ({}{}, up to {} pages)",
            site.name,
            if site.follows_details() {
                "listing + details"
            } else {
                "listing only"
            },
            if site.js_required { ", rendered" } else { "" },
            site.max_pages
        );
        println!("    * starts at {}", site.first_page_url());
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would harvest {} site(s)", sites.len());

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::open(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main harvest run
async fn handle_harvest(config: Config, config_hash: &str, fresh: bool) -> anyhow::Result<()> {
    let sites = config.site_definitions()?;
    let storage = Arc::new(SqliteStorage::open(Path::new(&config.output.database_path))?);

    let start = storage.begin_run(config_hash, fresh).await?;
    if start.resumed {
        tracing::info!("Resuming interrupted progress in run {}", start.run_id);
    } else if fresh {
        tracing::info!("Starting fresh run {}", start.run_id);
    } else {
        tracing::info!("Starting run {}", start.run_id);
    }
    if start.config_changed {
        tracing::warn!("Configuration changed since the previous run");
    }

    for site in sites.iter().filter(|site| site.js_required) {
        tracing::warn!(
            "Site {} requires rendering but no renderer is configured; its fetches will fail",
            site.name
        );
    }

    let token = CancellationToken::new();
    let h = &config.harvester;
    let client = build_http_client(h)?;
    let fetcher = RetryingFetcher::new(
        Arc::new(HttpTransport::new(client)),
        RetryPolicy::from_config(h),
        UserAgentPool::new(config.user_agent.agents.clone()),
    )
    .with_cancellation(token.clone());
    let orchestrator = CrawlOrchestrator::new(
        Arc::new(fetcher),
        Arc::new(SelectorExtractor::new()),
        Deduplicator::with_days(storage.clone(), h.seen_ttl_days),
        Arc::new(RateLimiter::from_config(h)),
        storage.clone(),
        OrchestratorSettings::from_config(h),
    )
    .with_journal(storage.clone())
    .with_cancellation(token.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; finishing in-flight fetches");
            token.cancel();
        }
    });

    let outcome = orchestrator.run(&sites).await;

    let status = if outcome.cancelled {
        RunStatus::Interrupted
    } else if outcome.all_sites_failed() {
        RunStatus::Failed
    } else {
        RunStatus::Completed
    };
    storage.finish_run(start.run_id, status).await?;

    print_run_summary(&outcome);

    if outcome.all_sites_failed() {
        bail!("every site failed");
    }
    Ok(())
}
