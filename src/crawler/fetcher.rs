//! Page fetching with retry, backoff and user-agent rotation
//!
//! This module handles every page request the pipeline makes, including:
//! - Choosing the plain HTTP or rendered transport per site
//! - Classifying failures as transient or non-transient
//! - Retrying transient failures with jittered exponential backoff
//! - Rotating the user agent on every attempt

use crate::config::HarvesterConfig;
use crate::site::CrawlTarget;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::USER_AGENT;
use reqwest::{redirect::Policy, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

/// User agent used when the configured pool is empty
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// A failed fetch, classified by whether retrying can help
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Timeout, connection reset, 5xx or 429
    #[error("transient failure fetching {url}: {reason}")]
    Transient {
        url: String,
        reason: String,
        status: Option<u16>,
    },

    /// 4xx other than 429, malformed request or unresolvable host
    #[error("failed fetching {url}: {reason}")]
    NonTransient {
        url: String,
        reason: String,
        status: Option<u16>,
    },
}

impl FetchError {
    pub fn transient(url: &Url, reason: impl Into<String>) -> Self {
        Self::Transient {
            url: url.to_string(),
            reason: reason.into(),
            status: None,
        }
    }

    pub fn non_transient(url: &Url, reason: impl Into<String>) -> Self {
        Self::NonTransient {
            url: url.to_string(),
            reason: reason.into(),
            status: None,
        }
    }

    /// Classifies a non-success HTTP status
    pub fn from_status(url: &Url, status: StatusCode) -> Self {
        let reason = format!("HTTP {}", status.as_u16());
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Self::Transient {
                url: url.to_string(),
                reason,
                status: Some(status.as_u16()),
            }
        } else {
            Self::NonTransient {
                url: url.to_string(),
                reason,
                status: Some(status.as_u16()),
            }
        }
    }

    /// Classifies a client-side request failure
    pub fn from_reqwest(url: &Url, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::transient(url, "request timed out")
        } else if err.is_builder() || err.is_redirect() {
            Self::non_transient(url, err.to_string())
        } else if err.is_connect() && is_dns_failure(err) {
            Self::non_transient(url, "host could not be resolved")
        } else {
            Self::transient(url, err.to_string())
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::NonTransient { status, .. } => *status,
        }
    }
}

fn is_dns_failure(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return true;
        }
        source = cause.source();
    }
    false
}

/// Raw content of a fetched page
#[derive(Debug, Clone)]
pub struct PageContent {
    /// Final URL after redirects; relative links resolve against it
    pub url: Url,
    pub status: u16,
    pub body: String,
}

/// Fetches pages for crawl targets
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, target: &CrawlTarget) -> Result<PageContent, FetchError>;
}

/// One attempt's parameters
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub target: &'a CrawlTarget,
    pub user_agent: &'a str,
    pub timeout: Duration,
}

/// A single-attempt page transport
///
/// Implementations apply `request.timeout` themselves and release any
/// per-attempt resources before returning.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch_once(&self, request: &FetchRequest<'_>) -> Result<PageContent, FetchError>;
}

/// Builds the shared HTTP client
///
/// # Arguments
///
/// * `config` - Harvester tuning; supplies the connect timeout
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &HarvesterConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(config.http_timeout_secs))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Plain HTTP GET transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_once(&self, request: &FetchRequest<'_>) -> Result<PageContent, FetchError> {
        let url = &request.target.url;

        let mut builder = self
            .client
            .get(url.clone())
            .timeout(request.timeout)
            .header(USER_AGENT, request.user_agent);
        for (name, value) in &request.target.site.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(url, status));
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;

        Ok(PageContent {
            url: final_url,
            status: status.as_u16(),
            body,
        })
    }
}

/// Attempt ceiling, backoff shape and per-transport timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub http_timeout: Duration,
    pub render_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &HarvesterConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            http_timeout: Duration::from_secs(config.http_timeout_secs),
            render_timeout: Duration::from_secs(config.render_timeout_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&HarvesterConfig::default())
    }
}

/// Jittered exponential backoff whose delays never decrease
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
    last: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
            last: Duration::ZERO,
        }
    }

    /// Delay before the next retry
    ///
    /// The exponential step `base * 2^n` is capped at `max`, then jittered
    /// into its upper half.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(self.attempt))
            .min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        let high = exp.as_millis() as u64;
        let low = high / 2;
        let jittered = if high > low {
            Duration::from_millis(rand::thread_rng().gen_range(low..=high))
        } else {
            exp
        };

        let delay = jittered.max(self.last);
        self.last = delay;
        delay
    }
}

/// Random pick from the configured user agents
#[derive(Debug, Clone)]
pub struct UserAgentPool {
    agents: Vec<String>,
}

impl UserAgentPool {
    pub fn new(agents: Vec<String>) -> Self {
        let agents = agents
            .into_iter()
            .filter(|a| !a.trim().is_empty())
            .collect();
        Self { agents }
    }

    pub fn pick(&self) -> &str {
        self.agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(DEFAULT_USER_AGENT)
    }
}

/// Fetcher that retries transient failures on the site's transport
pub struct RetryingFetcher {
    http: Arc<dyn Transport>,
    rendered: Option<Arc<dyn Transport>>,
    policy: RetryPolicy,
    agents: UserAgentPool,
    cancel: CancellationToken,
}

impl RetryingFetcher {
    pub fn new(http: Arc<dyn Transport>, policy: RetryPolicy, agents: UserAgentPool) -> Self {
        Self {
            http,
            rendered: None,
            policy,
            agents,
            cancel: CancellationToken::new(),
        }
    }

    /// Stops retrying once `cancel` fires; the last error is returned
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Adds the transport used for sites that need script rendering
    pub fn with_renderer(mut self, rendered: Arc<dyn Transport>) -> Self {
        self.rendered = Some(rendered);
        self
    }

    fn transport_for(
        &self,
        target: &CrawlTarget,
    ) -> Result<(&Arc<dyn Transport>, Duration), FetchError> {
        if !target.site.js_required {
            return Ok((&self.http, self.policy.http_timeout));
        }

        match &self.rendered {
            Some(rendered) => Ok((rendered, self.policy.render_timeout)),
            None => Err(FetchError::non_transient(
                &target.url,
                "site requires rendering but no renderer is configured",
            )),
        }
    }
}

#[async_trait]
impl Fetcher for RetryingFetcher {
    async fn fetch(&self, target: &CrawlTarget) -> Result<PageContent, FetchError> {
        let (transport, timeout) = self.transport_for(target)?;
        let mut backoff = Backoff::new(self.policy.backoff_base, self.policy.backoff_max);
        let mut attempt = 1;

        loop {
            let request = FetchRequest {
                target,
                user_agent: self.agents.pick(),
                timeout,
            };

            match transport.fetch_once(&request).await {
                Ok(page) => {
                    tracing::debug!("Fetched {} on attempt {}", target, attempt);
                    return Ok(page);
                }
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        "Attempt {}/{} for {} failed: {}; retrying in {:?}",
                        attempt,
                        self.policy.max_attempts,
                        target.url,
                        err,
                        delay
                    );
                    let resumed = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => false,
                        _ = tokio::time::sleep(delay) => true,
                    };
                    if !resumed {
                        tracing::debug!("Cancelled before retrying {}", target.url);
                        return Err(err);
                    }
                    attempt += 1;
                }
                Err(err) => {
                    tracing::debug!("Giving up on {} after {} attempt(s)", target.url, attempt);
                    return Err(err);
                }
            }
        }
    }
}
