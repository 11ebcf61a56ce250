//! Rendered-page transport
//!
//! Script-driven listings are fetched through a `Renderer` capability: a
//! browser (or anything like one) that hands out one page per attempt. The
//! page is held exclusively by that attempt and is closed before the attempt
//! returns. If the attempt is dropped mid-flight, the page is closed on a
//! background task instead.

use crate::crawler::fetcher::{FetchError, FetchRequest, PageContent, Transport};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Failures reported by a rendering session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The session or page could not be used
    #[error("render session error: {0}")]
    Session(String),

    /// Navigation completed with a non-success status
    #[error("navigation returned HTTP {0}")]
    Status(u16),

    /// The wait-for selector never appeared
    #[error("wait condition '{0}' not met")]
    WaitFor(String),
}

impl RenderError {
    fn into_fetch_error(self, url: &Url) -> FetchError {
        match self {
            Self::Status(code) => match StatusCode::from_u16(code) {
                Ok(status) => FetchError::from_status(url, status),
                Err(_) => FetchError::non_transient(url, format!("invalid status {}", code)),
            },
            other => FetchError::transient(url, other.to_string()),
        }
    }
}

/// Hands out rendered pages
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn RenderedPage>, RenderError>;
}

/// One rendered page (tab) owned by a single fetch attempt
#[async_trait]
pub trait RenderedPage: Send {
    async fn set_user_agent(&mut self, user_agent: &str) -> Result<(), RenderError>;

    /// Navigates and returns the response status
    async fn navigate(
        &mut self,
        url: &Url,
        headers: &BTreeMap<String, String>,
    ) -> Result<u16, RenderError>;

    /// Waits until `selector` matches something on the page
    async fn wait_for(&mut self, selector: &str) -> Result<(), RenderError>;

    /// Current URL and serialized DOM
    async fn content(&mut self) -> Result<(Url, String), RenderError>;

    /// Releases the page
    async fn close(self: Box<Self>);
}

/// Transport that drives a `Renderer`
pub struct RenderTransport {
    renderer: Arc<dyn Renderer>,
}

impl RenderTransport {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self { renderer }
    }
}

/// Owns an open page until it is closed, here or on drop
struct PageGuard {
    page: Option<Box<dyn RenderedPage>>,
}

impl PageGuard {
    fn new(page: Box<dyn RenderedPage>) -> Self {
        Self { page: Some(page) }
    }

    async fn drive(&mut self, request: &FetchRequest<'_>) -> Result<PageContent, RenderError> {
        let page = self
            .page
            .as_mut()
            .ok_or_else(|| RenderError::Session("page already closed".to_string()))?;
        let target = request.target;

        page.set_user_agent(request.user_agent).await?;
        let status = page.navigate(&target.url, &target.site.headers).await?;
        if !(200..300).contains(&status) {
            return Err(RenderError::Status(status));
        }

        if let Some(selector) = &target.site.wait_for {
            page.wait_for(selector).await?;
        }

        let (url, body) = page.content().await?;
        Ok(PageContent { url, status, body })
    }

    async fn close(mut self) {
        if let Some(page) = self.page.take() {
            page.close().await;
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(page.close());
            }
            Err(_) => tracing::warn!("Rendered page dropped outside a runtime; not closed"),
        }
    }
}

#[async_trait]
impl Transport for RenderTransport {
    async fn fetch_once(&self, request: &FetchRequest<'_>) -> Result<PageContent, FetchError> {
        let url = &request.target.url;
        let page = self
            .renderer
            .open_page()
            .await
            .map_err(|e| e.into_fetch_error(url))?;

        let mut guard = PageGuard::new(page);
        let outcome = tokio::time::timeout(request.timeout, guard.drive(request)).await;
        guard.close().await;

        match outcome {
            Ok(result) => result.map_err(|e| e.into_fetch_error(url)),
            Err(_) => Err(FetchError::transient(
                url,
                format!("render timed out after {:?}", request.timeout),
            )),
        }
    }
}
