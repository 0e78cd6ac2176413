//! The page-automation capability the pipelines depend on.
//!
//! Pipelines never touch the CDP types directly; they drive pages through
//! these traits so the retry and teardown logic can be exercised against
//! scripted in-memory implementations.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::Result;

/// What "navigation finished" means for a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitStrategy {
    /// The document load event fired.
    Load,
    /// The network went (almost) idle after load.
    NetworkIdle,
}

impl FromStr for WaitStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "load" => Ok(WaitStrategy::Load),
            "network-idle" | "networkidle" => Ok(WaitStrategy::NetworkIdle),
            other => Err(format!(
                "unknown wait strategy '{other}' (expected 'load' or 'network-idle')"
            )),
        }
    }
}

impl std::fmt::Display for WaitStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitStrategy::Load => write!(f, "load"),
            WaitStrategy::NetworkIdle => write!(f, "network-idle"),
        }
    }
}

/// Caller headers replayed on the page before navigation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardedHeaders {
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub accept_language: Option<String>,
}

impl ForwardedHeaders {
    pub fn is_empty(&self) -> bool {
        self.user_agent.is_none() && self.referer.is_none() && self.accept_language.is_none()
    }
}

/// Metadata of the primary (document) network response of a navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryResponse {
    pub status: u16,
    pub content_type: Option<String>,
}

/// Result of a network request executed inside the page's own
/// cookie/header context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InPageResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl InPageResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Opens ephemeral pages from the shared browser session.
#[async_trait]
pub trait PageAutomator: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn PageHandle>>;
}

/// One ephemeral browsing context, owned by a single request.
///
/// Callers must invoke [`PageHandle::close`] on every path; implementations
/// make it idempotent so a second call is a no-op.
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Apply caller-forwarded headers to this page only.
    async fn apply_headers(&self, headers: &ForwardedHeaders) -> Result<()>;

    /// Navigate and wait per the strategy. `Ok(None)` means navigation
    /// completed without producing a primary response.
    async fn navigate(
        &self,
        url: &Url,
        wait: WaitStrategy,
        timeout: Duration,
    ) -> Result<Option<PrimaryResponse>>;

    /// Raw bytes of the primary response; `None` when the origin sent no body.
    async fn primary_body(&self) -> Result<Option<Vec<u8>>>;

    /// The current DOM serialized to HTML.
    async fn rendered_html(&self) -> Result<String>;

    /// Form-encoded POST executed in-page, inheriting cookies and referer
    /// exactly as the browser would send them.
    async fn post_form(&self, target: &Url, body: &str) -> Result<InPageResponse>;

    /// Tear the page down. Idempotent.
    async fn close(&self) -> Result<()>;
}
