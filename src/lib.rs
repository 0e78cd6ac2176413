//! Rendering Proxy (RPX) Library
//!
//! A rendering proxy: given a target URL, drive a shared headless browser
//! session to load the page (executing its JavaScript, carrying cookies,
//! sidestepping basic bot-detection heuristics) and return either the fully
//! rendered HTML or the raw bytes of the primary network response. A
//! specialized submit operation replays a form POST from inside the
//! authenticated session so cookie and referer state are reused.
//!
//! # Module Overview
//!
//! - [`browser`] - The persistent browser session and the page-automation interface
//! - [`gate`] - FIFO-fair bounded admission of concurrent renders
//! - [`challenge`] - Anti-bot interstitial detection on rendered HTML
//! - [`pipeline`] - Render and submit orchestration with guaranteed teardown
//! - [`server`] - The HTTP surface (`/render`, `/download-submit`, `/health`)
//! - [`config`] - Process-wide configuration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rpx_lib::{AdmissionGate, BrowserSession, Config, RenderPipeline, RenderRequest};
//!
//! # async fn example() -> rpx_lib::Result<()> {
//! let config = Config::default();
//! let session = Arc::new(BrowserSession::launch(config.session.clone()).await?);
//! let gate = AdmissionGate::new(config.gate.max_concurrency);
//! let pipeline = RenderPipeline::new(session, gate, config.navigation, config.challenge);
//!
//! let outcome = pipeline
//!     .render(RenderRequest {
//!         url: "https://example.com".parse().map_err(rpx_lib::RpxError::InvalidUrl)?,
//!         raw: false,
//!         headers: Default::default(),
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod challenge;
pub mod config;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod server;
pub mod viewport;

pub use browser::{
    BrowserSession, ForwardedHeaders, InPageResponse, PageAutomator, PageHandle, PrimaryResponse,
    WaitStrategy,
};
pub use challenge::{classify, ChallengeState};
pub use config::Config;
pub use error::{ErrorCategory, ErrorPayload, Result, RpxError};
pub use gate::{AdmissionGate, AdmissionPermit};
pub use pipeline::{
    validate_form_body, RenderOutcome, RenderPipeline, RenderRequest, SubmitOutcome,
    SubmitPipeline, SubmitRequest,
};
pub use server::{build_router, AppState};
pub use viewport::Viewport;
