//! Browser session and page automation.
//!
//! # Module Structure
//!
//! - [`session`] - The single persistent browser profile shared by all requests
//! - [`automation`] - The narrow page-automation interface the pipelines use
//! - [`cdp`] - chromiumoxide (CDP) implementation of that interface

pub mod automation;
mod cdp;
mod session;

pub use automation::{
    ForwardedHeaders, InPageResponse, PageAutomator, PageHandle, PrimaryResponse, WaitStrategy,
};
pub use cdp::CdpPage;
pub use session::BrowserSession;
