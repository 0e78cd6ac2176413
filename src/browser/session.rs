//! The single persistent browser session shared by all requests.
//!
//! One chromiumoxide [`Browser`] is launched at process start against a
//! persisted profile directory, so cookies and storage survive across
//! requests and restarts. Fingerprint counter-measures are fixed at session
//! creation: automation flags are stripped from the launch, and every page
//! created from the session gets the same stealth init script and
//! user-agent/locale/timezone overrides. The session outlives all requests
//! and is closed once, after admissions drain.

use chromiumoxide::cdp::browser_protocol::{emulation, network, page as cdp_page};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::{Result, RpxError};

/// Installed on every new document before any page script runs. Hides the
/// headless automation tells that interstitial scripts probe for.
const STEALTH_INIT_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3] });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
window.chrome = window.chrome || { runtime: {} };
"#;

pub struct BrowserSession {
    browser: Mutex<Option<Browser>>,
    handler_task: JoinHandle<()>,
    config: SessionConfig,
}

impl BrowserSession {
    /// Launch the browser against the configured profile directory,
    /// creating the directory if absent.
    pub async fn launch(config: SessionConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.profile_dir).map_err(|e| {
            RpxError::Config(format!(
                "Failed to create profile dir {}: {}",
                config.profile_dir.display(),
                e
            ))
        })?;

        let mut builder = BrowserConfig::builder();
        if !config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .user_data_dir(&config.profile_dir)
            .viewport(chromiumoxide::handler::viewport::Viewport {
                width: config.viewport.width,
                height: config.viewport.height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .window_size(config.viewport.width, config.viewport.height)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox");

        if let Some(ua) = &config.user_agent {
            builder = builder.arg(format!("--user-agent={ua}"));
        }
        if let Some(locale) = &config.locale {
            builder = builder.arg(format!("--lang={locale}"));
        }

        let browser_config = builder
            .build()
            .map_err(|e| RpxError::Browser(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| RpxError::Browser(format!("browser launch failed: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!(?event, "browser event");
            }
            debug!("browser event handler exited");
        });

        info!(
            profile_dir = %config.profile_dir.display(),
            viewport = %config.viewport,
            headless = config.headless,
            "browser session launched"
        );

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler_task,
            config,
        })
    }

    /// Open a fresh page with the session's overrides applied.
    pub(crate) async fn new_page(&self) -> Result<Page> {
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| RpxError::Browser("session is closed".to_string()))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| RpxError::Browser(format!("failed to open page: {e}")))?;
        drop(guard);

        self.prepare_page(&page).await?;
        Ok(page)
    }

    /// Session-level overrides, applied to each page created from the
    /// session so every request presents the same fingerprint.
    async fn prepare_page(&self, page: &Page) -> Result<()> {
        let init_script = cdp_page::AddScriptToEvaluateOnNewDocumentParams::builder()
            .source(STEALTH_INIT_SCRIPT)
            .build()
            .map_err(RpxError::Browser)?;
        page.execute(init_script)
            .await
            .map_err(|e| RpxError::Browser(format!("failed to install init script: {e}")))?;

        if let Some(ua) = &self.config.user_agent {
            let mut params = network::SetUserAgentOverrideParams::builder().user_agent(ua);
            if let Some(al) = &self.config.accept_language {
                params = params.accept_language(al);
            }
            page.execute(
                params
                    .build()
                    .map_err(|e| RpxError::Browser(format!("invalid user-agent override: {e}")))?,
            )
            .await
            .map_err(|e| RpxError::Browser(format!("failed to set user agent: {e}")))?;
        }

        if let Some(tz) = &self.config.timezone {
            page.execute(emulation::SetTimezoneOverrideParams {
                timezone_id: tz.clone(),
            })
            .await
            .map_err(|e| RpxError::Browser(format!("failed to set timezone: {e}")))?;
        }

        if let Some(locale) = &self.config.locale {
            page.execute(emulation::SetLocaleOverrideParams::builder().locale(locale).build())
                .await
                .map_err(|e| RpxError::Browser(format!("failed to set locale: {e}")))?;
        }

        Ok(())
    }

    /// Close the browser. Must only run after in-flight requests drained.
    pub async fn close(&self) {
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "browser close reported an error");
            }
            drop(browser);
            info!("browser session closed");
        }
        self.handler_task.abort();
    }
}
