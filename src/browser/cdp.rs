//! chromiumoxide-backed implementation of the page-automation interface.
//!
//! The primary (document) response of a navigation is captured through the
//! Network domain: a `ResponseReceived` listener is subscribed before `goto`
//! runs, and the first event it yields belongs to the document request, since
//! the page is freshly created and redirect hops do not emit separate
//! `ResponseReceived` events. Raw body bytes come from
//! `Network.getResponseBody`; the submit POST runs as an in-page `fetch` with
//! `credentials: 'include'` so the browser's own cookie jar and referer apply.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::network;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use super::automation::{
    ForwardedHeaders, InPageResponse, PageAutomator, PageHandle, PrimaryResponse, WaitStrategy,
};
use super::session::BrowserSession;
use crate::{Result, RpxError};

/// How long to wait for the buffered `ResponseReceived` event once
/// navigation itself has finished.
const RESPONSE_EVENT_GRACE: Duration = Duration::from_millis(250);

#[async_trait]
impl PageAutomator for BrowserSession {
    async fn open_page(&self) -> Result<Box<dyn PageHandle>> {
        let page = self.new_page().await?;
        Ok(Box::new(CdpPage::new(page)))
    }
}

struct CapturedPrimary {
    request_id: network::RequestId,
    status: u16,
    mime_type: String,
}

pub struct CdpPage {
    page: Page,
    primary: Mutex<Option<CapturedPrimary>>,
    closed: AtomicBool,
}

impl CdpPage {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            primary: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PageHandle for CdpPage {
    async fn apply_headers(&self, headers: &ForwardedHeaders) -> Result<()> {
        if let Some(ua) = &headers.user_agent {
            let mut params = network::SetUserAgentOverrideParams::builder().user_agent(ua);
            if let Some(al) = &headers.accept_language {
                params = params.accept_language(al);
            }
            self.page
                .execute(params.build().map_err(RpxError::Browser)?)
                .await
                .map_err(|e| RpxError::Browser(format!("failed to override user agent: {e}")))?;
        }

        let mut extra = serde_json::Map::new();
        if let Some(referer) = &headers.referer {
            extra.insert("Referer".to_string(), serde_json::json!(referer));
        }
        if headers.user_agent.is_none() {
            if let Some(al) = &headers.accept_language {
                extra.insert("Accept-Language".to_string(), serde_json::json!(al));
            }
        }
        if !extra.is_empty() {
            let params = network::SetExtraHttpHeadersParams::builder()
                .headers(network::Headers::new(serde_json::Value::Object(extra)))
                .build()
                .map_err(RpxError::Browser)?;
            self.page
                .execute(params)
                .await
                .map_err(|e| RpxError::Browser(format!("failed to set extra headers: {e}")))?;
        }

        Ok(())
    }

    async fn navigate(
        &self,
        url: &Url,
        wait: WaitStrategy,
        nav_timeout: Duration,
    ) -> Result<Option<PrimaryResponse>> {
        self.page
            .execute(network::EnableParams::default())
            .await
            .map_err(|e| RpxError::Browser(format!("failed to enable network events: {e}")))?;

        // Subscribe before goto so the document response cannot be missed.
        let mut events = self
            .page
            .event_listener::<network::EventResponseReceived>()
            .await
            .map_err(|e| RpxError::Browser(format!("failed to listen for responses: {e}")))?;

        let (tx, rx) = oneshot::channel();
        let listener = tokio::spawn(async move {
            if let Some(event) = events.next().await {
                let _ = tx.send(event);
            }
        });

        let navigation = async {
            self.page.goto(url.as_str()).await?;
            if wait == WaitStrategy::NetworkIdle {
                let _ = self.page.wait_for_navigation().await;
            }
            Ok::<(), chromiumoxide::error::CdpError>(())
        };

        match timeout(nav_timeout, navigation).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                listener.abort();
                return Err(RpxError::navigation(format!("{url}: {e}")));
            }
            Err(_) => {
                listener.abort();
                return Err(RpxError::navigation(format!(
                    "{url}: timed out after {}s",
                    nav_timeout.as_secs()
                )));
            }
        }

        let event = match timeout(RESPONSE_EVENT_GRACE, rx).await {
            Ok(Ok(event)) => event,
            _ => {
                listener.abort();
                debug!(%url, "navigation finished without a primary response");
                return Ok(None);
            }
        };

        let status = event.response.status as u16;
        let mime_type = event.response.mime_type.clone();
        debug!(%url, status, mime = %mime_type, "captured primary response");

        *self.primary.lock().await = Some(CapturedPrimary {
            request_id: event.request_id.clone(),
            status,
            mime_type: mime_type.clone(),
        });

        Ok(Some(PrimaryResponse {
            status,
            content_type: if mime_type.is_empty() {
                None
            } else {
                Some(mime_type)
            },
        }))
    }

    async fn primary_body(&self) -> Result<Option<Vec<u8>>> {
        let guard = self.primary.lock().await;
        let Some(primary) = guard.as_ref() else {
            return Ok(None);
        };

        let params = network::GetResponseBodyParams::builder()
            .request_id(primary.request_id.clone())
            .build()
            .map_err(RpxError::Browser)?;
        let response = match self.page.execute(params).await {
            Ok(response) => response,
            // The renderer reports a missing buffer as a protocol error.
            Err(e) if e.to_string().contains("No resource") || e.to_string().contains("No data") => {
                return Ok(None);
            }
            Err(e) => {
                return Err(RpxError::extraction(format!(
                    "failed to read response body: {e}"
                )))
            }
        };

        let returns = response.result;
        if returns.body.is_empty() {
            return Ok(None);
        }
        let bytes = if returns.base64_encoded {
            BASE64
                .decode(returns.body.as_bytes())
                .map_err(|e| RpxError::extraction(format!("response body decode failed: {e}")))?
        } else {
            returns.body.into_bytes()
        };
        Ok(Some(bytes))
    }

    async fn rendered_html(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| RpxError::extraction(format!("failed to read rendered HTML: {e}")))
    }

    async fn post_form(&self, target: &Url, body: &str) -> Result<InPageResponse> {
        let target_literal = serde_json::to_string(target.as_str())?;
        let body_literal = serde_json::to_string(body)?;

        let script = format!(
            r#"
            (async () => {{
                try {{
                    const response = await fetch({target_literal}, {{
                        method: 'POST',
                        credentials: 'include',
                        headers: {{ 'Content-Type': 'application/x-www-form-urlencoded' }},
                        body: {body_literal},
                    }});
                    const buffer = await response.arrayBuffer();
                    const bytes = new Uint8Array(buffer);
                    let binary = '';
                    for (let i = 0; i < bytes.length; i++) {{
                        binary += String.fromCharCode(bytes[i]);
                    }}
                    return {{
                        status: response.status,
                        headers: Object.fromEntries(response.headers.entries()),
                        data: btoa(binary),
                    }};
                }} catch (e) {{
                    return {{ error: e.toString() }};
                }}
            }})()
            "#
        );

        let result: serde_json::Value = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| RpxError::extraction(format!("in-page request failed: {e}")))?
            .into_value()
            .map_err(|e| RpxError::extraction(format!("unreadable in-page result: {e}")))?;

        if let Some(error) = result.get("error").and_then(|e| e.as_str()) {
            return Err(RpxError::extraction(format!("in-page fetch failed: {error}")));
        }

        let status = result
            .get("status")
            .and_then(|s| s.as_u64())
            .ok_or_else(|| RpxError::extraction("in-page result missing status"))?
            as u16;
        let headers = result
            .get("headers")
            .and_then(|h| h.as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect::<HashMap<_, _>>()
            })
            .unwrap_or_default();
        let body = result
            .get("data")
            .and_then(|d| d.as_str())
            .map(|b64| {
                BASE64
                    .decode(b64)
                    .map_err(|e| RpxError::extraction(format!("in-page body decode failed: {e}")))
            })
            .transpose()?
            .unwrap_or_default();

        Ok(InPageResponse {
            status,
            headers,
            body,
        })
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.page.clone().close().await {
            warn!(error = %e, "page close reported an error");
        }
        Ok(())
    }
}
