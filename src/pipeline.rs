//! Render and submit orchestration.
//!
//! Each operation runs the same outer shape: wait at the admission gate, open
//! one page from the shared session, do the work, then tear the page down and
//! give the slot back on every path. The permit is an RAII guard and the
//! page close runs after the work's result is captured, so navigation
//! failures, extraction errors, and challenge timeouts all release exactly
//! the resources they acquired.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{ForwardedHeaders, PageAutomator, PageHandle};
use crate::challenge::{classify, ChallengeState};
use crate::config::{ChallengeConfig, NavigationConfig};
use crate::gate::AdmissionGate;
use crate::{Result, RpxError};

/// One inbound render call. Created on request entry, discarded after the
/// response is sent; owns exactly one page for its duration.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Validated absolute target.
    pub url: Url,
    /// Return the primary response bytes verbatim instead of rendered HTML.
    pub raw: bool,
    pub headers: ForwardedHeaders,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// JS-executed DOM serialized to HTML.
    Html(String),
    /// Primary response passthrough: origin status, content type, bytes.
    Raw {
        status: u16,
        content_type: String,
        body: Vec<u8>,
    },
    /// Raw mode, but the origin sent no body.
    Empty,
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub target: Url,
    /// Form-encoded POST body, already shape-validated.
    pub form_body: String,
    /// Same-origin path visited before the POST.
    pub referer_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Expected shape of a submit form body: two numeric fields.
fn form_body_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=[0-9]+&[A-Za-z_][A-Za-z0-9_]*=[0-9]+$")
            .expect("form body pattern compiles")
    })
}

/// Reject malformed submit bodies before any slot or page is acquired.
pub fn validate_form_body(data: &str) -> Result<()> {
    if form_body_pattern().is_match(data) {
        Ok(())
    } else {
        Err(RpxError::invalid_request(
            "data must be two form-encoded numeric fields (key=123&key=456)",
        ))
    }
}

/// Drives one render end-to-end behind the admission gate.
pub struct RenderPipeline {
    automator: Arc<dyn PageAutomator>,
    gate: AdmissionGate,
    navigation: NavigationConfig,
    challenge: ChallengeConfig,
}

impl RenderPipeline {
    pub fn new(
        automator: Arc<dyn PageAutomator>,
        gate: AdmissionGate,
        navigation: NavigationConfig,
        challenge: ChallengeConfig,
    ) -> Self {
        Self {
            automator,
            gate,
            navigation,
            challenge,
        }
    }

    pub async fn render(&self, request: RenderRequest) -> Result<RenderOutcome> {
        let _permit = self.gate.acquire().await?;
        debug!(url = %request.url, raw = request.raw, "render admitted");

        let page = self.automator.open_page().await?;
        let result = self.drive(page.as_ref(), &request).await;
        if let Err(e) = page.close().await {
            warn!(url = %request.url, error = %e, "page teardown failed");
        }
        result
    }

    async fn drive(&self, page: &dyn PageHandle, request: &RenderRequest) -> Result<RenderOutcome> {
        if !request.headers.is_empty() {
            page.apply_headers(&request.headers).await?;
        }

        let response = page
            .navigate(&request.url, self.navigation.wait_until, self.navigation.timeout)
            .await?;
        let Some(response) = response else {
            return Err(RpxError::navigation(format!(
                "no response received for {}",
                request.url
            )));
        };

        if request.raw {
            // Raw mode mirrors the origin; challenge detection never runs.
            let Some(body) = page.primary_body().await? else {
                return Ok(RenderOutcome::Empty);
            };
            let content_type = response
                .content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string());
            return Ok(RenderOutcome::Raw {
                status: response.status,
                content_type,
                body,
            });
        }

        let mut html = page.rendered_html().await?;
        if classify(&html) == ChallengeState::Clear {
            return Ok(RenderOutcome::Html(html));
        }

        for (attempt, backoff) in [self.challenge.first_backoff, self.challenge.second_backoff]
            .into_iter()
            .enumerate()
        {
            info!(
                url = %request.url,
                attempt = attempt + 1,
                backoff_secs = backoff.as_secs_f32(),
                "challenge detected, waiting before re-read"
            );
            tokio::time::sleep(backoff).await;
            html = page.rendered_html().await?;
            if classify(&html) == ChallengeState::Clear {
                return Ok(RenderOutcome::Html(html));
            }
        }

        Err(RpxError::Challenge(format!(
            "interstitial still present after retries for {}",
            request.url
        )))
    }
}

/// Replays a form POST from inside the authenticated session.
pub struct SubmitPipeline {
    automator: Arc<dyn PageAutomator>,
    gate: AdmissionGate,
    navigation: NavigationConfig,
    settle_delay: Duration,
}

impl SubmitPipeline {
    pub fn new(
        automator: Arc<dyn PageAutomator>,
        gate: AdmissionGate,
        navigation: NavigationConfig,
        settle_delay: Duration,
    ) -> Self {
        Self {
            automator,
            gate,
            navigation,
            settle_delay,
        }
    }

    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome> {
        validate_form_body(&request.form_body)?;

        let _permit = self.gate.acquire().await?;
        debug!(target = %request.target, "submit admitted");

        let page = self.automator.open_page().await?;
        let result = self.drive(page.as_ref(), &request).await;
        if let Err(e) = page.close().await {
            warn!(target = %request.target, error = %e, "page teardown failed");
        }
        result
    }

    async fn drive(&self, page: &dyn PageHandle, request: &SubmitRequest) -> Result<SubmitOutcome> {
        if !request.referer_path.starts_with('/') {
            return Err(RpxError::invalid_request(
                "refererPath must be an absolute path on the target origin",
            ));
        }
        let warmup = request
            .target
            .join(&request.referer_path)
            .map_err(|e| RpxError::invalid_request(format!("invalid referer path: {e}")))?;

        // Visit the origin first so the browser's own referer and cookie
        // handling match a prior visit, then give any automatic interstitial
        // time to resolve itself.
        page.navigate(&warmup, self.navigation.wait_until, self.navigation.timeout)
            .await?;
        tokio::time::sleep(self.settle_delay).await;

        let response = page.post_form(&request.target, &request.form_body).await?;
        if !response.is_success() {
            return Err(RpxError::origin(
                response.status,
                format!("submit target returned status {}", response.status),
            ));
        }

        Ok(SubmitOutcome {
            status: response.status,
            headers: response.headers,
            body: response.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{InPageResponse, PrimaryResponse, WaitStrategy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Clone)]
    enum NavPlan {
        Respond { status: u16, content_type: Option<&'static str> },
        NoResponse,
        Fail(&'static str),
    }

    #[derive(Clone)]
    enum HtmlPlan {
        Reads(Vec<&'static str>),
        Fails(&'static str),
    }

    #[derive(Clone)]
    struct StubPlan {
        nav: NavPlan,
        body: Option<Vec<u8>>,
        html: HtmlPlan,
        post_status: u16,
        post_body: Vec<u8>,
    }

    impl Default for StubPlan {
        fn default() -> Self {
            Self {
                nav: NavPlan::Respond {
                    status: 200,
                    content_type: Some("text/html"),
                },
                body: Some(b"<html>ok</html>".to_vec()),
                html: HtmlPlan::Reads(vec!["<html>ok</html>"]),
                post_status: 200,
                post_body: b"%PDF-1.7 stub".to_vec(),
            }
        }
    }

    struct StubAutomator {
        plan: StubPlan,
        pages_opened: AtomicUsize,
        pages_closed: Arc<AtomicUsize>,
        visits: Arc<tokio::sync::Mutex<Vec<String>>>,
    }

    impl StubAutomator {
        fn new(plan: StubPlan) -> Self {
            Self {
                plan,
                pages_opened: AtomicUsize::new(0),
                pages_closed: Arc::new(AtomicUsize::new(0)),
                visits: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl PageAutomator for StubAutomator {
        async fn open_page(&self) -> Result<Box<dyn PageHandle>> {
            self.pages_opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubPage {
                plan: self.plan.clone(),
                html_reads: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                closed_counter: self.pages_closed.clone(),
                visits: self.visits.clone(),
            }))
        }
    }

    struct StubPage {
        plan: StubPlan,
        html_reads: AtomicUsize,
        closed: AtomicBool,
        closed_counter: Arc<AtomicUsize>,
        visits: Arc<tokio::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PageHandle for StubPage {
        async fn apply_headers(&self, _headers: &ForwardedHeaders) -> Result<()> {
            Ok(())
        }

        async fn navigate(
            &self,
            url: &Url,
            _wait: WaitStrategy,
            _timeout: Duration,
        ) -> Result<Option<PrimaryResponse>> {
            self.visits.lock().await.push(url.to_string());
            match &self.plan.nav {
                NavPlan::Respond {
                    status,
                    content_type,
                } => Ok(Some(PrimaryResponse {
                    status: *status,
                    content_type: content_type.map(str::to_string),
                })),
                NavPlan::NoResponse => Ok(None),
                NavPlan::Fail(msg) => Err(RpxError::navigation(*msg)),
            }
        }

        async fn primary_body(&self) -> Result<Option<Vec<u8>>> {
            Ok(self.plan.body.clone())
        }

        async fn rendered_html(&self) -> Result<String> {
            match &self.plan.html {
                HtmlPlan::Fails(msg) => Err(RpxError::extraction(*msg)),
                HtmlPlan::Reads(reads) => {
                    let idx = self.html_reads.fetch_add(1, Ordering::SeqCst);
                    Ok(reads[idx.min(reads.len() - 1)].to_string())
                }
            }
        }

        async fn post_form(&self, _target: &Url, _body: &str) -> Result<InPageResponse> {
            Ok(InPageResponse {
                status: self.plan.post_status,
                headers: HashMap::from([(
                    "content-type".to_string(),
                    "application/octet-stream".to_string(),
                )]),
                body: self.plan.post_body.clone(),
            })
        }

        async fn close(&self) -> Result<()> {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.closed_counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    fn render_pipeline(automator: Arc<StubAutomator>, gate: AdmissionGate) -> RenderPipeline {
        RenderPipeline::new(
            automator,
            gate,
            NavigationConfig::default(),
            ChallengeConfig::default(),
        )
    }

    fn submit_pipeline(automator: Arc<StubAutomator>, gate: AdmissionGate) -> SubmitPipeline {
        SubmitPipeline::new(
            automator,
            gate,
            NavigationConfig::default(),
            Duration::from_secs(1),
        )
    }

    fn render_request(raw: bool) -> RenderRequest {
        RenderRequest {
            url: Url::parse("https://origin.example/page").unwrap(),
            raw,
            headers: ForwardedHeaders::default(),
        }
    }

    #[tokio::test]
    async fn clear_page_returns_html() {
        let automator = Arc::new(StubAutomator::new(StubPlan::default()));
        let gate = AdmissionGate::new(2);
        let pipeline = render_pipeline(automator.clone(), gate.clone());

        let outcome = pipeline.render(render_request(false)).await.unwrap();
        assert_eq!(outcome, RenderOutcome::Html("<html>ok</html>".to_string()));
        assert_eq!(automator.pages_closed.load(Ordering::SeqCst), 1);
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test]
    async fn missing_response_is_navigation_error() {
        let automator = Arc::new(StubAutomator::new(StubPlan {
            nav: NavPlan::NoResponse,
            ..StubPlan::default()
        }));
        let gate = AdmissionGate::new(1);
        let pipeline = render_pipeline(automator.clone(), gate.clone());

        let err = pipeline.render(render_request(false)).await.unwrap_err();
        assert!(matches!(err, RpxError::Navigation(_)));
        assert!(err.to_string().contains("https://origin.example/page"));
        assert_eq!(automator.pages_closed.load(Ordering::SeqCst), 1);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn navigation_failure_releases_resources() {
        let automator = Arc::new(StubAutomator::new(StubPlan {
            nav: NavPlan::Fail("connection refused"),
            ..StubPlan::default()
        }));
        let gate = AdmissionGate::new(1);
        let pipeline = render_pipeline(automator.clone(), gate.clone());

        let err = pipeline.render(render_request(false)).await.unwrap_err();
        assert_eq!(err.http_status(), 502);
        assert_eq!(automator.pages_closed.load(Ordering::SeqCst), 1);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn challenged_then_clear_recovers_on_retry() {
        let automator = Arc::new(StubAutomator::new(StubPlan {
            html: HtmlPlan::Reads(vec![
                "<title>Just a moment...</title>",
                "<html>real content</html>",
            ]),
            ..StubPlan::default()
        }));
        let gate = AdmissionGate::new(1);
        let pipeline = render_pipeline(automator.clone(), gate.clone());

        let outcome = pipeline.render(render_request(false)).await.unwrap();
        assert_eq!(
            outcome,
            RenderOutcome::Html("<html>real content</html>".to_string())
        );
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_challenge_fails_after_bounded_retries() {
        let automator = Arc::new(StubAutomator::new(StubPlan {
            html: HtmlPlan::Reads(vec!["<title>Just a moment...</title>"]),
            ..StubPlan::default()
        }));
        let gate = AdmissionGate::new(1);
        let pipeline = render_pipeline(automator.clone(), gate.clone());

        let err = pipeline.render(render_request(false)).await.unwrap_err();
        assert!(matches!(err, RpxError::Challenge(_)));
        assert_eq!(err.http_status(), 403);
        assert_eq!(automator.pages_closed.load(Ordering::SeqCst), 1);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn raw_mode_bypasses_challenge_detection() {
        let automator = Arc::new(StubAutomator::new(StubPlan {
            nav: NavPlan::Respond {
                status: 200,
                content_type: Some("text/html"),
            },
            // Body that would classify as challenged if anyone looked.
            body: Some(b"<title>Just a moment...</title>".to_vec()),
            ..StubPlan::default()
        }));
        let gate = AdmissionGate::new(1);
        let pipeline = render_pipeline(automator.clone(), gate.clone());

        let outcome = pipeline.render(render_request(true)).await.unwrap();
        assert_eq!(
            outcome,
            RenderOutcome::Raw {
                status: 200,
                content_type: "text/html".to_string(),
                body: b"<title>Just a moment...</title>".to_vec(),
            }
        );
    }

    #[tokio::test]
    async fn raw_mode_defaults_binary_content_type() {
        let automator = Arc::new(StubAutomator::new(StubPlan {
            nav: NavPlan::Respond {
                status: 206,
                content_type: None,
            },
            body: Some(vec![0x1f, 0x8b, 0x08]),
            ..StubPlan::default()
        }));
        let pipeline = render_pipeline(automator, AdmissionGate::new(1));

        match pipeline.render(render_request(true)).await.unwrap() {
            RenderOutcome::Raw {
                status,
                content_type,
                body,
            } => {
                assert_eq!(status, 206);
                assert_eq!(content_type, "application/octet-stream");
                assert_eq!(body, vec![0x1f, 0x8b, 0x08]);
            }
            other => panic!("expected raw outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn raw_mode_without_body_is_empty() {
        let automator = Arc::new(StubAutomator::new(StubPlan {
            body: None,
            ..StubPlan::default()
        }));
        let pipeline = render_pipeline(automator, AdmissionGate::new(1));

        let outcome = pipeline.render(render_request(true)).await.unwrap();
        assert_eq!(outcome, RenderOutcome::Empty);
    }

    #[tokio::test]
    async fn extraction_failure_releases_resources() {
        let automator = Arc::new(StubAutomator::new(StubPlan {
            html: HtmlPlan::Fails("target crashed mid-read"),
            ..StubPlan::default()
        }));
        let gate = AdmissionGate::new(1);
        let pipeline = render_pipeline(automator.clone(), gate.clone());

        let err = pipeline.render(render_request(false)).await.unwrap_err();
        assert!(matches!(err, RpxError::Extraction(_)));
        assert_eq!(automator.pages_closed.load(Ordering::SeqCst), 1);
        assert_eq!(gate.available(), 1);
    }

    fn submit_request() -> SubmitRequest {
        SubmitRequest {
            target: Url::parse("https://origin.example/download").unwrap(),
            form_body: "file_id=42&token=99821".to_string(),
            referer_path: "/downloads".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn submit_warms_up_then_posts() {
        let automator = Arc::new(StubAutomator::new(StubPlan::default()));
        let gate = AdmissionGate::new(1);
        let pipeline = submit_pipeline(automator.clone(), gate.clone());

        let outcome = pipeline.submit(submit_request()).await.unwrap();
        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.body, b"%PDF-1.7 stub".to_vec());

        let visits = automator.visits.lock().await.clone();
        assert_eq!(visits, vec!["https://origin.example/downloads".to_string()]);
        assert_eq!(automator.pages_closed.load(Ordering::SeqCst), 1);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_origin_failure_mirrors_status() {
        let automator = Arc::new(StubAutomator::new(StubPlan {
            post_status: 503,
            ..StubPlan::default()
        }));
        let gate = AdmissionGate::new(1);
        let pipeline = submit_pipeline(automator.clone(), gate.clone());

        let err = pipeline.submit(submit_request()).await.unwrap_err();
        assert_eq!(err.http_status(), 503);
        assert_eq!(automator.pages_closed.load(Ordering::SeqCst), 1);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn malformed_form_body_is_rejected_before_admission() {
        let automator = Arc::new(StubAutomator::new(StubPlan::default()));
        let gate = AdmissionGate::new(1);
        let pipeline = submit_pipeline(automator.clone(), gate.clone());

        let mut request = submit_request();
        request.form_body = "file_id=abc&token=1".to_string();
        let err = pipeline.submit(request).await.unwrap_err();

        assert_eq!(err.http_status(), 400);
        assert_eq!(automator.pages_opened.load(Ordering::SeqCst), 0, "no page wasted");
    }

    #[test]
    fn form_body_validation_matrix() {
        assert!(validate_form_body("file_id=42&token=99821").is_ok());
        assert!(validate_form_body("a=1&b=2").is_ok());
        assert!(validate_form_body("file_id=42").is_err());
        assert!(validate_form_body("file_id=42&token=abc").is_err());
        assert!(validate_form_body("file_id=42&token=1&extra=2").is_err());
        assert!(validate_form_body("=1&b=2").is_err());
        assert!(validate_form_body("").is_err());
    }
}
