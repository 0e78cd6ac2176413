//! HTTP plumbing over the render and submit pipelines.
//!
//! The handlers only parse inputs, forward caller headers, and translate
//! pipeline results into the status/body contract; everything with real
//! failure semantics lives behind them.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;
use url::Url;

use crate::browser::ForwardedHeaders;
use crate::config::SubmitConfig;
use crate::pipeline::{
    validate_form_body, RenderOutcome, RenderPipeline, RenderRequest, SubmitPipeline,
    SubmitRequest,
};
use crate::RpxError;

#[derive(Clone)]
pub struct AppState {
    pub render: Arc<RenderPipeline>,
    pub submit: Arc<SubmitPipeline>,
    pub submit_defaults: SubmitConfig,
}

/// Build the service router. Responses are CORS-open so rendered content can
/// be read cross-origin.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/render", get(render_handler))
        .route("/download-submit", post(submit_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RenderParams {
    url: Option<String>,
    raw: Option<bool>,
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn render_handler(
    State(state): State<AppState>,
    Query(params): Query<RenderParams>,
    headers: HeaderMap,
) -> Response {
    let Some(raw_url) = params.url else {
        return error_response(&RpxError::invalid_request(
            "missing required query parameter 'url'",
        ));
    };

    let url = match Url::parse(&raw_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url,
        Ok(url) => {
            return error_response(&RpxError::invalid_request(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )))
        }
        Err(e) => return error_response(&RpxError::InvalidUrl(e)),
    };

    let request = RenderRequest {
        url,
        raw: params.raw.unwrap_or(false),
        headers: forwarded_headers(&headers),
    };

    match state.render.render(request).await {
        Ok(RenderOutcome::Html(html)) => (
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            html,
        )
            .into_response(),
        Ok(RenderOutcome::Raw {
            status,
            content_type,
            body,
        }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = HeaderValue::from_str(&content_type)
                .unwrap_or(HeaderValue::from_static("application/octet-stream"));
            (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Ok(RenderOutcome::Empty) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody {
    url: Option<String>,
    data: Option<String>,
    referer_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    success: bool,
    data: String,
    status_code: u16,
    headers: HashMap<String, String>,
    buffer_size: usize,
}

#[derive(Debug, Serialize)]
struct SubmitFailure {
    success: bool,
    error: String,
}

async fn submit_handler(
    State(state): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> Response {
    let Some(data) = body.data else {
        return submit_error(&RpxError::invalid_request("missing required field 'data'"));
    };
    if let Err(e) = validate_form_body(&data) {
        return submit_error(&e);
    }

    let target = body
        .url
        .or_else(|| state.submit_defaults.target_url.clone());
    let Some(target) = target else {
        return submit_error(&RpxError::invalid_request(
            "no target: request has no 'url' and no default is configured",
        ));
    };
    let target = match Url::parse(&target) {
        Ok(url) => url,
        Err(e) => return submit_error(&RpxError::InvalidUrl(e)),
    };

    let request = SubmitRequest {
        target,
        form_body: data,
        referer_path: body
            .referer_path
            .unwrap_or_else(|| state.submit_defaults.referer_path.clone()),
    };

    match state.submit.submit(request).await {
        Ok(outcome) => {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&outcome.body);
            Json(SubmitResponse {
                success: true,
                data: encoded,
                status_code: outcome.status,
                headers: outcome.headers,
                buffer_size: outcome.body.len(),
            })
            .into_response()
        }
        Err(e) => submit_error(&e),
    }
}

fn forwarded_headers(headers: &HeaderMap) -> ForwardedHeaders {
    let get = |name: header::HeaderName| {
        headers
            .get(&name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    ForwardedHeaders {
        user_agent: get(header::USER_AGENT),
        referer: get(header::REFERER),
        accept_language: get(header::ACCEPT_LANGUAGE),
    }
}

fn error_response(err: &RpxError) -> Response {
    let status = response_status(err);
    if status.is_server_error() {
        error!(error = %err, "request failed");
    }
    (status, Json(err.to_payload())).into_response()
}

fn submit_error(err: &RpxError) -> Response {
    let status = response_status(err);
    if status.is_server_error() {
        error!(error = %err, "submit failed");
    }
    (
        status,
        Json(SubmitFailure {
            success: false,
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn response_status(err: &RpxError) -> StatusCode {
    StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
