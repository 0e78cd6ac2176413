use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::ParseError;

#[derive(Debug, Error)]
pub enum RpxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] ParseError),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Challenge was not cleared after retries: {0}")]
    Challenge(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Origin responded with status {status}: {message}")]
    Origin { status: u16, message: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unexpected error: {0}")]
    Unknown(String),
}

impl RpxError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        RpxError::InvalidRequest(message.into())
    }

    pub fn navigation(message: impl Into<String>) -> Self {
        RpxError::Navigation(message.into())
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        RpxError::Extraction(message.into())
    }

    pub fn origin(status: u16, message: impl Into<String>) -> Self {
        RpxError::Origin {
            status,
            message: message.into(),
        }
    }

    /// HTTP status this error surfaces as at the endpoint boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            RpxError::InvalidRequest(_) | RpxError::InvalidUrl(_) => 400,
            RpxError::Navigation(_) => 502,
            RpxError::Challenge(_) => 403,
            RpxError::Origin { status, .. } => *status,
            RpxError::Io(_)
            | RpxError::Extraction(_)
            | RpxError::Browser(_)
            | RpxError::Serialization(_)
            | RpxError::Config(_)
            | RpxError::Unknown(_) => 500,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let category = match self {
            RpxError::InvalidRequest(_) | RpxError::InvalidUrl(_) => ErrorCategory::Request,
            RpxError::Navigation(_) => ErrorCategory::Navigation,
            RpxError::Challenge(_) => ErrorCategory::Challenge,
            RpxError::Extraction(_) => ErrorCategory::Extraction,
            RpxError::Origin { .. } => ErrorCategory::Origin,
            RpxError::Browser(_) => ErrorCategory::Browser,
            RpxError::Io(_)
            | RpxError::Serialization(_)
            | RpxError::Config(_)
            | RpxError::Unknown(_) => ErrorCategory::Internal,
        };
        ErrorPayload {
            category,
            error: self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RpxError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Request,
    Navigation,
    Challenge,
    Extraction,
    Origin,
    Browser,
    Internal,
}

/// JSON body returned alongside a non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub category: ErrorCategory,
    pub error: String,
}
