use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Browser viewport dimensions applied to the shared session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

#[derive(Debug, Error)]
pub enum ViewportParseError {
    #[error("Invalid viewport format: expected WIDTHxHEIGHT (e.g., 1280x800)")]
    InvalidFormat,
    #[error("Invalid viewport dimension: {0}")]
    InvalidDimension(String),
    #[error("Viewport dimensions must be positive")]
    ZeroDimension,
}

impl FromStr for Viewport {
    type Err = ViewportParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s.split_once('x').ok_or(ViewportParseError::InvalidFormat)?;

        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| ViewportParseError::InvalidDimension(w.trim().to_string()))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| ViewportParseError::InvalidDimension(h.trim().to_string()))?;

        if width == 0 || height == 0 {
            return Err(ViewportParseError::ZeroDimension);
        }

        Ok(Viewport { width, height })
    }
}

impl std::fmt::Display for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
