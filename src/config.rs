use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::browser::WaitStrategy;
use crate::{RpxError, Viewport};

/// Process-wide configuration, read once at startup. No hot-reload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: ListenConfig,
    pub gate: GateConfig,
    pub navigation: NavigationConfig,
    pub challenge: ChallengeConfig,
    pub session: SessionConfig,
    pub submit: SubmitConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Maximum render/submit operations admitted concurrently.
    pub max_concurrency: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub wait_until: WaitStrategy,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            wait_until: WaitStrategy::NetworkIdle,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// Wait before the first re-read of a challenged page.
    #[serde(with = "humantime_serde")]
    pub first_backoff: Duration,
    /// Wait before the final re-read.
    #[serde(with = "humantime_serde")]
    pub second_backoff: Duration,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            first_backoff: Duration::from_secs(4),
            second_backoff: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Profile directory holding cookies/storage; created if absent.
    pub profile_dir: PathBuf,
    pub headless: bool,
    pub viewport: Viewport,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub locale: Option<String>,
    pub timezone: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            profile_dir: std::env::temp_dir().join("rpx-profile"),
            headless: true,
            viewport: Viewport::default(),
            user_agent: None,
            accept_language: Some("en-US,en;q=0.9".to_string()),
            locale: None,
            timezone: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    /// Default POST target when the request omits `url`.
    pub target_url: Option<String>,
    /// Same-origin path visited before the POST so referer/cookie state is warm.
    pub referer_path: String,
    /// Pause after the warm-up navigation before the in-page POST runs.
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            target_url: None,
            referer_path: "/".to_string(),
            settle_delay: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// Load from a TOML file, or return defaults when no path is given.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RpxError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&raw)
            .map_err(|e| RpxError::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.gate.max_concurrency == 0 {
            return Err(RpxError::Config(
                "gate.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.navigation.timeout.is_zero() {
            return Err(RpxError::Config(
                "navigation.timeout must be positive".to_string(),
            ));
        }
        if !self.submit.referer_path.starts_with('/') {
            return Err(RpxError::Config(
                "submit.referer_path must start with '/'".to_string(),
            ));
        }
        if let Some(target) = &self.submit.target_url {
            url::Url::parse(target)
                .map_err(|e| RpxError::Config(format!("submit.target_url is invalid: {}", e)))?;
        }
        Ok(())
    }
}
