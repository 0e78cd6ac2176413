use clap::{Parser, ValueEnum};
use rpx_lib::{Viewport, WaitStrategy};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rpx")]
#[command(
    version,
    about = "Rendering proxy - serve JavaScript-rendered pages through a persistent headless browser session",
    long_about = "Rendering proxy (RPX)\n\nDrives a single persistent headless browser session and exposes:\n- GET /render?url=...&raw=true|false: rendered HTML or raw primary-response bytes\n- POST /download-submit: replay a form POST inside the authenticated session\n- GET /health: liveness probe\n\nValues come from CLI flags, which override the optional TOML config file."
)]
pub struct Cli {
    #[arg(
        long,
        env = "RPX_CONFIG",
        value_name = "PATH",
        help = "Optional config file (TOML) to set defaults; explicit CLI flags override config"
    )]
    pub config: Option<PathBuf>,

    #[arg(long, default_value = "0.0.0.0", help = "Listen address")]
    pub host: String,

    #[arg(long, default_value = "3000", help = "Listen port")]
    pub port: u16,

    #[arg(
        long,
        default_value = "4",
        help = "Maximum render/submit operations admitted concurrently"
    )]
    pub max_concurrency: usize,

    #[arg(
        long,
        default_value = "30",
        help = "Navigation timeout (seconds) for page loads"
    )]
    pub nav_timeout: u64,

    #[arg(
        long,
        value_enum,
        default_value = "network-idle",
        help = "Navigation wait strategy"
    )]
    pub wait_until: WaitMode,

    #[arg(
        long,
        value_name = "PATH",
        help = "Browser profile directory (cookies/storage); created if missing"
    )]
    pub profile_dir: Option<PathBuf>,

    #[arg(
        long,
        default_value = "1280x800",
        help = "Browser viewport (WIDTHxHEIGHT)"
    )]
    pub viewport: Viewport,

    #[arg(long, help = "Run the browser with a visible window")]
    pub headed: bool,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WaitMode {
    /// Resolve navigation at the document load event
    Load,
    /// Resolve navigation once the network goes idle
    NetworkIdle,
}

impl From<WaitMode> for WaitStrategy {
    fn from(mode: WaitMode) -> Self {
        match mode {
            WaitMode::Load => WaitStrategy::Load,
            WaitMode::NetworkIdle => WaitStrategy::NetworkIdle,
        }
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}
