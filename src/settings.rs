use std::time::Duration;

use rpx_lib::Config;

use crate::cli::Cli;

/// Tracks which CLI flags were explicitly provided vs. defaulted, so an
/// explicit flag beats the config file and a default does not.
#[derive(Debug, Default)]
pub struct FlagSources {
    pub host: bool,
    pub port: bool,
    pub max_concurrency: bool,
    pub nav_timeout: bool,
    pub wait_until: bool,
    pub profile_dir: bool,
    pub viewport: bool,
    pub headed: bool,
}

impl FlagSources {
    pub fn from_args(args: &[String]) -> Self {
        Self {
            host: flag_present(args, "--host"),
            port: flag_present(args, "--port"),
            max_concurrency: flag_present(args, "--max-concurrency"),
            nav_timeout: flag_present(args, "--nav-timeout"),
            wait_until: flag_present(args, "--wait-until"),
            profile_dir: flag_present(args, "--profile-dir"),
            viewport: flag_present(args, "--viewport"),
            headed: flag_present(args, "--headed"),
        }
    }
}

/// Checks if a flag was present in the command-line arguments.
pub fn flag_present(args: &[String], flag: &str) -> bool {
    args.iter()
        .any(|arg| arg == flag || arg.starts_with(&format!("{flag}=")))
}

/// Merge CLI arguments into the file config, preferring CLI where flags were
/// explicitly passed.
pub fn resolve_settings(cli: &Cli, mut config: Config, flags: &FlagSources) -> Config {
    if flags.host {
        config.listen.host = cli.host.clone();
    }
    if flags.port {
        config.listen.port = cli.port;
    }
    if flags.max_concurrency {
        config.gate.max_concurrency = cli.max_concurrency;
    }
    if flags.nav_timeout {
        config.navigation.timeout = Duration::from_secs(cli.nav_timeout);
    }
    if flags.wait_until {
        config.navigation.wait_until = cli.wait_until.into();
    }
    if flags.viewport {
        config.session.viewport = cli.viewport;
    }
    if flags.headed {
        config.session.headless = false;
    }
    if let Some(dir) = &cli.profile_dir {
        if flags.profile_dir {
            config.session.profile_dir = dir.clone();
        }
    }
    config
}
