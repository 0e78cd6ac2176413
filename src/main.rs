mod cli;
mod settings;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use rpx_lib::{
    build_router, AdmissionGate, AppState, BrowserSession, Config, RenderPipeline, RpxError,
    SubmitPipeline,
};

/// Bound on how long shutdown waits for in-flight renders to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    let raw_args: Vec<String> = std::env::args().collect();
    let args = cli::parse();
    init_tracing(args.verbose);

    match run(&raw_args, args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(raw_args: &[String], args: cli::Cli) -> rpx_lib::Result<()> {
    let file_config = Config::load(args.config.as_deref())?;
    let flags = settings::FlagSources::from_args(raw_args);
    let config = settings::resolve_settings(&args, file_config, &flags);
    config.validate()?;

    let session = Arc::new(BrowserSession::launch(config.session.clone()).await?);
    let gate = AdmissionGate::new(config.gate.max_concurrency);

    let render = Arc::new(RenderPipeline::new(
        session.clone(),
        gate.clone(),
        config.navigation.clone(),
        config.challenge.clone(),
    ));
    let submit = Arc::new(SubmitPipeline::new(
        session.clone(),
        gate.clone(),
        config.navigation.clone(),
        config.submit.settle_delay,
    ));
    let state = AppState {
        render,
        submit,
        submit_defaults: config.submit.clone(),
    };

    let addr = format!("{}:{}", config.listen.host, config.listen.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(
        addr,
        max_concurrency = config.gate.max_concurrency,
        wait_until = %config.navigation.wait_until,
        "rpx listening"
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(RpxError::Io)?;

    // The session is shared by every request: let admissions drain before it
    // goes away, then close it exactly once.
    info!("draining in-flight operations");
    match tokio::time::timeout(DRAIN_TIMEOUT, gate.drain()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "drain failed"),
        Err(_) => warn!("drain timed out; closing session with operations possibly in flight"),
    }
    session.close().await;

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "rpx=debug,rpx_lib=debug,tower_http=debug"
    } else {
        "rpx=info,rpx_lib=info,tower_http=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
