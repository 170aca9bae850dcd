use clap::Parser;
use tracing::{error, info};

mod cli;
mod data_dir;

use grokgate_core::bootstrap;
use grokgate_router::app_router;

use crate::cli::Cli;
use crate::data_dir::{prepare_data_dir, resolve_data_dir};

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        error!(event = "startup_failed", error = %format!("{err:#}"));
        eprintln!("grokgate failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let mut patch = Cli::parse().into_patch();
    let data_dir = resolve_data_dir(patch.data_dir.as_deref());
    prepare_data_dir(&data_dir)?;
    patch.data_dir = Some(data_dir.display().to_string());

    let config = patch.into_config()?;
    info!(event = "config_loaded", config = ?config.redacted());
    if config.custom_sso {
        info!(event = "custom_sso_mode", "caller bearer keys are forwarded as upstream credentials");
    }

    let bind = format!("{}:{}", config.host, config.port);
    let state = bootstrap(config).await?;
    let app = app_router(state.clone());

    serve(app, &bind).await?;
    state.pool.shutdown().await;
    info!(event = "shutdown_complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("grokgate=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(app: axum::Router, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(event = "listening", addr = %bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(event = "signal_listener_failed", error = %err);
        std::future::pending::<()>().await;
    }
    info!(event = "shutdown_requested");
}
