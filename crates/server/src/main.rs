// crates/server/src/main.rs
//! bizverify server binary.
//!
//! Parses config, installs tracing and metrics, starts the retention sweeper
//! and serves until Ctrl-C or SIGTERM. Shutdown cancels every in-flight job.

use anyhow::{Context, Result};
use bizverify_server::{create_app_with_state, init_metrics, AppState, Config};
use clap::Parser;

/// Default log directives when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "warn,bizverify_server=info,bizverify_server_jobs=info";

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    bizverify_observability::init_tracing(config.log_format, DEFAULT_LOG_FILTER)?;
    init_metrics();

    let addr = config.addr();
    let policy = config.retention_policy();
    let sweep_every = config.retention_sweep_interval();
    let state = AppState::new(config);

    let sweeper = state.runner.spawn_retention_sweeper(policy, sweep_every);
    let app = create_app_with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        %addr,
        version = env!("CARGO_PKG_VERSION"),
        max_in_flight = state.runner.max_in_flight(),
        "bizverify listening"
    );

    let shutdown = state.runner.shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    state.runner.shutdown();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Retention sweeper ended abnormally");
    }
    tracing::info!("bizverify stopped");
    Ok(())
}
