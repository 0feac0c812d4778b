mod handlers;
mod routes;

use anyhow::Context;
use codetest_common::config::{ServiceConfig, SubmissionLimits};
use codetest_engine::Executor;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

pub struct AppState {
    pub executor: Executor,
    pub limits: SubmissionLimits,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("codetest API booting...");

    let config = ServiceConfig::from_env().map_err(|e| {
        error!("Failed to load configuration: {:#}", e);
        e
    })?;

    info!(
        interpreter = %config.runner.interpreter,
        time_limit_ms = config.runner.time_limit_ms,
        max_concurrent_runs = ?config.dispatcher.max_concurrent_runs,
        submission_deadline_ms = ?config.dispatcher.submission_deadline_ms,
        comparison = ?config.comparison,
        "Configuration loaded"
    );

    let state = Arc::new(AppState {
        executor: Executor::from_config(&config),
        limits: config.limits.clone(),
    });

    let app = routes::routes(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("HTTP server listening on {}", config.bind_addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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

    warn!("Received shutdown signal, finishing in-flight submissions...");
}
