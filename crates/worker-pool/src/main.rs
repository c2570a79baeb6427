//! Shotdiff worker binary.
//!
//! Polls the capture and diff queues and runs leased tasks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::RecvTimeoutError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shotdiff_tools::HttpFetcher;
use shotdiff_worker::engine::{Completion, Engine};
use shotdiff_worker::fetch::FetchProcessor;
use shotdiff_worker::process::ProcessProcessor;
use shotdiff_worker::tasks::{CaptureRunner, DiffRunner, TaskSettings};
use shotdiff_worker::{PollerConfig, QueuePoller, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shotdiff_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    tracing::info!("Starting Shotdiff worker");

    let config = WorkerConfig::from_env()?;
    tracing::info!(
        worker_id = %config.worker_id,
        owner = %config.owner,
        server_url = %config.server_url,
        capture_queue = %config.capture_queue,
        diff_queue = %config.diff_queue,
        "Worker configuration loaded"
    );

    let engine = Engine::builder()
        .pool(config.fetch_threads, || FetchProcessor::new(HttpFetcher::new()))
        .pool(config.process_threads, ProcessProcessor::new)
        .timer_pool()
        .build()?;
    let engine = Arc::new(engine);

    engine.submit(QueuePoller::new(
        PollerConfig::from_worker(&config, &config.capture_queue),
        CaptureRunner::new(TaskSettings::capture(&config)),
    ))?;
    engine.submit(QueuePoller::new(
        PollerConfig::from_worker(&config, &config.diff_queue),
        DiffRunner::new(TaskSettings::diff(&config)),
    ))?;

    let exited = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || wait_for_exit(&engine))
    };

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received");
        }
        completion = exited => {
            if let Ok(Some(completion)) = completion {
                match completion.result {
                    Ok(_) => tracing::warn!(kind = completion.kind, "Queue poller exited"),
                    Err(e) => tracing::error!(kind = completion.kind, error = %e, "Queue poller failed"),
                }
            }
        }
    }

    tracing::info!("Shutting down worker");
    let stopping = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || stopping.shutdown()).await?;

    tracing::info!("Worker stopped");
    Ok(())
}

/// Block until a root workflow ends or the engine stops.
fn wait_for_exit(engine: &Engine) -> Option<Completion> {
    while engine.is_running() {
        match engine.completions().recv_timeout(Duration::from_millis(200)) {
            Ok(completion) => return Some(completion),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
    None
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
