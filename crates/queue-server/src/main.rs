//! Shotdiff Work Queue Server

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shotdiff_queue::{
    clock::SystemClock,
    config::{AppConfig, DatabaseConfig, StoreKind},
    db::{create_pool, schema},
    router::build_router,
    services::WorkQueueService,
    state::AppState,
    store::{MemoryTaskStore, PgTaskStore, TaskStore},
    ResultExt,
};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shotdiff_queue=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Shotdiff work queue"
    );

    let app_config = AppConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load app config, using defaults");
        AppConfig::default()
    });

    tracing::info!(
        host = %app_config.host,
        port = app_config.port,
        store = ?app_config.store,
        "Configuration loaded"
    );

    let (store, db) = match app_config.store {
        StoreKind::Memory => {
            tracing::warn!("Using in-memory store, tasks will not survive a restart");
            let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
            (store, None)
        }
        StoreKind::Postgres => {
            let db_config = DatabaseConfig::from_env().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to load database config, using defaults");
                DatabaseConfig::default()
            });
            let pool = create_pool(&db_config).await.log("connect to database")?;
            if app_config.init_schema {
                schema::init_schema(&pool).await.log("initialize schema")?;
            }
            let store: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(pool.clone()));
            (store, Some(pool))
        }
    };

    let service = WorkQueueService::new(store, Arc::new(SystemClock))
        .with_max_lease_count(app_config.max_lease_count);
    let state = AppState::new(service, db, app_config.clone());

    let app = build_router(state);

    let addr: SocketAddr = app_config.bind_address().parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
