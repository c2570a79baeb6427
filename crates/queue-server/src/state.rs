//! Shared application state handed to handlers through Axum.

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::services::WorkQueueService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub queue: WorkQueueService,

    /// Present when the store is Postgres
    pub db: Option<DbPool>,

    pub config: Arc<AppConfig>,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(queue: WorkQueueService, db: Option<DbPool>, config: AppConfig) -> Self {
        Self {
            queue,
            db,
            config: Arc::new(config),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
