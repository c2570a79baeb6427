//! Storage backends for the work queue.
//!
//! Both backends serialize access per task row and delegate the protocol
//! decisions to [`crate::lease`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::models::{CancelRequest, FinishRequest, HeartbeatRequest, QueuedTask, TaskStatus};
use crate::error::AppResult;

mod memory;
mod postgres;

pub use memory::MemoryTaskStore;
pub use postgres::PgTaskStore;

/// Durable home of queued tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert `task` unless a task with the same id exists. Returns whether it was inserted.
    async fn add(&self, task: QueuedTask) -> AppResult<bool>;

    /// Lease up to `count` leasable tasks of `queue`, oldest eta first.
    async fn lease(
        &self,
        queue: &str,
        owner: &str,
        count: u32,
        timeout_seconds: f64,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<QueuedTask>>;

    async fn heartbeat(
        &self,
        queue: &str,
        request: &HeartbeatRequest,
        now: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Returns `false` when the task had already finished.
    async fn finish(
        &self,
        queue: &str,
        request: &FinishRequest,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Cancel live tasks matching `filter`. Returns how many changed.
    async fn cancel(
        &self,
        queue: &str,
        filter: &CancelRequest,
        now: DateTime<Utc>,
    ) -> AppResult<u64>;

    async fn get(&self, queue: &str, task_id: &str) -> AppResult<Option<QueuedTask>>;

    /// Newest first.
    async fn list(
        &self,
        queue: &str,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> AppResult<Vec<QueuedTask>>;

    async fn health(&self) -> bool;

    /// Short backend name for logs and health output.
    fn kind(&self) -> &'static str;
}
