//! PostgreSQL task store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::TaskStore;
use crate::db::models::{CancelRequest, FinishRequest, HeartbeatRequest, QueuedTask, TaskStatus};
use crate::db::{pool, queries::task as q, DbPool};
use crate::error::{AppError, AppResult};
use crate::lease;

/// Task store over `shotdiff.work_queue`, locking rows with `FOR UPDATE`.
#[derive(Clone)]
pub struct PgTaskStore {
    db: DbPool,
}

impl PgTaskStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &DbPool {
        &self.db
    }

    /// Lock one row, apply `f`, write it back and commit. Rolls back if `f` fails.
    async fn update_locked<T: Send>(
        &self,
        queue: &str,
        task_id: &str,
        f: impl FnOnce(&mut QueuedTask) -> AppResult<T> + Send,
    ) -> AppResult<T> {
        let mut tx = self.db.begin().await?;

        let mut task = q::select_for_update(&mut *tx, queue, task_id)
            .await?
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;

        let before = task.clone();
        let out = f(&mut task)?;
        if task != before {
            q::update_task(&mut *tx, &task).await?;
        }

        tx.commit().await?;
        Ok(out)
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn add(&self, task: QueuedTask) -> AppResult<bool> {
        q::insert_task(&self.db, &task).await
    }

    async fn lease(
        &self,
        queue: &str,
        owner: &str,
        count: u32,
        timeout_seconds: f64,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<QueuedTask>> {
        let mut tx = self.db.begin().await?;

        let mut tasks = q::select_leasable_for_update(&mut *tx, queue, now, i64::from(count)).await?;
        for task in tasks.iter_mut() {
            lease::apply_lease(task, owner, timeout_seconds, now)?;
            q::update_task(&mut *tx, task).await?;
        }

        tx.commit().await?;
        Ok(tasks)
    }

    async fn heartbeat(
        &self,
        queue: &str,
        request: &HeartbeatRequest,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        self.update_locked(queue, &request.task_id, |task| {
            lease::apply_heartbeat(task, request, now)
        })
        .await
    }

    async fn finish(
        &self,
        queue: &str,
        request: &FinishRequest,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        self.update_locked(queue, &request.task_id, |task| {
            lease::apply_finish(task, request, now)
        })
        .await
    }

    async fn cancel(
        &self,
        queue: &str,
        filter: &CancelRequest,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        q::cancel_matching(&self.db, queue, filter, now).await
    }

    async fn get(&self, queue: &str, task_id: &str) -> AppResult<Option<QueuedTask>> {
        q::get_task(&self.db, queue, task_id).await
    }

    async fn list(
        &self,
        queue: &str,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> AppResult<Vec<QueuedTask>> {
        q::list_tasks(&self.db, queue, status, limit).await
    }

    async fn health(&self) -> bool {
        pool::health_check(&self.db).await
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}
