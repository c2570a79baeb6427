//! In-process task store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::TaskStore;
use crate::db::models::{CancelRequest, FinishRequest, HeartbeatRequest, QueuedTask, TaskStatus};
use crate::error::{AppError, AppResult};
use crate::lease;

/// Tasks keyed by id behind one mutex. Holding the mutex stands in for the
/// row lock the Postgres store takes.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<String, QueuedTask>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> AppResult<MutexGuard<'_, HashMap<String, QueuedTask>>> {
        self.tasks
            .lock()
            .map_err(|_| AppError::Internal("Task store lock poisoned".to_string()))
    }

    /// Apply `f` to a task of `queue`, committing only if `f` succeeds.
    fn update<T>(
        &self,
        queue: &str,
        task_id: &str,
        f: impl FnOnce(&mut QueuedTask) -> AppResult<T>,
    ) -> AppResult<T> {
        let mut tasks = self.tasks()?;
        let stored = tasks
            .get_mut(task_id)
            .filter(|t| t.queue_name == queue)
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;

        let mut copy = stored.clone();
        let out = f(&mut copy)?;
        *stored = copy;
        Ok(out)
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn add(&self, task: QueuedTask) -> AppResult<bool> {
        let mut tasks = self.tasks()?;
        if tasks.contains_key(&task.task_id) {
            return Ok(false);
        }
        tasks.insert(task.task_id.clone(), task);
        Ok(true)
    }

    async fn lease(
        &self,
        queue: &str,
        owner: &str,
        count: u32,
        timeout_seconds: f64,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<QueuedTask>> {
        let mut tasks = self.tasks()?;

        let mut ready: Vec<&mut QueuedTask> = tasks
            .values_mut()
            .filter(|t| t.queue_name == queue && lease::is_leasable(t, now))
            .collect();
        ready.sort_by(|a, b| lease::lease_order(a, b));
        ready.truncate(count as usize);

        let mut leased = Vec::with_capacity(ready.len());
        for task in ready {
            lease::apply_lease(task, owner, timeout_seconds, now)?;
            leased.push(task.clone());
        }
        Ok(leased)
    }

    async fn heartbeat(
        &self,
        queue: &str,
        request: &HeartbeatRequest,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        self.update(queue, &request.task_id, |task| {
            lease::apply_heartbeat(task, request, now)
        })
    }

    async fn finish(
        &self,
        queue: &str,
        request: &FinishRequest,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        self.update(queue, &request.task_id, |task| {
            lease::apply_finish(task, request, now)
        })
    }

    async fn cancel(
        &self,
        queue: &str,
        filter: &CancelRequest,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let mut tasks = self.tasks()?;
        let canceled = tasks
            .values_mut()
            .filter(|t| t.queue_name == queue && filter.matches(t))
            .map(|t| lease::apply_cancel(t, now))
            .filter(|changed| *changed)
            .count();
        Ok(canceled as u64)
    }

    async fn get(&self, queue: &str, task_id: &str) -> AppResult<Option<QueuedTask>> {
        Ok(self
            .tasks()?
            .get(task_id)
            .filter(|t| t.queue_name == queue)
            .cloned())
    }

    async fn list(
        &self,
        queue: &str,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> AppResult<Vec<QueuedTask>> {
        let tasks = self.tasks()?;
        let mut found: Vec<QueuedTask> = tasks
            .values()
            .filter(|t| t.queue_name == queue && status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.task_id.cmp(&b.task_id)));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn health(&self) -> bool {
        self.tasks.lock().is_ok()
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_task(id: &str, now: DateTime<Utc>) -> QueuedTask {
        QueuedTask::new(
            id.to_string(),
            "capture".to_string(),
            "test".to_string(),
            "{}".to_string(),
            "application/json".to_string(),
            now,
        )
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let store = MemoryTaskStore::new();
        let now = Utc::now();
        assert!(store.add(new_task("a", now)).await.unwrap());
        assert!(!store.add(new_task("a", now)).await.unwrap());
        assert_eq!(store.list("capture", None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_task_untouched() {
        let store = MemoryTaskStore::new();
        let now = Utc::now();
        store.add(new_task("a", now)).await.unwrap();
        store.lease("capture", "w1", 1, 30.0, now).await.unwrap();
        let before = store.get("capture", "a").await.unwrap();

        let request = HeartbeatRequest {
            task_id: "a".to_string(),
            owner: "w2".to_string(),
            message: "hi".to_string(),
            index: 1,
        };
        assert!(store.heartbeat("capture", &request, now).await.is_err());
        assert_eq!(store.get("capture", "a").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_out_of_range_lease_keeps_store_usable() {
        let store = MemoryTaskStore::new();
        let now = Utc::now();
        store.add(new_task("a", now)).await.unwrap();
        let before = store.get("capture", "a").await.unwrap();

        let err = store.lease("capture", "w1", 1, 1e13, now).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(store.get("capture", "a").await.unwrap(), before);

        assert!(store.add(new_task("b", now)).await.unwrap());
        assert_eq!(store.lease("capture", "w1", 5, 30.0, now).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_queue_isolation() {
        let store = MemoryTaskStore::new();
        let now = Utc::now();
        store.add(new_task("a", now)).await.unwrap();

        assert!(store.lease("diff", "w1", 5, 30.0, now).await.unwrap().is_empty());
        assert!(store.get("diff", "a").await.unwrap().is_none());

        let request = FinishRequest {
            task_id: "a".to_string(),
            owner: "w1".to_string(),
            error: false,
        };
        let err = store.finish("diff", &request, now + Duration::seconds(1)).await.unwrap_err();
        assert!(matches!(err, AppError::TaskNotFound(_)));
    }
}
