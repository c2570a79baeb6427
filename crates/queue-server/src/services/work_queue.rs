//! Work queue service.

use std::sync::Arc;

use crate::clock::Clock;
use crate::db::models::{
    AddTaskRequest, AddTaskResponse, CancelRequest, CancelResponse, FinishRequest,
    HeartbeatRequest, LeaseRequest, LeaseResponse, ListQuery, ListResponse, QueuedTask,
    SuccessResponse,
};
use crate::error::{AppError, AppResult};
use crate::store::TaskStore;

const DEFAULT_LIST_LIMIT: i64 = 100;

/// Longest lease a worker may ask for, in seconds.
pub const MAX_LEASE_SECONDS: f64 = 86_400.0;

/// Add/lease/heartbeat/finish/cancel over a [`TaskStore`].
#[derive(Clone)]
pub struct WorkQueueService {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    max_lease_count: u32,
}

impl WorkQueueService {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            max_lease_count: 100,
        }
    }

    pub fn with_max_lease_count(mut self, max: u32) -> Self {
        self.max_lease_count = max.max(1);
        self
    }

    pub fn store_kind(&self) -> &'static str {
        self.store.kind()
    }

    pub async fn store_healthy(&self) -> bool {
        self.store.health().await
    }

    /// Add a task. With an explicit `task_id` the call is idempotent.
    pub async fn add(&self, queue: &str, request: AddTaskRequest) -> AppResult<AddTaskResponse> {
        validate_queue(queue)?;

        let task_id = match request.task_id {
            Some(id) => {
                validate_task_id(&id)?;
                id
            }
            None => uuid::Uuid::new_v4().simple().to_string(),
        };

        let task = QueuedTask::new(
            task_id.clone(),
            queue.to_string(),
            request.source,
            request.payload,
            request.content_type,
            self.clock.now(),
        );

        if self.store.add(task).await? {
            tracing::info!(queue = %queue, task_id = %task_id, "Task added");
        } else {
            tracing::debug!(queue = %queue, task_id = %task_id, "Task already exists");
        }

        Ok(AddTaskResponse { task_id })
    }

    /// Lease up to `count` tasks. Never blocks waiting for work.
    pub async fn lease(&self, queue: &str, request: LeaseRequest) -> AppResult<LeaseResponse> {
        validate_queue(queue)?;
        validate_owner(&request.owner)?;
        if !request.timeout.is_finite()
            || request.timeout <= 0.0
            || request.timeout > MAX_LEASE_SECONDS
        {
            return Err(AppError::Validation(format!(
                "timeout must be between 0 and {} seconds",
                MAX_LEASE_SECONDS
            )));
        }

        let count = request.count.min(self.max_lease_count);
        if count == 0 {
            return Ok(LeaseResponse { tasks: Vec::new() });
        }

        let tasks = self
            .store
            .lease(queue, &request.owner, count, request.timeout, self.clock.now())
            .await?;

        if !tasks.is_empty() {
            tracing::info!(
                queue = %queue,
                owner = %request.owner,
                count = tasks.len(),
                "Tasks leased"
            );
        }

        Ok(LeaseResponse {
            tasks: tasks.into_iter().map(Into::into).collect(),
        })
    }

    pub async fn heartbeat(
        &self,
        queue: &str,
        request: HeartbeatRequest,
    ) -> AppResult<SuccessResponse> {
        validate_queue(queue)?;
        validate_owner(&request.owner)?;

        self.store
            .heartbeat(queue, &request, self.clock.now())
            .await?;

        tracing::debug!(
            queue = %queue,
            task_id = %request.task_id,
            index = request.index,
            message = %request.message,
            "Heartbeat recorded"
        );
        Ok(SuccessResponse { success: true })
    }

    pub async fn finish(&self, queue: &str, request: FinishRequest) -> AppResult<SuccessResponse> {
        validate_queue(queue)?;
        validate_owner(&request.owner)?;

        let changed = self.store.finish(queue, &request, self.clock.now()).await?;
        if changed {
            tracing::info!(
                queue = %queue,
                task_id = %request.task_id,
                error = request.error,
                "Task finished"
            );
        } else {
            tracing::debug!(queue = %queue, task_id = %request.task_id, "Task already finished");
        }
        Ok(SuccessResponse { success: true })
    }

    pub async fn cancel(&self, queue: &str, filter: CancelRequest) -> AppResult<CancelResponse> {
        validate_queue(queue)?;
        if filter.is_empty() {
            return Err(AppError::Validation(
                "cancel needs task_id or source".to_string(),
            ));
        }

        let canceled = self.store.cancel(queue, &filter, self.clock.now()).await?;
        tracing::info!(
            queue = %queue,
            task_id = ?filter.task_id,
            source = ?filter.source,
            canceled,
            "Tasks canceled"
        );
        Ok(CancelResponse { canceled })
    }

    pub async fn list(&self, queue: &str, query: ListQuery) -> AppResult<ListResponse> {
        validate_queue(queue)?;
        let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 1000);
        let tasks = self.store.list(queue, query.status, limit).await?;
        Ok(ListResponse { tasks })
    }

    pub async fn get(&self, queue: &str, task_id: &str) -> AppResult<QueuedTask> {
        self.store
            .get(queue, task_id)
            .await?
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))
    }
}

fn is_name(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn validate_queue(queue: &str) -> AppResult<()> {
    if !is_name(queue) {
        return Err(AppError::Validation(format!("Invalid queue name: {:?}", queue)));
    }
    Ok(())
}

/// Task ids end up in worker paths, so they share the queue-name charset.
fn validate_task_id(task_id: &str) -> AppResult<()> {
    if !is_name(task_id) {
        return Err(AppError::Validation(format!("Invalid task_id: {:?}", task_id)));
    }
    Ok(())
}

fn validate_owner(owner: &str) -> AppResult<()> {
    if owner.trim().is_empty() {
        return Err(AppError::Validation("owner is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryTaskStore;

    fn service() -> WorkQueueService {
        WorkQueueService::new(
            Arc::new(MemoryTaskStore::new()),
            Arc::new(ManualClock::default()),
        )
    }

    fn add(payload: &str) -> AddTaskRequest {
        AddTaskRequest {
            payload: payload.to_string(),
            source: "test".to_string(),
            task_id: None,
            content_type: "application/json".to_string(),
        }
    }

    #[tokio::test]
    async fn test_generated_task_id() {
        let svc = service();
        let resp = svc.add("capture", add("{}")).await.unwrap();
        assert_eq!(resp.task_id.len(), 32);
        assert!(svc.get("capture", &resp.task_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_validation() {
        let svc = service();
        assert!(matches!(
            svc.add("bad queue", add("{}")).await,
            Err(AppError::Validation(_))
        ));

        let lease = LeaseRequest {
            owner: "w1".to_string(),
            count: 1,
            timeout: 0.0,
        };
        assert!(matches!(svc.lease("capture", lease).await, Err(AppError::Validation(_))));

        assert!(matches!(
            svc.cancel("capture", CancelRequest::default()).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_task_id_charset() {
        let svc = service();
        for bad in ["", " ", "../../etc/evil", "/abs/path", "a/b", "a.b"] {
            let request = AddTaskRequest {
                task_id: Some(bad.to_string()),
                ..add("{}")
            };
            assert!(
                matches!(svc.add("capture", request).await, Err(AppError::Validation(_))),
                "{bad:?} accepted"
            );
        }

        let request = AddTaskRequest {
            task_id: Some("capture-home_7".to_string()),
            ..add("{}")
        };
        assert_eq!(svc.add("capture", request).await.unwrap().task_id, "capture-home_7");
    }

    #[tokio::test]
    async fn test_oversized_lease_timeout_is_rejected() {
        let svc = service();
        svc.add("capture", add("{}")).await.unwrap();

        for timeout in [1e13, MAX_LEASE_SECONDS + 1.0, f64::INFINITY] {
            let lease = LeaseRequest {
                owner: "w1".to_string(),
                count: 1,
                timeout,
            };
            assert!(matches!(svc.lease("capture", lease).await, Err(AppError::Validation(_))));
        }

        // the store is still usable afterwards
        svc.add("capture", add("{}")).await.unwrap();
        let lease = LeaseRequest {
            owner: "w1".to_string(),
            count: 5,
            timeout: MAX_LEASE_SECONDS,
        };
        assert_eq!(svc.lease("capture", lease).await.unwrap().tasks.len(), 2);
    }

    #[tokio::test]
    async fn test_lease_count_is_capped() {
        let svc = service().with_max_lease_count(2);
        for _ in 0..3 {
            svc.add("capture", add("{}")).await.unwrap();
        }
        let lease = LeaseRequest {
            owner: "w1".to_string(),
            count: 10,
            timeout: 30.0,
        };
        assert_eq!(svc.lease("capture", lease).await.unwrap().tasks.len(), 2);
    }
}
