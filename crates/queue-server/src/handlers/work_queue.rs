//! Work queue endpoints.
//!
//! Every route is scoped by the `{queue}` path segment. Lease-protocol
//! rejections come back as `{"error": "..."}` with 404 or 409.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::db::models::{
    AddTaskRequest, AddTaskResponse, CancelRequest, CancelResponse, FinishRequest,
    HeartbeatRequest, LeaseRequest, LeaseResponse, ListQuery, ListResponse, QueuedTask,
    SuccessResponse,
};
use crate::error::AppResult;
use crate::services::WorkQueueService;

/// `POST /work_queue/{queue}/add`
pub async fn add(
    State(service): State<WorkQueueService>,
    Path(queue): Path<String>,
    Json(request): Json<AddTaskRequest>,
) -> AppResult<Json<AddTaskResponse>> {
    Ok(Json(service.add(&queue, request).await?))
}

/// `POST /work_queue/{queue}/lease`
pub async fn lease(
    State(service): State<WorkQueueService>,
    Path(queue): Path<String>,
    Json(request): Json<LeaseRequest>,
) -> AppResult<Json<LeaseResponse>> {
    Ok(Json(service.lease(&queue, request).await?))
}

/// `POST /work_queue/{queue}/heartbeat`
pub async fn heartbeat(
    State(service): State<WorkQueueService>,
    Path(queue): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> AppResult<Json<SuccessResponse>> {
    Ok(Json(service.heartbeat(&queue, request).await?))
}

/// `POST /work_queue/{queue}/finish`
pub async fn finish(
    State(service): State<WorkQueueService>,
    Path(queue): Path<String>,
    Json(request): Json<FinishRequest>,
) -> AppResult<Json<SuccessResponse>> {
    Ok(Json(service.finish(&queue, request).await?))
}

/// `POST /work_queue/{queue}/cancel`
pub async fn cancel(
    State(service): State<WorkQueueService>,
    Path(queue): Path<String>,
    Json(filter): Json<CancelRequest>,
) -> AppResult<Json<CancelResponse>> {
    Ok(Json(service.cancel(&queue, filter).await?))
}

/// `GET /work_queue/{queue}?status=&limit=`
pub async fn list(
    State(service): State<WorkQueueService>,
    Path(queue): Path<String>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ListResponse>> {
    Ok(Json(service.list(&queue, query).await?))
}

/// `GET /work_queue/{queue}/task/{task_id}`
pub async fn get(
    State(service): State<WorkQueueService>,
    Path((queue, task_id)): Path<(String, String)>,
) -> AppResult<Json<QueuedTask>> {
    Ok(Json(service.get(&queue, &task_id).await?))
}
