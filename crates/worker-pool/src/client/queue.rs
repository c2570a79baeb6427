//! Request builders and response decoding for the work queue HTTP API.
//!
//! Requests are plain [`FetchRequest`]s so they run through the fetch pool
//! like any other URL fetch.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shotdiff_tools::{FetchRequest, FetchResponse};

use crate::engine::WorkError;

/// One task in a lease response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeasedTask {
    pub task_id: String,

    /// Lease expiry
    pub eta: DateTime<Utc>,

    #[serde(default)]
    pub source: String,

    pub created: DateTime<Utc>,

    /// Times the task has been leased, this lease included
    pub lease_attempts: i32,

    pub payload: String,

    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "application/json".to_string()
}

#[derive(Debug, Deserialize)]
struct LeaseResponse {
    tasks: Vec<LeasedTask>,
}

#[derive(Debug, Deserialize)]
struct SuccessResponse {
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct AddTaskResponse {
    task_id: String,
}

/// Builds requests against one queue of the work queue server.
#[derive(Debug, Clone)]
pub struct QueueRequests {
    server_url: String,
    queue: String,
    timeout: Duration,
}

impl QueueRequests {
    pub fn new(server_url: &str, queue: &str, timeout: Duration) -> Self {
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            queue: queue.to_string(),
            timeout,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    fn url(&self, action: &str) -> String {
        format!("{}/work_queue/{}/{}", self.server_url, self.queue, action)
    }

    fn post(&self, action: &str, body: serde_json::Value) -> FetchRequest {
        FetchRequest::post_json(self.url(action), body).with_timeout(self.timeout)
    }

    pub fn add(&self, payload: &str, source: &str, task_id: Option<&str>) -> FetchRequest {
        let mut body = serde_json::json!({ "payload": payload, "source": source });
        if let Some(task_id) = task_id {
            body["task_id"] = serde_json::Value::String(task_id.to_string());
        }
        self.post("add", body)
    }

    pub fn lease(&self, owner: &str, count: usize, lease_timeout: Duration) -> FetchRequest {
        self.post(
            "lease",
            serde_json::json!({
                "owner": owner,
                "count": count,
                "timeout": lease_timeout.as_secs_f64(),
            }),
        )
    }

    pub fn heartbeat(&self, task_id: &str, owner: &str, message: &str, index: i64) -> FetchRequest {
        self.post(
            "heartbeat",
            serde_json::json!({
                "task_id": task_id,
                "owner": owner,
                "message": message,
                "index": index,
            }),
        )
    }

    pub fn finish(&self, task_id: &str, owner: &str, error: bool) -> FetchRequest {
        self.post(
            "finish",
            serde_json::json!({
                "task_id": task_id,
                "owner": owner,
                "error": error,
            }),
        )
    }

    pub fn parse_add(response: &FetchResponse) -> Result<String, WorkError> {
        check_status(response)?;
        let body: AddTaskResponse = response.json()?;
        Ok(body.task_id)
    }

    pub fn parse_lease(response: &FetchResponse) -> Result<Vec<LeasedTask>, WorkError> {
        check_status(response)?;
        let body: LeaseResponse = response.json()?;
        Ok(body.tasks)
    }

    /// Decode a `{success}` / `{error}` reply to heartbeat or finish.
    pub fn parse_success(response: &FetchResponse) -> Result<(), WorkError> {
        check_status(response)?;
        let body: SuccessResponse = response.json()?;
        if body.success {
            Ok(())
        } else {
            Err(WorkError::Remote("Request was not acknowledged".to_string()))
        }
    }
}

/// Lease-protocol rejections become `Remote`, server trouble a retryable
/// `Fetch`, anything else a fatal `Fetch`.
fn check_status(response: &FetchResponse) -> Result<(), WorkError> {
    if response.is_success() {
        return Ok(());
    }

    let message = response
        .json::<ErrorResponse>()
        .map(|e| e.error)
        .unwrap_or_else(|_| format!("HTTP {}", response.status));

    match response.status {
        404 | 409 => Err(WorkError::Remote(message)),
        408 | 429 | 500..=599 => Err(WorkError::Fetch {
            fatal: false,
            message,
        }),
        _ => Err(WorkError::Fetch {
            fatal: true,
            message,
        }),
    }
}
