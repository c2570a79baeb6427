//! Queued task model and the request/response bodies of the work queue API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of a queued task. Everything but `Live` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Live,
    Done,
    Error,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Live => "live",
            TaskStatus::Done => "done",
            TaskStatus::Error => "error",
            TaskStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Live)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(TaskStatus::Live),
            "done" => Ok(TaskStatus::Done),
            "error" => Ok(TaskStatus::Error),
            "canceled" => Ok(TaskStatus::Canceled),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        s.parse()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of `shotdiff.work_queue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct QueuedTask {
    pub task_id: String,

    pub queue_name: String,

    #[sqlx(try_from = "String")]
    pub status: TaskStatus,

    /// Earliest time the task may be leased again
    pub eta: DateTime<Utc>,

    /// Free-form tag naming whoever added the task
    pub source: String,

    pub created: DateTime<Utc>,

    pub finished: Option<DateTime<Utc>>,

    pub lease_attempts: i32,

    pub last_owner: Option<String>,

    /// Duration of the most recent lease; heartbeats extend by this much
    pub last_lease_seconds: Option<f64>,

    /// Latest heartbeat message
    pub heartbeat: Option<String>,

    /// Latest heartbeat index
    pub heartbeat_number: Option<i64>,

    pub payload: String,

    pub content_type: String,
}

impl QueuedTask {
    /// A fresh live task that is immediately leasable.
    pub fn new(
        task_id: String,
        queue_name: String,
        source: String,
        payload: String,
        content_type: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            queue_name,
            status: TaskStatus::Live,
            eta: now,
            source,
            created: now,
            finished: None,
            lease_attempts: 0,
            last_owner: None,
            last_lease_seconds: None,
            heartbeat: None,
            heartbeat_number: None,
            payload,
            content_type,
        }
    }
}

/// `POST /work_queue/{queue}/add`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTaskRequest {
    pub payload: String,

    #[serde(default)]
    pub source: String,

    /// Explicit id makes the add idempotent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "application/json".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTaskResponse {
    pub task_id: String,
}

/// `POST /work_queue/{queue}/lease`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRequest {
    pub owner: String,

    #[serde(default = "default_count")]
    pub count: u32,

    /// Lease duration in seconds
    pub timeout: f64,
}

fn default_count() -> u32 {
    1
}

/// One task in a lease response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeasedTask {
    pub task_id: String,
    pub eta: DateTime<Utc>,
    pub source: String,
    pub created: DateTime<Utc>,
    pub lease_attempts: i32,
    pub payload: String,
    pub content_type: String,
}

impl From<QueuedTask> for LeasedTask {
    fn from(task: QueuedTask) -> Self {
        Self {
            task_id: task.task_id,
            eta: task.eta,
            source: task.source,
            created: task.created,
            lease_attempts: task.lease_attempts,
            payload: task.payload,
            content_type: task.content_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseResponse {
    pub tasks: Vec<LeasedTask>,
}

/// `POST /work_queue/{queue}/heartbeat`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub task_id: String,
    pub owner: String,
    #[serde(default)]
    pub message: String,
    pub index: i64,
}

/// `POST /work_queue/{queue}/finish`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishRequest {
    pub task_id: String,
    pub owner: String,
    #[serde(default)]
    pub error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// `POST /work_queue/{queue}/cancel`. At least one field must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl CancelRequest {
    pub fn is_empty(&self) -> bool {
        self.task_id.is_none() && self.source.is_none()
    }

    pub fn matches(&self, task: &QueuedTask) -> bool {
        self.task_id.as_ref().is_none_or(|id| *id == task.task_id)
            && self.source.as_ref().is_none_or(|s| *s == task.source)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub canceled: u64,
}

/// `GET /work_queue/{queue}?status=&limit=`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub tasks: Vec<QueuedTask>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Live,
            TaskStatus::Done,
            TaskStatus::Error,
            TaskStatus::Canceled,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("leased".parse::<TaskStatus>().is_err());
        assert_eq!(TaskStatus::try_from("error".to_string()), Ok(TaskStatus::Error));
        assert!(TaskStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_add_request_defaults() {
        let req: AddTaskRequest = serde_json::from_str(r#"{"payload": "{}"}"#).unwrap();
        assert_eq!(req.content_type, "application/json");
        assert_eq!(req.source, "");
        assert!(req.task_id.is_none());
    }

    #[test]
    fn test_cancel_filter() {
        let task = QueuedTask::new(
            "t1".to_string(),
            "capture".to_string(),
            "release-7".to_string(),
            "{}".to_string(),
            "application/json".to_string(),
            Utc::now(),
        );

        let by_source = CancelRequest {
            source: Some("release-7".to_string()),
            ..Default::default()
        };
        assert!(by_source.matches(&task));

        let other = CancelRequest {
            task_id: Some("t2".to_string()),
            source: Some("release-7".to_string()),
        };
        assert!(!other.matches(&task));
        assert!(CancelRequest::default().is_empty());
    }
}
