//! Work item error types.

use shotdiff_tools::ToolError;
use thiserror::Error;

/// Error captured on a work item and raised inside the workflow that awaits it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkError {
    /// Generic processing failure.
    #[error("{0}")]
    Failed(String),

    /// Permanent failure once the task has been leased `max_attempts` times.
    #[error("Giving up after {max_attempts} attempts: {message}")]
    GiveUp { max_attempts: i32, message: String },

    /// A subprocess ran past its wall-clock budget and was killed.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// URL fetch failed. Non-fatal failures may succeed on retry.
    #[error("Fetch failed: {message}")]
    Fetch { fatal: bool, message: String },

    /// The processor panicked while handling the item.
    #[error("Worker panicked: {0}")]
    Panicked(String),

    /// The remote work queue rejected a request.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The engine stopped before the item completed.
    #[error("Engine shut down")]
    Shutdown,
}

impl WorkError {
    pub fn failed(message: impl Into<String>) -> Self {
        WorkError::Failed(message.into())
    }

    pub fn give_up(max_attempts: i32, message: impl Into<String>) -> Self {
        WorkError::GiveUp {
            max_attempts,
            message: message.into(),
        }
    }

    /// Whether retrying the same request might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, WorkError::Fetch { fatal: false, .. })
    }
}

impl From<ToolError> for WorkError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::Timeout(budget) => WorkError::Timeout(format!("killed after {:?}", budget)),
            ToolError::Transient(message) => WorkError::Fetch {
                fatal: false,
                message,
            },
            ToolError::Http(message) => WorkError::Fetch {
                fatal: true,
                message,
            },
            other => WorkError::Failed(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for WorkError {
    fn from(e: serde_json::Error) -> Self {
        WorkError::Failed(format!("JSON error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WorkError::give_up(3, "capture exited with 2");
        assert_eq!(
            err.to_string(),
            "Giving up after 3 attempts: capture exited with 2"
        );
        assert_eq!(WorkError::failed("child 3").to_string(), "child 3");
    }

    #[test]
    fn test_from_tool_error() {
        let err: WorkError = ToolError::Transient("connection refused".to_string()).into();
        assert!(err.is_transient());

        let err: WorkError = ToolError::Http("HTTP 404".to_string()).into();
        assert!(matches!(err, WorkError::Fetch { fatal: true, .. }));

        let err: WorkError = ToolError::Timeout(std::time::Duration::from_millis(100)).into();
        assert_eq!(err, WorkError::Timeout("killed after 100ms".to_string()));
    }
}
