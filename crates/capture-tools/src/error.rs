//! Tool execution error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while running a tool.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// Process could not be spawned or waited on.
    #[error("Process error: {0}")]
    Process(String),

    /// Process exceeded its wall-clock budget and was killed.
    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP request failed in a way retrying will not fix.
    #[error("HTTP error: {0}")]
    Http(String),

    /// HTTP request failed in a way that may succeed on retry.
    #[error("Transient error: {0}")]
    Transient(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),
}

impl ToolError {
    /// Whether the failure is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Transient(_))
    }
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        ToolError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::Json(e.to_string())
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            ToolError::Transient(e.to_string())
        } else {
            ToolError::Http(e.to_string())
        }
    }
}
