//! External process runner.
//!
//! Runs an argv with stdout and stderr appended to a log file, and kills the
//! child once its wall-clock budget is spent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::ToolError;

/// What to run and where its output goes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Program followed by its arguments.
    pub argv: Vec<String>,

    /// File receiving stdout and stderr.
    pub log_path: PathBuf,

    /// Wall-clock budget.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ProcessSpec {
    pub fn new(argv: Vec<String>, log_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            argv,
            log_path: log_path.into(),
            timeout,
            cwd: None,
            env: HashMap::new(),
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Result of a process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    /// Exit code, or -1 when terminated by a signal.
    pub exit_code: i32,
    pub duration_ms: u64,
    pub log_path: PathBuf,
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a process to completion or until its timeout expires.
///
/// A timed-out child is force-killed and reported as [`ToolError::Timeout`].
pub async fn run(spec: &ProcessSpec) -> Result<ProcessOutcome, ToolError> {
    let start = Instant::now();

    let (program, args) = spec
        .argv
        .split_first()
        .ok_or_else(|| ToolError::Process("Empty argv".to_string()))?;

    if let Some(parent) = spec.log_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let log = tokio::fs::File::create(&spec.log_path).await?.into_std().await;
    let log_err = log.try_clone()?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .kill_on_drop(true);

    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }
    for (k, v) in &spec.env {
        cmd.env(k, v);
    }

    tracing::debug!(
        program = %program,
        log = %spec.log_path.display(),
        timeout = ?spec.timeout,
        "Spawning process"
    );

    let mut child = cmd
        .spawn()
        .map_err(|e| ToolError::Process(format!("Failed to spawn {}: {}", program, e)))?;

    let status = match timeout(spec.timeout, child.wait()).await {
        Ok(result) => {
            result.map_err(|e| ToolError::Process(format!("Failed to wait for process: {}", e)))?
        }
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::warn!(program = %program, error = %e, "Failed to kill timed out process");
            }
            tracing::warn!(program = %program, timeout = ?spec.timeout, "Process timed out");
            return Err(ToolError::Timeout(spec.timeout));
        }
    };

    let outcome = ProcessOutcome {
        exit_code: status.code().unwrap_or(-1),
        duration_ms: start.elapsed().as_millis() as u64,
        log_path: spec.log_path.clone(),
    };

    tracing::debug!(
        program = %program,
        exit_code = outcome.exit_code,
        duration_ms = outcome.duration_ms,
        "Process exited"
    );

    Ok(outcome)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
