//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;

/// Bounded exponential backoff for requests that must eventually land.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker identifier (UUID).
    pub worker_id: String,

    /// Lease owner name reported to the queue.
    pub owner: String,

    /// Work queue server URL.
    pub server_url: String,

    pub fetch_threads: usize,

    pub process_threads: usize,

    pub capture_queue: String,

    pub diff_queue: String,

    /// Maximum tasks in flight per queue.
    pub max_concurrent: usize,

    /// Pause between starting tasks from one lease batch.
    pub start_stagger: Duration,

    /// Poll interval while tasks are in flight.
    pub busy_poll_interval: Duration,

    /// Poll interval while idle.
    pub idle_poll_interval: Duration,

    pub lease_timeout: Duration,

    /// Heartbeat period while a subprocess is running.
    pub heartbeat_interval: Duration,

    /// Timeout of each queue request.
    pub request_timeout: Duration,

    /// Capture argv template with `{url}`, `{output}` and `{config}` placeholders.
    pub capture_command: Vec<String>,

    pub capture_timeout: Duration,

    /// Diff argv template with `{before}`, `{after}` and `{diff}` placeholders.
    pub diff_command: Vec<String>,

    pub diff_timeout: Duration,

    /// Directory for screenshots, diffs and logs.
    pub output_dir: PathBuf,

    /// Where run outcomes are posted. Reporting is skipped when unset.
    pub report_url: Option<String>,

    pub finish_retry: RetryPolicy,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_or(key, default_ms))
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_or(key, default_secs))
}

fn env_command(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(s) if !s.trim().is_empty() => s.split_whitespace().map(str::to_string).collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

const DEFAULT_CAPTURE_COMMAND: &[&str] = &[
    "shotdiff-capture",
    "--url",
    "{url}",
    "--output",
    "{output}",
    "--config",
    "{config}",
];

const DEFAULT_DIFF_COMMAND: &[&str] = &["shotdiff-compare", "{before}", "{after}", "{diff}"];

impl WorkerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let worker_id = std::env::var("WORKER_ID").unwrap_or(defaults.worker_id);

        let owner = std::env::var("WORKER_OWNER").unwrap_or_else(|_| {
            let host = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "worker".to_string());
            format!("{}:{}", host, worker_id)
        });

        let server_url = std::env::var("SHOTDIFF_SERVER_URL").unwrap_or(defaults.server_url);

        let capture_queue =
            std::env::var("WORKER_CAPTURE_QUEUE").unwrap_or(defaults.capture_queue);
        let diff_queue = std::env::var("WORKER_DIFF_QUEUE").unwrap_or(defaults.diff_queue);

        let output_dir = std::env::var("WORKER_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        let report_url = std::env::var("WORKER_REPORT_URL")
            .ok()
            .filter(|s| !s.is_empty());

        let finish_retry = RetryPolicy {
            max_attempts: env_or("WORKER_FINISH_RETRIES", defaults.finish_retry.max_attempts),
            ..RetryPolicy::default()
        };

        Ok(Self {
            worker_id,
            owner,
            server_url,
            fetch_threads: env_or("WORKER_FETCH_THREADS", defaults.fetch_threads).max(1),
            process_threads: env_or("WORKER_PROCESS_THREADS", defaults.process_threads).max(1),
            capture_queue,
            diff_queue,
            max_concurrent: env_or("WORKER_MAX_CONCURRENT", defaults.max_concurrent).max(1),
            start_stagger: env_millis("WORKER_STAGGER_MS", 500),
            busy_poll_interval: env_millis("WORKER_BUSY_POLL_MS", 1_000),
            idle_poll_interval: env_millis("WORKER_IDLE_POLL_MS", 5_000),
            lease_timeout: env_secs("WORKER_LEASE_TIMEOUT", 60),
            heartbeat_interval: env_secs("WORKER_HEARTBEAT_INTERVAL", 15),
            request_timeout: env_secs("WORKER_REQUEST_TIMEOUT", 30),
            capture_command: env_command("WORKER_CAPTURE_COMMAND", DEFAULT_CAPTURE_COMMAND),
            capture_timeout: env_secs("WORKER_CAPTURE_TIMEOUT", 120),
            diff_command: env_command("WORKER_DIFF_COMMAND", DEFAULT_DIFF_COMMAND),
            diff_timeout: env_secs("WORKER_DIFF_TIMEOUT", 60),
            output_dir,
            report_url,
            finish_retry,
        })
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let worker_id = uuid::Uuid::new_v4().to_string();
        Self {
            owner: format!("worker:{}", worker_id),
            worker_id,
            server_url: "http://localhost:8082".to_string(),
            fetch_threads: 4,
            process_threads: 2,
            capture_queue: "capture".to_string(),
            diff_queue: "diff".to_string(),
            max_concurrent: 2,
            start_stagger: Duration::from_millis(500),
            busy_poll_interval: Duration::from_secs(1),
            idle_poll_interval: Duration::from_secs(5),
            lease_timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(30),
            capture_command: DEFAULT_CAPTURE_COMMAND.iter().map(|s| s.to_string()).collect(),
            capture_timeout: Duration::from_secs(120),
            diff_command: DEFAULT_DIFF_COMMAND.iter().map(|s| s.to_string()).collect(),
            diff_timeout: Duration::from_secs(60),
            output_dir: PathBuf::from("/tmp/shotdiff"),
            report_url: None,
            finish_retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.server_url, "http://localhost:8082");
        assert_eq!(config.capture_queue, "capture");
        assert_eq!(config.max_concurrent, 2);
        assert!(config.capture_command.contains(&"{url}".to_string()));
        assert!(config.report_url.is_none());
    }

    #[test]
    fn test_retry_backoff() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }
}
