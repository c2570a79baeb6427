//! Capture and diff task bodies with shell stand-ins for the real tools.

mod common;

use std::path::PathBuf;
use std::time::Duration;

use shotdiff_worker::engine::WorkError;
use shotdiff_worker::poller::{Heartbeat, TaskRunner};
use shotdiff_worker::tasks::{CaptureRunner, DiffRunner, TaskSettings};

use common::{detached_task, Harness, OWNER};

fn settings(command: &str, output_dir: PathBuf) -> TaskSettings {
    TaskSettings {
        command: vec!["sh".to_string(), "-c".to_string(), command.to_string()],
        timeout: Duration::from_secs(5),
        output_dir,
        report_url: None,
        heartbeat_interval: Duration::from_millis(20),
        request_timeout: Duration::from_secs(5),
    }
}

fn heartbeat(harness: &Harness, queue: &str, task_id: &str) -> Heartbeat {
    Heartbeat::new(harness.requests(queue), task_id, OWNER)
}

#[tokio::test]
async fn test_capture_writes_screenshot() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().unwrap();
    let runner = CaptureRunner::new(settings(
        "grep -q viewport {config} && echo {url} > {output}",
        dir.path().to_path_buf(),
    ));

    let payload = r#"{"run_name": "home", "url": "http://example.com", "config": {"viewport": [1024, 768]}}"#;
    let task = detached_task("cap-1", payload);
    let flow = runner.workflow(task, heartbeat(&harness, "capture", "cap-1"));
    let report = harness.engine.run_async(flow).await.unwrap();

    assert_eq!(report.status, "captured");
    assert_eq!(report.run_name, "home");
    let image = std::fs::read_to_string(&report.image).unwrap();
    assert_eq!(image.trim(), "http://example.com");

    let messages: Vec<String> = harness
        .fetcher
        .calls_to("heartbeat")
        .iter()
        .map(|c| c.body["message"].as_str().unwrap_or_default().to_string())
        .collect();
    assert!(messages.contains(&"Fetching".to_string()));
    assert!(messages.contains(&"Capturing".to_string()));
}

#[tokio::test]
async fn test_capture_failure_gives_up() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().unwrap();
    let runner = CaptureRunner::new(settings("exit 4", dir.path().to_path_buf()));

    let task = detached_task("cap-2", r#"{"run_name": "home", "url": "http://example.com"}"#);
    let flow = runner.workflow(task, heartbeat(&harness, "capture", "cap-2"));
    let err = harness.engine.run_async(flow).await.unwrap_err();
    assert!(matches!(err, WorkError::GiveUp { max_attempts: 3, .. }));
}

#[tokio::test]
async fn test_capture_bad_payload_gives_up_immediately() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().unwrap();
    let runner = CaptureRunner::new(settings("true", dir.path().to_path_buf()));

    let task = detached_task("cap-3", "not json");
    let flow = runner.workflow(task, heartbeat(&harness, "capture", "cap-3"));
    let err = harness.engine.run_async(flow).await.unwrap_err();
    assert!(matches!(err, WorkError::GiveUp { max_attempts: 1, .. }));
}

#[tokio::test]
async fn test_capture_refuses_task_id_outside_output_dir() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().unwrap();
    let output_dir = dir.path().join("out");
    let runner = CaptureRunner::new(settings("touch {output}", output_dir.clone()));

    let task = detached_task("../escape", r#"{"run_name": "home", "url": "http://example.com"}"#);
    let flow = runner.workflow(task, heartbeat(&harness, "capture", "../escape"));
    let err = harness.engine.run_async(flow).await.unwrap_err();

    assert!(matches!(err, WorkError::GiveUp { max_attempts: 1, .. }));
    assert!(!dir.path().join("escape").exists());
    assert!(!output_dir.exists());
}

#[tokio::test]
async fn test_long_capture_sends_periodic_heartbeats() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().unwrap();
    let runner = CaptureRunner::new(settings("sleep 0.3 && touch {output}", dir.path().to_path_buf()));

    let task = detached_task("cap-4", r#"{"run_name": "slow", "url": "http://example.com"}"#);
    let flow = runner.workflow(task, heartbeat(&harness, "capture", "cap-4"));
    harness.engine.run_async(flow).await.unwrap();

    let capturing = harness
        .fetcher
        .calls_to("heartbeat")
        .iter()
        .filter(|c| c.body["message"] == "Capturing")
        .count();
    assert!(capturing >= 3);
}

#[tokio::test]
async fn test_diff_statuses() {
    let harness = Harness::new();
    let dir = tempfile::tempdir().unwrap();
    let payload = r#"{"run_name": "home", "before": "/tmp/a.png", "after": "/tmp/b.png"}"#;

    let same = DiffRunner::new(settings("exit 0", dir.path().to_path_buf()));
    let flow = same.workflow(detached_task("diff-1", payload), heartbeat(&harness, "diff", "diff-1"));
    let report = harness.engine.run_async(flow).await.unwrap();
    assert_eq!(report.status, "same");
    assert!(report.diff.is_none());

    let different = DiffRunner::new(settings("touch {diff}; exit 1", dir.path().to_path_buf()));
    let flow = different.workflow(detached_task("diff-2", payload), heartbeat(&harness, "diff", "diff-2"));
    let report = harness.engine.run_async(flow).await.unwrap();
    assert_eq!(report.status, "different");
    assert!(PathBuf::from(report.diff.unwrap()).exists());

    let broken = DiffRunner::new(settings("exit 2", dir.path().to_path_buf()));
    let flow = broken.workflow(detached_task("diff-3", payload), heartbeat(&harness, "diff", "diff-3"));
    let err = harness.engine.run_async(flow).await.unwrap_err();
    assert!(matches!(err, WorkError::GiveUp { .. }));
}
