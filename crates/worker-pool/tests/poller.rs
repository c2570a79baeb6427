//! Poller and task-attempt behavior against the real queue service.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shotdiff_queue::db::models::{ListQuery, TaskStatus};
use shotdiff_worker::client::LeasedTask;
use shotdiff_worker::config::RetryPolicy;
use shotdiff_worker::engine::{Context, TimerItem, WorkError, Workflow};
use shotdiff_worker::poller::{Heartbeat, PollerConfig, QueuePoller, TaskAttempt, TaskOutcome, TaskRunner};

use common::{Harness, OWNER, SERVER_URL};

const QUEUE: &str = "capture";

struct ScriptedRunner {
    outcome: Result<(), WorkError>,
    runs: Arc<AtomicUsize>,
}

impl ScriptedRunner {
    fn new(outcome: Result<(), WorkError>) -> Self {
        Self {
            outcome,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct ScriptedTask {
    outcome: Result<(), WorkError>,
    heartbeat: Heartbeat,
}

impl Workflow for ScriptedTask {
    type Output = ();

    async fn run(self, ctx: Context) -> Result<(), WorkError> {
        self.heartbeat.beat(&ctx, "Working");
        ctx.run(TimerItem::millis(5)).await?;
        self.outcome
    }
}

impl TaskRunner for ScriptedRunner {
    type Flow = ScriptedTask;

    fn workflow(&self, _task: LeasedTask, heartbeat: Heartbeat) -> ScriptedTask {
        self.runs.fetch_add(1, Ordering::SeqCst);
        ScriptedTask {
            outcome: self.outcome.clone(),
            heartbeat,
        }
    }
}

fn attempt(harness: &Harness, task: LeasedTask, runner: ScriptedRunner) -> TaskAttempt<ScriptedRunner> {
    TaskAttempt::new(
        task,
        Arc::new(runner),
        harness.requests(QUEUE),
        OWNER.to_string(),
        RetryPolicy::default(),
    )
}

async fn status(harness: &Harness, task_id: &str) -> TaskStatus {
    harness.service.get(QUEUE, task_id).await.unwrap().status
}

#[tokio::test]
async fn test_success_finishes_task() {
    let harness = Harness::new();
    let task_id = harness.add(QUEUE, "{}").await;
    let task = harness.lease_repeatedly(QUEUE, 1).await;

    let outcome = harness
        .engine
        .run_async(attempt(&harness, task, ScriptedRunner::new(Ok(()))))
        .await;
    assert_eq!(outcome, Ok(TaskOutcome::Finished));
    assert_eq!(status(&harness, &task_id).await, TaskStatus::Done);

    let finishes = harness.fetcher.calls_to("finish");
    assert_eq!(finishes.len(), 1);
    assert_eq!(finishes[0].body["error"], false);
}

#[tokio::test]
async fn test_give_up_at_max_attempts_retires_task() {
    let harness = Harness::new();
    let task_id = harness.add(QUEUE, "{}").await;
    let task = harness.lease_repeatedly(QUEUE, 3).await;
    assert_eq!(task.lease_attempts, 3);

    let runner = ScriptedRunner::new(Err(WorkError::give_up(3, "capture keeps crashing")));
    let outcome = harness.engine.run_async(attempt(&harness, task, runner)).await;
    assert_eq!(outcome, Ok(TaskOutcome::Retired));
    assert_eq!(status(&harness, &task_id).await, TaskStatus::Error);

    let finishes = harness.fetcher.calls_to("finish");
    assert_eq!(finishes.len(), 1);
    assert_eq!(finishes[0].body["error"], true);
    assert_eq!(finishes[0].status, 200);
}

#[tokio::test]
async fn test_give_up_below_max_attempts_leaves_task() {
    let harness = Harness::new();
    let task_id = harness.add(QUEUE, "{}").await;
    let task = harness.lease_repeatedly(QUEUE, 1).await;

    let runner = ScriptedRunner::new(Err(WorkError::give_up(3, "capture keeps crashing")));
    let outcome = harness.engine.run_async(attempt(&harness, task, runner)).await;
    assert_eq!(outcome, Ok(TaskOutcome::Released));
    assert!(harness.fetcher.calls_to("finish").is_empty());
    assert_eq!(status(&harness, &task_id).await, TaskStatus::Live);
}

#[tokio::test]
async fn test_other_errors_leave_task() {
    let harness = Harness::new();
    let task_id = harness.add(QUEUE, "{}").await;
    let task = harness.lease_repeatedly(QUEUE, 3).await;

    let runner = ScriptedRunner::new(Err(WorkError::failed("flaky network")));
    let outcome = harness.engine.run_async(attempt(&harness, task, runner)).await;
    assert_eq!(outcome, Ok(TaskOutcome::Released));
    assert!(harness.fetcher.calls_to("finish").is_empty());
    assert_eq!(status(&harness, &task_id).await, TaskStatus::Live);
}

#[tokio::test]
async fn test_heartbeats_are_sequenced() {
    let harness = Harness::new();
    let task_id = harness.add(QUEUE, "{}").await;
    let task = harness.lease_repeatedly(QUEUE, 1).await;

    harness
        .engine
        .run_async(attempt(&harness, task, ScriptedRunner::new(Ok(()))))
        .await
        .unwrap();

    let beats = harness.fetcher.calls_to("heartbeat");
    assert_eq!(beats.len(), 1);
    assert_eq!(beats[0].body["index"], 1);
    assert_eq!(beats[0].body["task_id"], task_id.as_str());
}

#[tokio::test]
async fn test_finish_after_lease_lost_is_an_error() {
    let harness = Harness::new();
    harness.add(QUEUE, "{}").await;
    let mut task = harness.lease_repeatedly(QUEUE, 1).await;
    task.task_id = "missing".to_string();

    let outcome = harness
        .engine
        .run_async(attempt(&harness, task, ScriptedRunner::new(Ok(()))))
        .await;
    assert!(matches!(outcome, Err(WorkError::Remote(_))));
    // Lease-protocol rejections are not retried.
    assert_eq!(harness.fetcher.calls_to("finish").len(), 1);
}

fn poller_config(max_concurrent: usize) -> PollerConfig {
    PollerConfig {
        server_url: SERVER_URL.to_string(),
        queue: QUEUE.to_string(),
        owner: OWNER.to_string(),
        max_concurrent,
        start_stagger: Duration::from_millis(1),
        busy_poll_interval: Duration::from_millis(10),
        idle_poll_interval: Duration::from_millis(20),
        lease_timeout: Duration::from_secs(60),
        request_timeout: Duration::from_secs(5),
        finish_retry: RetryPolicy::default(),
    }
}

async fn wait_for_done(harness: &Harness, expected: usize) -> usize {
    let mut done = 0;
    for _ in 0..250 {
        done = harness
            .service
            .list(
                QUEUE,
                ListQuery {
                    status: Some(TaskStatus::Done),
                    limit: None,
                },
            )
            .await
            .unwrap()
            .tasks
            .len();
        if done >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    done
}

#[tokio::test]
async fn test_poller_drains_queue() {
    let harness = Harness::new();
    for _ in 0..5 {
        harness.add(QUEUE, "{}").await;
    }

    let runner = ScriptedRunner::new(Ok(()));
    let runs = Arc::clone(&runner.runs);
    harness
        .engine
        .submit(QueuePoller::new(poller_config(2), runner))
        .unwrap();

    assert_eq!(wait_for_done(&harness, 5).await, 5);
    assert_eq!(runs.load(Ordering::SeqCst), 5);

    // Never more than two tasks per lease request.
    for lease in harness.fetcher.calls_to("lease") {
        assert!(lease.body["count"].as_u64().unwrap() <= 2);
    }
    harness.engine.shutdown();
}

#[tokio::test]
async fn test_poller_survives_failing_tasks() {
    let harness = Harness::new();
    for _ in 0..3 {
        harness.add(QUEUE, "{}").await;
    }

    let runner = ScriptedRunner::new(Err(WorkError::failed("boom")));
    let runs = Arc::clone(&runner.runs);
    harness
        .engine
        .submit(QueuePoller::new(poller_config(4), runner))
        .unwrap();

    for _ in 0..250 {
        if runs.load(Ordering::SeqCst) >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    // The poller keeps leasing after the failures.
    let leases_before = harness.fetcher.calls_to("lease").len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(harness.fetcher.calls_to("lease").len() > leases_before);
    assert!(harness.engine.is_running());
    harness.engine.shutdown();
}
