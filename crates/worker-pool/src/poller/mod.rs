//! Remote queue poller.
//!
//! A root workflow that keeps up to `max_concurrent` leased tasks running,
//! each in its own fire-and-forget [`TaskAttempt`]. A failing task never
//! stops the poller.

mod heartbeat;
mod task;

use std::sync::Arc;
use std::time::Duration;

use crate::client::{LeasedTask, QueueRequests};
use crate::config::{RetryPolicy, WorkerConfig};
use crate::engine::{Context, Handle, TimerItem, WorkError, Workflow};
use crate::fetch::FetchItem;

pub use heartbeat::{run_with_heartbeats, Heartbeat};
pub use task::{TaskAttempt, TaskOutcome};

/// Builds the local workflow that does the work of a leased task.
///
/// To give up permanently the body raises `WorkError::GiveUp`; any other
/// error leaves the task for redelivery.
pub trait TaskRunner: Send + Sync + 'static {
    type Flow: Workflow;

    fn workflow(&self, task: LeasedTask, heartbeat: Heartbeat) -> Self::Flow;
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub server_url: String,
    pub queue: String,
    pub owner: String,
    pub max_concurrent: usize,
    pub start_stagger: Duration,
    pub busy_poll_interval: Duration,
    pub idle_poll_interval: Duration,
    pub lease_timeout: Duration,
    pub request_timeout: Duration,
    pub finish_retry: RetryPolicy,
}

impl PollerConfig {
    pub fn from_worker(config: &WorkerConfig, queue: &str) -> Self {
        Self {
            server_url: config.server_url.clone(),
            queue: queue.to_string(),
            owner: config.owner.clone(),
            max_concurrent: config.max_concurrent,
            start_stagger: config.start_stagger,
            busy_poll_interval: config.busy_poll_interval,
            idle_poll_interval: config.idle_poll_interval,
            lease_timeout: config.lease_timeout,
            request_timeout: config.request_timeout,
            finish_retry: config.finish_retry.clone(),
        }
    }
}

pub struct QueuePoller<R: TaskRunner> {
    config: PollerConfig,
    runner: Arc<R>,
}

impl<R: TaskRunner> QueuePoller<R> {
    pub fn new(config: PollerConfig, runner: R) -> Self {
        Self {
            config,
            runner: Arc::new(runner),
        }
    }

    async fn lease(
        &self,
        ctx: &Context,
        requests: &QueueRequests,
        count: usize,
    ) -> Result<Vec<LeasedTask>, WorkError> {
        let request = requests.lease(&self.config.owner, count, self.config.lease_timeout);
        let item = ctx.run(FetchItem::new(request)).await?;
        QueueRequests::parse_lease(item.response()?)
    }
}

impl<R: TaskRunner> Workflow for QueuePoller<R> {
    type Output = ();

    async fn run(self, ctx: Context) -> Result<(), WorkError> {
        let config = &self.config;
        let requests = QueueRequests::new(&config.server_url, &config.queue, config.request_timeout);

        tracing::info!(
            queue = %config.queue,
            owner = %config.owner,
            max_concurrent = config.max_concurrent,
            "Queue poller started"
        );

        let mut in_flight: Vec<Handle<TaskOutcome>> = Vec::new();
        loop {
            in_flight.retain(|h| !h.is_done());

            let capacity = config.max_concurrent.saturating_sub(in_flight.len());
            if capacity > 0 {
                match self.lease(&ctx, &requests, capacity).await {
                    Ok(tasks) => {
                        if !tasks.is_empty() {
                            tracing::debug!(queue = %config.queue, count = tasks.len(), "Tasks leased");
                        }
                        for (n, task) in tasks.into_iter().enumerate() {
                            if n > 0 && !config.start_stagger.is_zero() {
                                ctx.run(TimerItem::new(config.start_stagger)).await?;
                            }
                            tracing::info!(
                                queue = %config.queue,
                                task_id = %task.task_id,
                                lease_attempts = task.lease_attempts,
                                "Starting task"
                            );
                            let attempt = TaskAttempt::new(
                                task,
                                Arc::clone(&self.runner),
                                requests.clone(),
                                config.owner.clone(),
                                config.finish_retry.clone(),
                            );
                            in_flight.push(ctx.spawn(Handle::workflow(attempt)));
                        }
                    }
                    Err(e) => {
                        tracing::warn!(queue = %config.queue, error = %e, "Lease failed");
                    }
                }
            }

            let pause = if in_flight.is_empty() {
                config.idle_poll_interval
            } else {
                config.busy_poll_interval
            };
            ctx.run(TimerItem::new(pause)).await?;
        }
    }
}
