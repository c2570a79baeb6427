//! One attempt at a leased task.

use std::sync::Arc;

use crate::client::{LeasedTask, QueueRequests};
use crate::config::RetryPolicy;
use crate::engine::{Context, TimerItem, WorkError, Workflow};
use crate::fetch::FetchItem;

use super::heartbeat::Heartbeat;
use super::TaskRunner;

/// How a task attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Succeeded and finished.
    Finished,
    /// Gave up for good and finished with an error.
    Retired,
    /// Failed without finishing; the lease expiry redelivers it.
    Released,
}

/// Runs the local task body for a leased task, then settles it with the queue.
pub struct TaskAttempt<R: TaskRunner> {
    task: LeasedTask,
    runner: Arc<R>,
    requests: QueueRequests,
    owner: String,
    retry: RetryPolicy,
}

impl<R: TaskRunner> TaskAttempt<R> {
    pub fn new(
        task: LeasedTask,
        runner: Arc<R>,
        requests: QueueRequests,
        owner: String,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            task,
            runner,
            requests,
            owner,
            retry,
        }
    }

    /// `finish`, retried with backoff while the queue is unreachable.
    async fn finish(&self, ctx: &Context, error: bool) -> Result<(), WorkError> {
        let task_id = &self.task.task_id;
        let mut attempt = 1;
        loop {
            let request = self.requests.finish(task_id, &self.owner, error);
            let result = match ctx.run(FetchItem::new(request)).await {
                Ok(item) => item.response().and_then(QueueRequests::parse_success),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        task_id = %task_id,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "Finish failed, retrying"
                    );
                    ctx.run(TimerItem::new(delay)).await?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<R: TaskRunner> Workflow for TaskAttempt<R> {
    type Output = TaskOutcome;

    async fn run(self, ctx: Context) -> Result<TaskOutcome, WorkError> {
        let task_id = self.task.task_id.clone();
        let heartbeat = Heartbeat::new(self.requests.clone(), &task_id, &self.owner);
        let body = self.runner.workflow(self.task.clone(), heartbeat);

        let outcome = match ctx.call(body).await {
            Ok(_) => {
                self.finish(&ctx, false).await?;
                tracing::info!(task_id = %task_id, "Task finished");
                TaskOutcome::Finished
            }
            Err(WorkError::GiveUp {
                max_attempts,
                message,
            }) if self.task.lease_attempts >= max_attempts => {
                tracing::warn!(
                    task_id = %task_id,
                    lease_attempts = self.task.lease_attempts,
                    max_attempts,
                    error = %message,
                    "Giving up on task"
                );
                self.finish(&ctx, true).await?;
                TaskOutcome::Retired
            }
            Err(e) => {
                tracing::warn!(
                    task_id = %task_id,
                    lease_attempts = self.task.lease_attempts,
                    error = %e,
                    "Task failed, leaving it for redelivery"
                );
                TaskOutcome::Released
            }
        };
        Ok(outcome)
    }
}
