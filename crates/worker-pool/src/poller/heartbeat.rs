//! Heartbeats for a leased task.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::client::QueueRequests;
use crate::engine::{Context, Handle, TimerItem, WorkError};
use crate::fetch::FetchItem;
use crate::process::ProcessItem;

/// Sends status updates for one leased task, each with the next sequence number.
///
/// Heartbeats are fire-and-forget: a rejected or failed heartbeat never
/// fails the task body.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    requests: QueueRequests,
    task_id: String,
    owner: String,
    index: Arc<AtomicI64>,
}

impl Heartbeat {
    pub fn new(requests: QueueRequests, task_id: &str, owner: &str) -> Self {
        Self {
            requests,
            task_id: task_id.to_string(),
            owner: owner.to_string(),
            index: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Index of the most recent heartbeat, 0 before the first.
    pub fn last_index(&self) -> i64 {
        self.index.load(Ordering::SeqCst)
    }

    pub fn beat(&self, ctx: &Context, message: &str) -> Handle<FetchItem> {
        let index = self.index.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(task_id = %self.task_id, index, message, "Heartbeat");
        let request = self
            .requests
            .heartbeat(&self.task_id, &self.owner, message, index);
        ctx.spawn(Handle::work(FetchItem::new(request)))
    }
}

/// Run a subprocess, sending `message` as a heartbeat every `period` until
/// it exits.
pub async fn run_with_heartbeats(
    ctx: &Context,
    heartbeat: &Heartbeat,
    item: ProcessItem,
    period: Duration,
    message: &str,
) -> Result<ProcessItem, WorkError> {
    let process = Handle::work(item);
    heartbeat.beat(ctx, message);
    loop {
        let tick = Handle::work(TimerItem::new(period));
        ctx.first_of(&[process.erase(), tick.erase()]).await?;
        if process.is_done() {
            break;
        }
        heartbeat.beat(ctx, message);
    }
    ctx.wait(&process).await?.into_result()
}
