//! Lease protocol rules.
//!
//! Pure functions over a single [`QueuedTask`]. Every store applies these
//! while holding its row lock, so both backends agree on the protocol.

use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;

use crate::db::models::{FinishRequest, HeartbeatRequest, QueuedTask, TaskStatus};
use crate::error::{AppError, AppResult};

/// Convert a lease length in seconds to a `chrono` duration, millisecond precision.
pub fn lease_duration(seconds: f64) -> AppResult<Duration> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(AppError::Validation(format!("Invalid lease length: {}", seconds)));
    }
    Duration::try_milliseconds((seconds * 1000.0).round() as i64)
        .ok_or_else(|| AppError::Validation(format!("Lease length out of range: {}", seconds)))
}

/// `now` pushed out by `seconds`, rejecting deadlines chrono cannot represent.
pub fn lease_deadline(now: DateTime<Utc>, seconds: f64) -> AppResult<DateTime<Utc>> {
    now.checked_add_signed(lease_duration(seconds)?)
        .ok_or_else(|| AppError::Validation(format!("Lease length out of range: {}", seconds)))
}

/// Live and past its eta.
pub fn is_leasable(task: &QueuedTask, now: DateTime<Utc>) -> bool {
    task.status == TaskStatus::Live && task.eta <= now
}

/// Oldest eta first, then creation time, then id.
pub fn lease_order(a: &QueuedTask, b: &QueuedTask) -> Ordering {
    a.eta
        .cmp(&b.eta)
        .then_with(|| a.created.cmp(&b.created))
        .then_with(|| a.task_id.cmp(&b.task_id))
}

/// Hand the task to `owner` until `now + timeout_seconds`. The task is left
/// untouched when the deadline is out of range.
pub fn apply_lease(
    task: &mut QueuedTask,
    owner: &str,
    timeout_seconds: f64,
    now: DateTime<Utc>,
) -> AppResult<()> {
    task.eta = lease_deadline(now, timeout_seconds)?;
    task.lease_attempts += 1;
    task.last_owner = Some(owner.to_string());
    task.last_lease_seconds = Some(timeout_seconds);
    task.heartbeat = None;
    task.heartbeat_number = None;
    Ok(())
}

fn check_lease_holder(task: &QueuedTask, owner: &str, now: DateTime<Utc>) -> AppResult<()> {
    if task.last_owner.as_deref() != Some(owner) {
        return Err(AppError::NotOwner {
            task_id: task.task_id.clone(),
            owner: owner.to_string(),
            current: task.last_owner.clone(),
        });
    }
    if task.eta <= now {
        return Err(AppError::LeaseExpired(task.task_id.clone()));
    }
    Ok(())
}

/// Record a heartbeat and push the eta out by the last lease's duration.
pub fn apply_heartbeat(
    task: &mut QueuedTask,
    request: &HeartbeatRequest,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if task.status.is_terminal() {
        return Err(AppError::LeaseExpired(task.task_id.clone()));
    }
    check_lease_holder(task, &request.owner, now)?;

    if let Some(last) = task.heartbeat_number {
        if request.index <= last {
            return Err(AppError::StaleHeartbeat {
                task_id: task.task_id.clone(),
                index: request.index,
                last,
            });
        }
    }

    let eta = lease_deadline(now, task.last_lease_seconds.unwrap_or(0.0))?;
    task.heartbeat = Some(request.message.clone());
    task.heartbeat_number = Some(request.index);
    task.eta = eta;
    Ok(())
}

/// Move the task to done or error.
///
/// Returns `Ok(false)` without touching the task when it already left `Live`.
pub fn apply_finish(
    task: &mut QueuedTask,
    request: &FinishRequest,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    if task.status.is_terminal() {
        return Ok(false);
    }
    check_lease_holder(task, &request.owner, now)?;

    task.status = if request.error {
        TaskStatus::Error
    } else {
        TaskStatus::Done
    };
    task.finished = Some(now);
    Ok(true)
}

/// Cancel a live task. Returns whether anything changed.
pub fn apply_cancel(task: &mut QueuedTask, now: DateTime<Utc>) -> bool {
    if task.status != TaskStatus::Live {
        return false;
    }
    task.status = TaskStatus::Canceled;
    task.finished = Some(now);
    true
}
