//! Work queue table queries.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::db::models::{CancelRequest, QueuedTask, TaskStatus};
use crate::error::AppResult;

const COLUMNS: &str = "task_id, queue_name, status, eta, source, created, finished, \
    lease_attempts, last_owner, last_lease_seconds, heartbeat, heartbeat_number, \
    payload, content_type";

/// Insert a task unless its id already exists. Returns whether a row was written.
pub async fn insert_task<'e, E: PgExecutor<'e>>(exec: E, task: &QueuedTask) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO shotdiff.work_queue
            (task_id, queue_name, status, eta, source, created, lease_attempts, payload, content_type)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (task_id) DO NOTHING
        "#,
    )
    .bind(&task.task_id)
    .bind(&task.queue_name)
    .bind(task.status.as_str())
    .bind(task.eta)
    .bind(&task.source)
    .bind(task.created)
    .bind(task.lease_attempts)
    .bind(&task.payload)
    .bind(&task.content_type)
    .execute(exec)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Lock up to `limit` leasable tasks, oldest eta first, skipping rows other
/// transactions hold.
pub async fn select_leasable_for_update<'e, E: PgExecutor<'e>>(
    exec: E,
    queue: &str,
    now: DateTime<Utc>,
    limit: i64,
) -> AppResult<Vec<QueuedTask>> {
    let sql = format!(
        r#"
        SELECT {COLUMNS}
        FROM shotdiff.work_queue
        WHERE queue_name = $1 AND status = 'live' AND eta <= $2
        ORDER BY eta, created, task_id
        LIMIT $3
        FOR UPDATE SKIP LOCKED
        "#
    );
    let tasks = sqlx::query_as::<_, QueuedTask>(&sql)
        .bind(queue)
        .bind(now)
        .bind(limit)
        .fetch_all(exec)
        .await?;
    Ok(tasks)
}

/// Lock one task row.
pub async fn select_for_update<'e, E: PgExecutor<'e>>(
    exec: E,
    queue: &str,
    task_id: &str,
) -> AppResult<Option<QueuedTask>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM shotdiff.work_queue WHERE queue_name = $1 AND task_id = $2 FOR UPDATE"
    );
    let task = sqlx::query_as::<_, QueuedTask>(&sql)
        .bind(queue)
        .bind(task_id)
        .fetch_optional(exec)
        .await?;
    Ok(task)
}

/// Write back every mutable column of a task.
pub async fn update_task<'e, E: PgExecutor<'e>>(exec: E, task: &QueuedTask) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE shotdiff.work_queue
        SET status = $3, eta = $4, finished = $5, lease_attempts = $6, last_owner = $7,
            last_lease_seconds = $8, heartbeat = $9, heartbeat_number = $10
        WHERE queue_name = $1 AND task_id = $2
        "#,
    )
    .bind(&task.queue_name)
    .bind(&task.task_id)
    .bind(task.status.as_str())
    .bind(task.eta)
    .bind(task.finished)
    .bind(task.lease_attempts)
    .bind(&task.last_owner)
    .bind(task.last_lease_seconds)
    .bind(&task.heartbeat)
    .bind(task.heartbeat_number)
    .execute(exec)
    .await?;
    Ok(())
}

/// Cancel every live task matching the filter.
pub async fn cancel_matching<'e, E: PgExecutor<'e>>(
    exec: E,
    queue: &str,
    filter: &CancelRequest,
    now: DateTime<Utc>,
) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE shotdiff.work_queue
        SET status = 'canceled', finished = $2
        WHERE queue_name = $1 AND status = 'live'
          AND ($3::text IS NULL OR task_id = $3)
          AND ($4::text IS NULL OR source = $4)
        "#,
    )
    .bind(queue)
    .bind(now)
    .bind(&filter.task_id)
    .bind(&filter.source)
    .execute(exec)
    .await?;
    Ok(result.rows_affected())
}

pub async fn get_task<'e, E: PgExecutor<'e>>(
    exec: E,
    queue: &str,
    task_id: &str,
) -> AppResult<Option<QueuedTask>> {
    let sql = format!("SELECT {COLUMNS} FROM shotdiff.work_queue WHERE queue_name = $1 AND task_id = $2");
    let task = sqlx::query_as::<_, QueuedTask>(&sql)
        .bind(queue)
        .bind(task_id)
        .fetch_optional(exec)
        .await?;
    Ok(task)
}

/// Newest first.
pub async fn list_tasks<'e, E: PgExecutor<'e>>(
    exec: E,
    queue: &str,
    status: Option<TaskStatus>,
    limit: i64,
) -> AppResult<Vec<QueuedTask>> {
    let sql = format!(
        r#"
        SELECT {COLUMNS}
        FROM shotdiff.work_queue
        WHERE queue_name = $1 AND ($2::text IS NULL OR status = $2)
        ORDER BY created DESC, task_id
        LIMIT $3
        "#
    );
    let tasks = sqlx::query_as::<_, QueuedTask>(&sql)
        .bind(queue)
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(exec)
        .await?;
    Ok(tasks)
}
