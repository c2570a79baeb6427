//! Schema bootstrap for the work queue table.

use crate::db::DbPool;
use crate::error::AppResult;

pub const SCHEMA: &str = "shotdiff";
pub const TABLE: &str = "work_queue";

const DDL: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS shotdiff",
    r#"
    CREATE TABLE IF NOT EXISTS shotdiff.work_queue (
        task_id            TEXT PRIMARY KEY,
        queue_name         TEXT NOT NULL,
        status             TEXT NOT NULL DEFAULT 'live',
        eta                TIMESTAMPTZ NOT NULL,
        source             TEXT NOT NULL DEFAULT '',
        created            TIMESTAMPTZ NOT NULL,
        finished           TIMESTAMPTZ,
        lease_attempts     INTEGER NOT NULL DEFAULT 0,
        last_owner         TEXT,
        last_lease_seconds DOUBLE PRECISION,
        heartbeat          TEXT,
        heartbeat_number   BIGINT,
        payload            TEXT NOT NULL,
        content_type       TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS work_queue_lease_idx ON shotdiff.work_queue (queue_name, status, eta)",
    "CREATE INDEX IF NOT EXISTS work_queue_source_idx ON shotdiff.work_queue (queue_name, source)",
];

/// Create the schema, table and indexes if they are missing.
pub async fn init_schema(pool: &DbPool) -> AppResult<()> {
    let mut tx = pool.begin().await?;
    for statement in DDL {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    tracing::info!(schema = SCHEMA, table = TABLE, "Work queue schema ready");
    Ok(())
}

/// Whether the work queue table exists.
pub async fn schema_exists(pool: &DbPool) -> AppResult<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2)",
    )
    .bind(SCHEMA)
    .bind(TABLE)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}
