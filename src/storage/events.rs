use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::MirrorError;

use super::models::EventLevel;

/// Appends an operator-facing `SyncEvent` row (spec §4.8). The core never
/// logs per-message successes here — only state transitions of interest
/// (task start/pause/complete/fail, resolve result, skip due to
/// protection/filter, recovered-from-error) — callers enforce that by only
/// calling this from those specific code paths, never from a per-message
/// success in `mirror.rs`'s hot path.
///
/// `sync_tasks` already carries an `AFTER INSERT OR UPDATE` trigger that
/// issues `pg_notify('tg_back_sync_tasks_v1', ...)` (migrations/0001_init.sql),
/// so task-state event rows don't need a second explicit notify here; this
/// function's job is strictly the durable log entry.
pub async fn append(
    pool: &PgPool,
    source_channel_id: Option<i64>,
    level: EventLevel,
    message: &str,
    correlation_id: Option<Uuid>,
) -> Result<(), MirrorError> {
    sqlx::query(
        "INSERT INTO sync_events (source_channel_id, level, message, correlation_id) VALUES ($1, $2, $3, $4)",
    )
    .bind(source_channel_id)
    .bind(level)
    .bind(message)
    .bind(correlation_id)
    .execute(pool)
    .await?;
    Ok(())
}
