use chrono::Utc;
use sqlx::PgPool;

use crate::errors::MirrorError;

use super::models::{SourceChannel, SyncTask, TaskStatus, TaskType};

/// A task row joined with its channel (spec §4.6 pick-next query).
#[derive(Debug, Clone)]
pub struct PickedTask {
    pub task: SyncTask,
    pub channel: SourceChannel,
}

/// Picks the next pending task for an active channel, ordered by channel
/// priority then task age (spec §4.6 step 1), and flips it to `running` in
/// the same transaction so two racing runners could never both pick it —
/// v1 assumes a single runner (spec §5), but the transaction costs nothing.
pub async fn pick_next(pool: &PgPool) -> Result<Option<PickedTask>, MirrorError> {
    let mut tx = pool.begin().await?;

    let row: Option<(i64, i64)> = sqlx::query_as(
        r#"
        SELECT t.id, t.source_channel_id
          FROM sync_tasks t
          JOIN source_channels c ON c.id = t.source_channel_id
         WHERE t.status = 'pending' AND c.is_active = TRUE
         ORDER BY c.priority DESC, t.created_at ASC
         LIMIT 1
         FOR UPDATE OF t SKIP LOCKED
        "#,
    )
    .fetch_optional(&mut *tx)
    .await?;

    let Some((task_id, _channel_id)) = row else {
        tx.rollback().await?;
        return Ok(None);
    };

    sqlx::query(
        "UPDATE sync_tasks SET status = 'running', started_at = $2, updated_at = now() WHERE id = $1",
    )
    .bind(task_id)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    let task: SyncTask = sqlx::query_as("SELECT * FROM sync_tasks WHERE id = $1")
        .bind(task_id)
        .fetch_one(&mut *tx)
        .await?;
    let channel: SourceChannel = sqlx::query_as("SELECT * FROM source_channels WHERE id = $1")
        .bind(task.source_channel_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(Some(PickedTask { task, channel }))
}

/// Enqueues a task unless one of the same type is already in-flight for the
/// channel (spec §3 SyncTask in-flight singleton, enforced again at the DB
/// level by `uq_sync_tasks_inflight_singleton`).
pub async fn enqueue(
    pool: &PgPool,
    source_channel_id: i64,
    task_type: TaskType,
) -> Result<Option<SyncTask>, MirrorError> {
    let existing: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT id FROM sync_tasks
         WHERE source_channel_id = $1 AND task_type = $2
           AND status IN ('pending', 'running', 'paused')
        "#,
    )
    .bind(source_channel_id)
    .bind(task_type)
    .fetch_optional(pool)
    .await?;

    if existing.is_some() {
        return Ok(None);
    }

    let task = sqlx::query_as::<_, SyncTask>(
        "INSERT INTO sync_tasks (source_channel_id, task_type) VALUES ($1, $2) RETURNING *",
    )
    .bind(source_channel_id)
    .bind(task_type)
    .fetch_one(pool)
    .await?;

    Ok(Some(task))
}

pub async fn mark_completed(pool: &PgPool, task_id: i64) -> Result<(), MirrorError> {
    sqlx::query(
        "UPDATE sync_tasks SET status = 'completed', completed_at = $2, updated_at = now() WHERE id = $1",
    )
    .bind(task_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Flips a task to `failed` (spec §7 category 3: per-task system error).
/// Caller is responsible for also flipping the channel's `syncStatus=error`.
pub async fn mark_failed(pool: &PgPool, task_id: i64, error: &str) -> Result<(), MirrorError> {
    sqlx::query(
        "UPDATE sync_tasks SET status = 'failed', last_error = $2, updated_at = now() WHERE id = $1",
    )
    .bind(task_id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Flips a task to `paused` (spec §7 category 4: account-global FLOOD_WAIT
/// beyond the configured ceiling). `lastError` carries the wait duration so
/// the UI can display an ETA.
pub async fn mark_paused(pool: &PgPool, task_id: i64, reason: &str) -> Result<(), MirrorError> {
    sqlx::query(
        "UPDATE sync_tasks SET status = 'paused', last_error = $2, paused_at = $3, updated_at = now() WHERE id = $1",
    )
    .bind(task_id)
    .bind(reason)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Resumes a paused task: `paused -> pending`, clearing the transient
/// fields (spec §4.6 pause semantics).
pub async fn resume(pool: &PgPool, task_id: i64) -> Result<(), MirrorError> {
    sqlx::query(
        r#"
        UPDATE sync_tasks
           SET status = 'pending', last_error = NULL, paused_at = NULL, completed_at = NULL, updated_at = now()
         WHERE id = $1 AND status = 'paused'
        "#,
    )
    .bind(task_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Periodic progress persistence for `history_full`/`history_partial`
/// (spec §4.6: "every 10 successful invocations"). `last_processed_id` is
/// monotonically non-decreasing by construction: callers only pass the id
/// of the message they just processed, and history iteration is strictly
/// ascending (spec §5).
pub async fn persist_progress(
    pool: &PgPool,
    task_id: i64,
    progress_current: i64,
    last_processed_id: i64,
    failed_count: i64,
    skipped_count: i64,
) -> Result<(), MirrorError> {
    sqlx::query(
        r#"
        UPDATE sync_tasks
           SET progress_current = $2,
               last_processed_id = $3,
               failed_count = $4,
               skipped_count = $5,
               updated_at = now()
         WHERE id = $1
        "#,
    )
    .bind(task_id)
    .bind(progress_current)
    .bind(last_processed_id)
    .bind(failed_count)
    .bind(skipped_count)
    .execute(pool)
    .await?;
    Ok(())
}

/// Samples the current status of a running task, used by long-running
/// handlers to detect an operator-issued pause between messages (spec §4.6
/// pause semantics, §5 cancellation points).
pub async fn current_status(pool: &PgPool, task_id: i64) -> Result<TaskStatus, MirrorError> {
    let (status,): (TaskStatus,) = sqlx::query_as("SELECT status FROM sync_tasks WHERE id = $1")
        .bind(task_id)
        .fetch_one(pool)
        .await?;
    Ok(status)
}
