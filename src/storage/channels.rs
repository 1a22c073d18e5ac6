use chrono::Utc;
use sqlx::PgPool;

use crate::errors::MirrorError;

use super::models::{MirrorChannel, SourceChannel, SyncStatus};

/// Fetches one active source channel by id (used by task handlers, which
/// are handed a channel row already joined at pick time — see
/// `storage::tasks::pick_next`).
pub async fn get_source_channel(pool: &PgPool, id: i64) -> Result<SourceChannel, MirrorError> {
    sqlx::query_as::<_, SourceChannel>("SELECT * FROM source_channels WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
}

/// Stores the resolved `(telegramId, accessHash)` pair and descriptive
/// fields (spec §4.4, §4.6 `resolve`). Idempotent: calling this twice with
/// the same values is a no-op write.
pub async fn store_resolved_identity(
    pool: &PgPool,
    source_channel_id: i64,
    telegram_id: i64,
    access_hash: i64,
    title: &str,
    username: Option<&str>,
    member_count: Option<i32>,
) -> Result<(), MirrorError> {
    sqlx::query(
        r#"
        UPDATE source_channels
           SET telegram_id = $2,
               access_hash = $3,
               name = $4,
               username = $5,
               member_count = $6,
               sync_status = 'syncing',
               updated_at = now()
         WHERE id = $1
        "#,
    )
    .bind(source_channel_id)
    .bind(telegram_id)
    .bind(access_hash)
    .bind(title)
    .bind(username)
    .bind(member_count)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn set_protected(
    pool: &PgPool,
    source_channel_id: i64,
    is_protected: bool,
) -> Result<(), MirrorError> {
    sqlx::query("UPDATE source_channels SET is_protected = $2, updated_at = now() WHERE id = $1")
        .bind(source_channel_id)
        .bind(is_protected)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_mirror_channel(
    pool: &PgPool,
    source_channel_id: i64,
) -> Result<Option<MirrorChannel>, MirrorError> {
    sqlx::query_as::<_, MirrorChannel>("SELECT * FROM mirror_channels WHERE source_channel_id = $1")
        .bind(source_channel_id)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
}

/// Inserts the destination row. The `telegramId` invariant (spec §3 —
/// "never rewritten to a different non-null value without operator
/// deletion") is upheld simply by never calling `UPDATE` on this table from
/// the core; only `ON DELETE CASCADE` from the source removes it.
pub async fn insert_mirror_channel(
    pool: &PgPool,
    source_channel_id: i64,
    telegram_id: Option<i64>,
    access_hash: Option<i64>,
    name: Option<&str>,
    username: Option<&str>,
    invite_link: Option<&str>,
    is_auto_created: bool,
) -> Result<MirrorChannel, MirrorError> {
    sqlx::query_as::<_, MirrorChannel>(
        r#"
        INSERT INTO mirror_channels
            (source_channel_id, telegram_id, access_hash, name, username, invite_link, is_auto_created)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(source_channel_id)
    .bind(telegram_id)
    .bind(access_hash)
    .bind(name)
    .bind(username)
    .bind(invite_link)
    .bind(is_auto_created)
    .fetch_one(pool)
    .await
    .map_err(Into::into)
}

pub async fn set_sync_status(
    pool: &PgPool,
    source_channel_id: i64,
    status: SyncStatus,
) -> Result<(), MirrorError> {
    sqlx::query("UPDATE source_channels SET sync_status = $2, updated_at = now() WHERE id = $1")
        .bind(source_channel_id)
        .bind(status)
        .execute(pool)
        .await?;
    Ok(())
}

/// Marks a history sync complete (spec §4.6 `history_full` completion):
/// `syncStatus=completed, lastSyncAt=now, lastMessageId=last,
/// totalMessages=processed`.
pub async fn mark_history_complete(
    pool: &PgPool,
    source_channel_id: i64,
    last_message_id: i64,
    total_messages: i32,
) -> Result<(), MirrorError> {
    sqlx::query(
        r#"
        UPDATE source_channels
           SET sync_status = 'completed',
               last_sync_at = $2,
               last_message_id = $3,
               total_messages = $4,
               updated_at = now()
         WHERE id = $1
        "#,
    )
    .bind(source_channel_id)
    .bind(Utc::now())
    .bind(last_message_id)
    .bind(total_messages)
    .execute(pool)
    .await?;
    Ok(())
}

/// Touches `lastSyncAt`/`lastMessageId` after a realtime `onMessage` (spec §4.7).
pub async fn touch_realtime_progress(
    pool: &PgPool,
    source_channel_id: i64,
    last_message_id: i64,
) -> Result<(), MirrorError> {
    sqlx::query(
        "UPDATE source_channels SET last_sync_at = $2, last_message_id = $3, updated_at = now() WHERE id = $1",
    )
    .bind(source_channel_id)
    .bind(Utc::now())
    .bind(last_message_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// The set of `(telegramId, accessHash)` desired by the realtime manager's
/// reconciler (spec §4.7): every active, resolved channel.
pub async fn desired_realtime_peers(
    pool: &PgPool,
) -> Result<Vec<(i64, i64, i64)>, MirrorError> {
    let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
        r#"
        SELECT id, telegram_id, access_hash
          FROM source_channels
         WHERE is_active = TRUE
           AND telegram_id IS NOT NULL
           AND access_hash IS NOT NULL
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn is_channel_active(pool: &PgPool, source_channel_id: i64) -> Result<bool, MirrorError> {
    let (active,): (bool,) =
        sqlx::query_as("SELECT is_active FROM source_channels WHERE id = $1")
            .bind(source_channel_id)
            .fetch_one(pool)
            .await?;
    Ok(active)
}
