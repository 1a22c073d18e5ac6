use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::errors::MirrorError;

use super::models::{text_preview, MappingStatus, MessageMapping, MessageType, SkipReason};

/// One upsert call; every field is optional except the natural key and
/// `messageType`, so the same function services success, failure and skip
/// writes (spec §4.1's upsert-on-natural-key SQL, generalized to a single
/// Rust entry point rather than one query per outcome).
#[derive(Debug, Clone, Default)]
pub struct MappingWrite {
    pub mirror_channel_id: Option<i64>,
    pub mirror_message_id: Option<i64>,
    pub media_group_id: Option<i64>,
    pub skip_reason: Option<SkipReason>,
    pub error_message: Option<String>,
    pub has_media: bool,
    pub file_size: Option<i64>,
    pub text: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub mirrored_at: Option<DateTime<Utc>>,
}

/// Upserts a mapping on `(sourceChannelId, sourceMessageId)`. This is *the*
/// serialization point for the "at-most-one successful mirror" invariant
/// (spec §4.1, §5, §8): concurrent history and realtime callers racing on
/// the same source message both land here, and Postgres's `ON CONFLICT`
/// resolves the race atomically — `retryCount` only increments on a
/// `failed` write, and a prior `success` row is never downgraded because
/// the caller's duplicate guard (spec §4.5 step 1) already short-circuited
/// before reaching here.
pub async fn upsert(
    pool: &PgPool,
    source_channel_id: i64,
    source_message_id: i64,
    message_type: MessageType,
    status: MappingStatus,
    write: &MappingWrite,
) -> Result<MessageMapping, MirrorError> {
    let text_preview_value = write.text.as_deref().map(text_preview);

    sqlx::query_as::<_, MessageMapping>(
        r#"
        INSERT INTO message_mappings
            (source_channel_id, source_message_id, mirror_channel_id, mirror_message_id,
             message_type, media_group_id, status, skip_reason, error_message, retry_count,
             has_media, file_size, text, text_preview, sent_at, mirrored_at)
        VALUES
            ($1, $2, $3, $4, $5, $6, $7, $8, $9,
             CASE WHEN $7 = 'failed' THEN 1 ELSE 0 END,
             $10, $11, $12, $13, $14, $15)
        ON CONFLICT (source_channel_id, source_message_id) DO UPDATE
           SET status = EXCLUDED.status,
               mirror_channel_id = COALESCE(EXCLUDED.mirror_channel_id, message_mappings.mirror_channel_id),
               mirror_message_id = COALESCE(EXCLUDED.mirror_message_id, message_mappings.mirror_message_id),
               mirrored_at = COALESCE(EXCLUDED.mirrored_at, message_mappings.mirrored_at),
               error_message = EXCLUDED.error_message,
               skip_reason = EXCLUDED.skip_reason,
               retry_count = message_mappings.retry_count
                   + (CASE WHEN EXCLUDED.status = 'failed' THEN 1 ELSE 0 END)
         RETURNING *
        "#,
    )
    .bind(source_channel_id)
    .bind(source_message_id)
    .bind(write.mirror_channel_id)
    .bind(write.mirror_message_id)
    .bind(message_type)
    .bind(write.media_group_id)
    .bind(status)
    .bind(write.skip_reason)
    .bind(&write.error_message)
    .bind(write.has_media)
    .bind(write.file_size)
    .bind(&write.text)
    .bind(&text_preview_value)
    .bind(write.sent_at)
    .bind(write.mirrored_at)
    .fetch_one(pool)
    .await
    .map_err(Into::into)
}

/// Duplicate guard lookup (spec §4.5 step 1).
pub async fn find(
    pool: &PgPool,
    source_channel_id: i64,
    source_message_id: i64,
) -> Result<Option<MessageMapping>, MirrorError> {
    sqlx::query_as::<_, MessageMapping>(
        "SELECT * FROM message_mappings WHERE source_channel_id = $1 AND source_message_id = $2",
    )
    .bind(source_channel_id)
    .bind(source_message_id)
    .fetch_optional(pool)
    .await
    .map_err(Into::into)
}

/// Cursor page ordered by `(sentAt DESC, sourceMessageId DESC)` (spec §4.1,
/// §8 cursor correctness): stable total order, no duplicates, no omissions
/// across sequential pages when driven by the last row's `(sent_at, id)`.
pub async fn page(
    pool: &PgPool,
    source_channel_id: i64,
    after: Option<(DateTime<Utc>, i64)>,
    limit: i64,
) -> Result<Vec<MessageMapping>, MirrorError> {
    let rows = match after {
        Some((sent_at, source_message_id)) => {
            sqlx::query_as::<_, MessageMapping>(
                r#"
                SELECT * FROM message_mappings
                 WHERE source_channel_id = $1
                   AND (sent_at, source_message_id) < ($2, $3)
                 ORDER BY sent_at DESC, source_message_id DESC
                 LIMIT $4
                "#,
            )
            .bind(source_channel_id)
            .bind(sent_at)
            .bind(source_message_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, MessageMapping>(
                r#"
                SELECT * FROM message_mappings
                 WHERE source_channel_id = $1
                 ORDER BY sent_at DESC, source_message_id DESC
                 LIMIT $2
                "#,
            )
            .bind(source_channel_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

/// Mappings eligible for `retry_failed` (spec §4.6): `status=failed` and
/// under the retry ceiling, oldest first.
pub async fn find_retryable(
    pool: &PgPool,
    source_channel_id: i64,
    max_retry_count: i32,
) -> Result<Vec<MessageMapping>, MirrorError> {
    sqlx::query_as::<_, MessageMapping>(
        r#"
        SELECT * FROM message_mappings
         WHERE source_channel_id = $1 AND status = 'failed' AND retry_count < $2
         ORDER BY source_message_id ASC
        "#,
    )
    .bind(source_channel_id)
    .bind(max_retry_count)
    .fetch_all(pool)
    .await
    .map_err(Into::into)
}

/// `onEdit` bookkeeping (spec §4.7): never re-sends or edits the mirror.
pub async fn record_edit(pool: &PgPool, mapping_id: i64) -> Result<(), MirrorError> {
    sqlx::query(
        "UPDATE message_mappings SET edit_count = edit_count + 1, last_edited_at = now() WHERE id = $1",
    )
    .bind(mapping_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// `onDelete` bookkeeping (spec §4.7): flags only, mirror untouched.
pub async fn record_deleted(
    pool: &PgPool,
    source_channel_id: i64,
    source_message_ids: &[i64],
) -> Result<(), MirrorError> {
    sqlx::query(
        r#"
        UPDATE message_mappings
           SET is_deleted = TRUE, deleted_at = now()
         WHERE source_channel_id = $1 AND source_message_id = ANY($2)
        "#,
    )
    .bind(source_channel_id)
    .bind(source_message_ids)
    .execute(pool)
    .await?;
    Ok(())
}

/// Marks a single exhausted failed row `skipped/failed_too_many_times`
/// (spec §4.6 `retry_failed`), or `skipped/message_deleted` when the source
/// no longer exists.
pub async fn mark_skipped(
    pool: &PgPool,
    mapping_id: i64,
    reason: SkipReason,
) -> Result<(), MirrorError> {
    sqlx::query("UPDATE message_mappings SET status = 'skipped', skip_reason = $2 WHERE id = $1")
        .bind(mapping_id)
        .bind(reason)
        .execute(pool)
        .await?;
    Ok(())
}
