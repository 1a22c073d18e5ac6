use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use crate::errors::MirrorError;
use crate::gateway::TelegramGateway;
use crate::mirror::{MessageMirror, MirrorOutcome};
use crate::settings::Settings;
use crate::storage::events;
use crate::storage::mappings;
use crate::storage::models::{EventLevel, SkipReason, SourceChannel};

/// `retry_failed` handler (spec §4.6 step 3). Oldest-first re-attempt of
/// every mapping under the retry ceiling; a source message that no longer
/// exists is marked `skipped/message_deleted` rather than retried forever.
pub async fn run(
    pool: &PgPool,
    gateway: &dyn TelegramGateway,
    settings: &Arc<Settings>,
    mirror: &MessageMirror,
    channel: &SourceChannel,
) -> Result<(), MirrorError> {
    let max_retry_count = settings.max_retry_count().await? as i32;
    let skip_after_max = settings.skip_after_max_retry().await?;

    let telegram_id = channel
        .telegram_id
        .ok_or_else(|| MirrorError::Config("retry task requires a resolved telegramId".into()))?;
    let access_hash = channel
        .access_hash
        .ok_or_else(|| MirrorError::Config("retry task requires a resolved accessHash".into()))?;

    let retryable = mappings::find_retryable(pool, channel.id, max_retry_count).await?;

    for mapping in retryable {
        if mapping.retry_count >= max_retry_count {
            if skip_after_max {
                mappings::mark_skipped(pool, mapping.id, SkipReason::FailedTooManyTimes).await?;
            }
            continue;
        }

        let refetched = gateway
            .get_message(telegram_id, access_hash, mapping.source_message_id as i32)
            .await?;

        let Some(message) = refetched else {
            mappings::mark_skipped(pool, mapping.id, SkipReason::MessageDeleted).await?;
            info!(mapping_id = mapping.id, "source message deleted, marking skipped");
            continue;
        };

        let outcome = mirror.mirror_one(channel, &message).await?;
        if mapping.retry_count > 0 && matches!(outcome, MirrorOutcome::Success { .. }) {
            events::append(
                pool,
                Some(channel.id),
                EventLevel::Info,
                &format!("message {} recovered after {} failed attempt(s)", mapping.source_message_id, mapping.retry_count),
                None,
            )
            .await?;
        }
    }

    Ok(())
}
