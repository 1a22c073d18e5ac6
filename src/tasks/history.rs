use tokio_util::sync::CancellationToken;
use sqlx::PgPool;
use tracing::info;

use crate::errors::MirrorError;
use crate::gateway::{GatewayMessage, TelegramGateway};
use crate::mirror::{MessageMirror, MirrorOutcome};
use crate::ratelimiter::RateLimiter;
use crate::storage::channels;
use crate::storage::models::{SourceChannel, SyncTask, TaskStatus};
use crate::storage::tasks;

const PROGRESS_FLUSH_EVERY: u32 = 10;
const MAX_GROUP_SIZE: usize = 120;

/// `history_full` / `history_partial` handler (spec §4.6 step 3). Iterates
/// strictly-increasing message ids from `lastProcessedId`, coalescing
/// consecutive same-`mediaGroupId` messages into a single C5 invocation
/// (spec's "media-group coalescing").
pub async fn run(
    pool: &PgPool,
    gateway: &dyn TelegramGateway,
    rate_limiter: &RateLimiter,
    mirror: &MessageMirror,
    task: &SyncTask,
    channel: &SourceChannel,
    shutdown: &CancellationToken,
) -> Result<(), MirrorError> {
    let telegram_id = channel
        .telegram_id
        .ok_or_else(|| MirrorError::Config("history task requires a resolved telegramId".into()))?;
    let access_hash = channel
        .access_hash
        .ok_or_else(|| MirrorError::Config("history task requires a resolved accessHash".into()))?;

    let from = task.last_processed_id.unwrap_or(0) as i32;

    let messages = rate_limiter
        .execute_with_retry(|| async { gateway.iterate_history(telegram_id, access_hash, from).await })
        .await?;

    let mut processed_since_flush: u32 = 0;
    let mut failed_count = task.failed_count;
    let mut skipped_count = task.skipped_count;
    let mut progress_current = task.progress_current;
    let mut last_processed_id = task.last_processed_id.unwrap_or(0);

    let mut groups: Vec<Vec<GatewayMessage>> = Vec::new();
    for message in messages {
        match message.media_group_id {
            Some(gid) if matches!(groups.last(), Some(last) if last.last().and_then(|m| m.media_group_id) == Some(gid)) => {
                let last_group = groups.last_mut().expect("checked above");
                if last_group.len() < MAX_GROUP_SIZE {
                    last_group.push(message);
                } else {
                    groups.push(vec![message]);
                }
            }
            _ => groups.push(vec![message]),
        }
    }

    for group in groups {
        if tasks::current_status(pool, task.id).await? == TaskStatus::Paused {
            info!(task_id = task.id, "task paused, returning cleanly");
            return Ok(());
        }
        if shutdown.is_cancelled() {
            return Ok(());
        }

        let outcomes = mirror.mirror_group(channel, &group).await?;
        for (message, outcome) in group.iter().zip(outcomes.iter()) {
            last_processed_id = last_processed_id.max(message.id as i64);
            match outcome {
                MirrorOutcome::Failed(_) => failed_count += 1,
                MirrorOutcome::Skipped(_) => skipped_count += 1,
                MirrorOutcome::Success { .. } | MirrorOutcome::NoopSuccess => {}
            }
            progress_current += 1;
        }

        processed_since_flush += 1;
        if processed_since_flush >= PROGRESS_FLUSH_EVERY {
            tasks::persist_progress(
                pool,
                task.id,
                progress_current,
                last_processed_id,
                failed_count,
                skipped_count,
            )
            .await?;
            processed_since_flush = 0;
        }
    }

    tasks::persist_progress(
        pool,
        task.id,
        progress_current,
        last_processed_id,
        failed_count,
        skipped_count,
    )
    .await?;

    channels::mark_history_complete(pool, channel.id, last_processed_id, progress_current as i32).await?;

    Ok(())
}
