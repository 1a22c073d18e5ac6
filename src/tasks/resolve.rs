use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use crate::errors::MirrorError;
use crate::gateway::TelegramGateway;
use crate::ratelimiter::RateLimiter;
use crate::settings::Settings;
use crate::storage::channels;
use crate::storage::events;
use crate::storage::models::{EventLevel, SourceChannel, SyncStatus, TaskType};
use crate::storage::tasks;

/// `resolve` handler (spec §4.6 step 3). Idempotent: a channel whose
/// identity is already known skips straight to the mirror-target step.
pub async fn run(
    pool: &PgPool,
    gateway: &dyn TelegramGateway,
    rate_limiter: &RateLimiter,
    settings: &Arc<Settings>,
    channel: &SourceChannel,
) -> Result<(), MirrorError> {
    if channel.telegram_id.is_none() || channel.access_hash.is_none() {
        let identifier = channel.channel_identifier.clone();
        let resolved = rate_limiter
            .execute_with_retry(|| {
                let identifier = identifier.clone();
                async move { gateway.resolve_channel(&identifier).await }
            })
            .await?;

        channels::store_resolved_identity(
            pool,
            channel.id,
            resolved.telegram_id,
            resolved.access_hash,
            &resolved.title,
            resolved.username.as_deref(),
            resolved.member_count,
        )
        .await?;
        info!(channel_id = channel.id, telegram_id = resolved.telegram_id, "resolved channel identity");
        events::append(
            pool,
            Some(channel.id),
            EventLevel::Info,
            &format!("resolved channel identity: telegram_id={}", resolved.telegram_id),
            None,
        )
        .await?;
    }

    if channels::get_mirror_channel(pool, channel.id).await?.is_none() {
        let prefix = settings.auto_channel_prefix().await?;
        let title = format!("{}{}", prefix, channel.name.as_deref().unwrap_or(&channel.channel_identifier));
        let created = rate_limiter
            .execute_with_retry(|| {
                let title = title.clone();
                async move { gateway.create_private_channel(&title, "").await }
            })
            .await?;

        channels::insert_mirror_channel(
            pool,
            channel.id,
            Some(created.telegram_id),
            Some(created.access_hash),
            Some(&title),
            None,
            created.invite_link.as_deref(),
            true,
        )
        .await?;
        info!(channel_id = channel.id, "auto-created mirror channel");
        events::append(
            pool,
            Some(channel.id),
            EventLevel::Info,
            &format!("auto-created mirror channel {title:?}"),
            None,
        )
        .await?;
    }

    channels::set_sync_status(pool, channel.id, SyncStatus::Syncing).await?;

    tasks::enqueue(pool, channel.id, TaskType::HistoryFull).await?;

    Ok(())
}
