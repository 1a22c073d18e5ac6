use std::collections::HashSet;
use std::sync::Arc;

use grammers_client::Update;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::MirrorError;
use crate::gateway::GrammersGateway;
use crate::mirror::{MessageMirror, MirrorOutcome};
use crate::ratelimiter::RateLimiter;
use crate::settings::Settings;
use crate::storage::{channels, mappings};

const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Owns the live subscription set and dispatches `onMessage`/`onEdit`/
/// `onDelete` (spec §4.7). `grammers-client`'s update stream has no
/// per-channel unsubscribe, so the `subscribed` set only ever grows; a
/// channel flipped inactive is filtered out again in the handlers rather
/// than actually unsubscribed (spec's documented asymmetry).
pub struct RealtimeManager {
    pool: PgPool,
    settings: Arc<Settings>,
    gateway: Arc<GrammersGateway>,
    // Retained so callers can reach the account-wide limiter from here if a
    // future handler needs to call the gateway directly; `mirror_one`
    // already applies it internally for the send step.
    #[allow(dead_code)]
    rate_limiter: Arc<RateLimiter>,
    mirror: Arc<MessageMirror>,
    subscribed: RwLock<HashSet<(i64, i64)>>,
}

impl RealtimeManager {
    pub fn new(
        pool: PgPool,
        settings: Arc<Settings>,
        gateway: Arc<GrammersGateway>,
        rate_limiter: Arc<RateLimiter>,
        mirror: Arc<MessageMirror>,
    ) -> Self {
        Self {
            pool,
            settings,
            gateway,
            rate_limiter,
            mirror,
            subscribed: RwLock::new(HashSet::new()),
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(RECONCILE_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("realtime manager shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.reconcile().await {
                        error!(%err, "reconcile failed");
                    }
                }
                update = self.gateway.next_update() => {
                    match update {
                        Ok(update) => {
                            if let Err(err) = self.handle_update(update).await {
                                error!(%err, "failed to handle realtime update");
                            }
                        }
                        Err(err) => {
                            error!(%err, "update stream error");
                        }
                    }
                }
            }
        }
    }

    /// `desired \ subscribed` (spec §4.7). `grammers-client`'s update
    /// stream already delivers every update the account receives once
    /// connected; "subscribing" here means tracking the desired set so
    /// `onMessage` can ignore channels we were never asked to mirror.
    async fn reconcile(&self) -> Result<(), MirrorError> {
        let desired = channels::desired_realtime_peers(&self.pool).await?;
        let mut guard = self.subscribed.write().await;
        let mut added = 0;
        for (_, telegram_id, access_hash) in desired {
            if guard.insert((telegram_id, access_hash)) {
                added += 1;
            }
        }
        if added > 0 {
            debug!(added, "realtime subscription set grew");
        }
        Ok(())
    }

    async fn is_subscribed(&self, telegram_id: i64) -> bool {
        self.subscribed
            .read()
            .await
            .iter()
            .any(|(id, _)| *id == telegram_id)
    }

    async fn handle_update(&self, update: Update) -> Result<(), MirrorError> {
        match update {
            Update::NewMessage(message) => self.on_message(message).await,
            Update::MessageEdited(message) => self.on_edit(message).await,
            Update::MessageDeleted(deletion) => self.on_delete(deletion).await,
            _ => Ok(()),
        }
    }

    async fn on_message(&self, message: grammers_client::types::Message) -> Result<(), MirrorError> {
        let chat = message.chat().pack();
        if !self.is_subscribed(chat.id).await {
            return Ok(());
        }

        let Some(channel) = self.find_active_channel(chat.id).await? else {
            return Ok(());
        };

        let gateway_message = GrammersGateway::wrap_update_message(message);
        let outcome = self.mirror.mirror_one(&channel, &gateway_message).await?;

        if let MirrorOutcome::Success { .. } = outcome {
            channels::touch_realtime_progress(&self.pool, channel.id, gateway_message.id as i64).await?;
        }

        Ok(())
    }

    async fn on_edit(&self, message: grammers_client::types::Message) -> Result<(), MirrorError> {
        if !self.settings.sync_message_edits().await? {
            return Ok(());
        }

        let chat = message.chat().pack();
        let Some(channel) = self.find_active_channel(chat.id).await? else {
            return Ok(());
        };

        if let Some(mapping) = mappings::find(&self.pool, channel.id, message.id() as i64).await? {
            mappings::record_edit(&self.pool, mapping.id).await?;
        }

        Ok(())
    }

    async fn on_delete(&self, deletion: grammers_client::types::MessageDeletion) -> Result<(), MirrorError> {
        if !self.settings.sync_message_deletions().await? {
            return Ok(());
        }

        let Some(channel_telegram_id) = deletion.channel_id() else {
            warn!("message deletion with no channel id, cannot map to a source channel");
            return Ok(());
        };
        let Some(channel) = self.find_active_channel(channel_telegram_id).await? else {
            return Ok(());
        };

        let ids: Vec<i64> = deletion.messages().iter().map(|&id| id as i64).collect();
        mappings::record_deleted(&self.pool, channel.id, &ids).await?;
        Ok(())
    }

    async fn find_active_channel(
        &self,
        telegram_id: i64,
    ) -> Result<Option<crate::storage::models::SourceChannel>, MirrorError> {
        let channel: Option<crate::storage::models::SourceChannel> = sqlx::query_as(
            "SELECT * FROM source_channels WHERE telegram_id = $1 AND is_active = TRUE",
        )
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(channel)
    }
}
