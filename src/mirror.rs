use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::errors::MirrorError;
use crate::filter::FilterEngine;
use crate::gateway::{GatewayMessage, TelegramGateway};
use crate::ratelimiter::RateLimiter;
use crate::settings::Settings;
use crate::storage::channels;
use crate::storage::events;
use crate::storage::mappings::{self, MappingWrite};
use crate::storage::models::{EventLevel, MappingStatus, MirrorMode, SkipReason, SourceChannel};

/// The four terminal states of the per-message procedure (spec §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOutcome {
    NoopSuccess,
    Success { mirror_message_id: i32 },
    Skipped(SkipReason),
    Failed(String),
}

/// What to do with a single group member once its own duplicate/skip
/// decision has been made (spec §4.5 steps 1-3).
enum Decision {
    Done(MirrorOutcome),
    Send,
}

pub struct MessageMirror {
    pool: PgPool,
    settings: Arc<Settings>,
    rate_limiter: Arc<RateLimiter>,
    gateway: Arc<dyn TelegramGateway>,
    filter: Arc<FilterEngine>,
}

impl MessageMirror {
    pub fn new(
        pool: PgPool,
        settings: Arc<Settings>,
        rate_limiter: Arc<RateLimiter>,
        gateway: Arc<dyn TelegramGateway>,
        filter: Arc<FilterEngine>,
    ) -> Self {
        Self {
            pool,
            settings,
            rate_limiter,
            gateway,
            filter,
        }
    }

    /// Mirrors a single logical unit: one message, or one media-group batch
    /// when `group` carries more than one member (spec §4.5 step 4, §4.6).
    /// Every member still gets its own duplicate guard, skip decision and
    /// mapping row, but in Forward mode the group is sent with exactly one
    /// `forwardMessages` call (spec §4.4 "positional alignment"), not one
    /// call per member.
    pub async fn mirror_group(
        &self,
        source: &SourceChannel,
        group: &[GatewayMessage],
    ) -> Result<Vec<MirrorOutcome>, MirrorError> {
        if group.len() < 2 || source.mirror_mode == MirrorMode::Copy {
            let mut outcomes = Vec::with_capacity(group.len());
            for message in group {
                outcomes.push(self.mirror_one(source, message).await?);
            }
            return Ok(outcomes);
        }

        let mut outcomes: Vec<Option<MirrorOutcome>> = Vec::with_capacity(group.len());
        let mut pending = Vec::new();
        for message in group {
            match self.decide(source, message).await? {
                Decision::Done(outcome) => outcomes.push(Some(outcome)),
                Decision::Send => {
                    pending.push(message);
                    outcomes.push(None);
                }
            }
        }

        if !pending.is_empty() {
            let mirror_channel = channels::get_mirror_channel(&self.pool, source.id)
                .await?
                .ok_or_else(|| MirrorError::Config("no mirror channel for source".into()))?;
            let (to_id, to_hash) = match (mirror_channel.telegram_id, mirror_channel.access_hash) {
                (Some(id), Some(hash)) => (id, hash),
                _ => return Err(MirrorError::Config("mirror channel not yet created".into())),
            };
            let source_id = source
                .telegram_id
                .ok_or_else(|| MirrorError::Config("source has no telegram id".into()))?;
            let source_hash = source
                .access_hash
                .ok_or_else(|| MirrorError::Config("source has no access hash".into()))?;
            let ids: Vec<i32> = pending.iter().map(|m| m.id).collect();

            let send_result = self
                .rate_limiter
                .execute_with_retry(|| {
                    let gateway = Arc::clone(&self.gateway);
                    let ids = ids.clone();
                    async move {
                        gateway
                            .forward_messages(source_id, source_hash, to_id, to_hash, &ids)
                            .await
                    }
                })
                .await;

            let mut pending_outcomes = Vec::with_capacity(pending.len());
            match send_result {
                Ok(forwarded) => {
                    for (position, message) in pending.iter().enumerate() {
                        match forwarded.get(position).copied().flatten() {
                            Some(mirror_message_id) => {
                                self.commit_success(source, message, mirror_channel.id, mirror_message_id)
                                    .await?;
                                pending_outcomes.push(MirrorOutcome::Success { mirror_message_id });
                            }
                            None => {
                                let reason = "forward did not return an id for this message";
                                self.commit_failure(source, message, reason).await?;
                                pending_outcomes.push(MirrorOutcome::Failed(reason.to_string()));
                            }
                        }
                    }
                }
                Err(err) => {
                    for message in &pending {
                        self.commit_failure(source, message, &err.to_string()).await?;
                    }
                    warn!(%err, group_size = pending.len(), "failed to forward media group");
                    pending_outcomes.resize(pending.len(), MirrorOutcome::Failed(err.to_string()));
                }
            }

            let mut pending_outcomes = pending_outcomes.into_iter();
            for slot in outcomes.iter_mut() {
                if slot.is_none() {
                    *slot = pending_outcomes.next();
                }
            }
        }

        Ok(outcomes.into_iter().map(|o| o.expect("every slot decided")).collect())
    }

    pub async fn mirror_one(
        &self,
        source: &SourceChannel,
        message: &GatewayMessage,
    ) -> Result<MirrorOutcome, MirrorError> {
        match self.decide(source, message).await? {
            Decision::Done(outcome) => return Ok(outcome),
            Decision::Send => {}
        }

        let mirror_channel = channels::get_mirror_channel(&self.pool, source.id)
            .await?
            .ok_or_else(|| MirrorError::Config("no mirror channel for source".into()))?;
        let (to_id, to_hash) = match (mirror_channel.telegram_id, mirror_channel.access_hash) {
            (Some(id), Some(hash)) => (id, hash),
            _ => return Err(MirrorError::Config("mirror channel not yet created".into())),
        };

        let send_result = self
            .rate_limiter
            .execute_with_retry(|| {
                let gateway = Arc::clone(&self.gateway);
                let mode = source.mirror_mode;
                let message = message.clone();
                async move {
                    match mode {
                        MirrorMode::Forward => {
                            let source_id = source
                                .telegram_id
                                .ok_or_else(|| MirrorError::Config("source has no telegram id".into()))?;
                            let source_hash = source
                                .access_hash
                                .ok_or_else(|| MirrorError::Config("source has no access hash".into()))?;
                            let forwarded = gateway
                                .forward_messages(source_id, source_hash, to_id, to_hash, &[message.id])
                                .await?;
                            forwarded
                                .into_iter()
                                .next()
                                .flatten()
                                .ok_or_else(|| MirrorError::Gateway("forward did not return an id for this message".into()))
                        }
                        MirrorMode::Copy => gateway.copy_message(to_id, to_hash, &message).await,
                    }
                }
            })
            .await;

        match send_result {
            Ok(mirror_message_id) => {
                self.commit_success(source, message, mirror_channel.id, mirror_message_id).await?;
                info!(source_message_id = message.id, mirror_message_id, "mirrored message");
                Ok(MirrorOutcome::Success { mirror_message_id })
            }
            Err(err) => {
                self.commit_failure(source, message, &err.to_string()).await?;
                warn!(source_message_id = message.id, %err, "failed to mirror message");
                Ok(MirrorOutcome::Failed(err.to_string()))
            }
        }
    }

    /// Steps 1-3 of spec §4.5: duplicate guard, then skip decision. Returns
    /// `Decision::Send` when the caller must still perform step 4.
    async fn decide(&self, source: &SourceChannel, message: &GatewayMessage) -> Result<Decision, MirrorError> {
        if let Some(existing) = mappings::find(&self.pool, source.id, message.id as i64).await? {
            if existing.status == MappingStatus::Success && existing.mirror_message_id.is_some() {
                return Ok(Decision::Done(MirrorOutcome::NoopSuccess));
            }
        }

        if let Some(reason) = self.skip_reason(source, message).await? {
            self.commit_skip(source, message, reason).await?;
            return Ok(Decision::Done(MirrorOutcome::Skipped(reason)));
        }

        Ok(Decision::Send)
    }

    async fn commit_success(
        &self,
        source: &SourceChannel,
        message: &GatewayMessage,
        mirror_channel_id: i64,
        mirror_message_id: i32,
    ) -> Result<(), MirrorError> {
        let write = MappingWrite {
            mirror_channel_id: Some(mirror_channel_id),
            mirror_message_id: Some(mirror_message_id as i64),
            media_group_id: message.media_group_id,
            has_media: message.has_media,
            file_size: message.file_size,
            text: Some(message.text.clone()),
            sent_at: Some(message.date),
            mirrored_at: Some(Utc::now()),
            ..Default::default()
        };
        mappings::upsert(
            &self.pool,
            source.id,
            message.id as i64,
            message.message_type,
            MappingStatus::Success,
            &write,
        )
        .await?;
        Ok(())
    }

    async fn commit_skip(
        &self,
        source: &SourceChannel,
        message: &GatewayMessage,
        reason: SkipReason,
    ) -> Result<(), MirrorError> {
        let write = MappingWrite {
            skip_reason: Some(reason),
            has_media: message.has_media,
            file_size: message.file_size,
            text: Some(message.text.clone()),
            sent_at: Some(message.date),
            ..Default::default()
        };
        mappings::upsert(
            &self.pool,
            source.id,
            message.id as i64,
            message.message_type,
            MappingStatus::Skipped,
            &write,
        )
        .await?;
        events::append(
            &self.pool,
            Some(source.id),
            EventLevel::Info,
            &format!("message {} skipped: {:?}", message.id, reason),
            None,
        )
        .await
    }

    async fn commit_failure(&self, source: &SourceChannel, message: &GatewayMessage, error: &str) -> Result<(), MirrorError> {
        let write = MappingWrite {
            error_message: Some(error.to_string()),
            has_media: message.has_media,
            file_size: message.file_size,
            text: Some(message.text.clone()),
            sent_at: Some(message.date),
            ..Default::default()
        };
        mappings::upsert(
            &self.pool,
            source.id,
            message.id as i64,
            message.message_type,
            MappingStatus::Failed,
            &write,
        )
        .await?;
        Ok(())
    }

    /// First-match-wins skip decision (spec §4.5 step 3).
    async fn skip_reason(
        &self,
        source: &SourceChannel,
        message: &GatewayMessage,
    ) -> Result<Option<SkipReason>, MirrorError> {
        use crate::storage::models::MessageType;

        if source.is_protected.unwrap_or(false) && self.settings.skip_protected_content().await? {
            return Ok(Some(SkipReason::ProtectedContent));
        }

        if let Some(size) = message.file_size {
            if size > self.settings.max_file_size_bytes().await? {
                return Ok(Some(SkipReason::FileTooLarge));
            }
        }

        if message.is_service {
            return Ok(Some(SkipReason::UnsupportedType));
        }

        if message.message_type == MessageType::Video && !self.settings.mirror_videos().await? {
            return Ok(Some(SkipReason::UnsupportedType));
        }

        if self.filter.is_filtered(source, &message.text) {
            return Ok(Some(SkipReason::Filtered));
        }

        Ok(None)
    }
}
