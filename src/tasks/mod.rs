mod history;
mod resolve;
mod retry;

use std::sync::Arc;

use sqlx::PgPool;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::errors::MirrorError;
use crate::gateway::TelegramGateway;
use crate::mirror::MessageMirror;
use crate::ratelimiter::RateLimiter;
use crate::settings::Settings;
use crate::storage::events;
use crate::storage::models::{EventLevel, TaskType};
use crate::storage::tasks::{self, PickedTask};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Single-worker cooperative scheduler (spec §4.6). Generalizes the
/// teacher's `tokio::time::interval` health-check loop in `main.rs` into a
/// poll-and-dispatch worker, also wakened early by the change bus (C8).
pub struct TaskRunner {
    pool: PgPool,
    settings: Arc<Settings>,
    gateway: Arc<dyn TelegramGateway>,
    rate_limiter: Arc<RateLimiter>,
    mirror: Arc<MessageMirror>,
    wake: Arc<tokio::sync::Notify>,
}

impl TaskRunner {
    pub fn new(
        pool: PgPool,
        settings: Arc<Settings>,
        gateway: Arc<dyn TelegramGateway>,
        rate_limiter: Arc<RateLimiter>,
        mirror: Arc<MessageMirror>,
        wake: Arc<tokio::sync::Notify>,
    ) -> Self {
        Self {
            pool,
            settings,
            gateway,
            rate_limiter,
            mirror,
            wake,
        }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("task runner shutting down");
                    return;
                }
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
            }

            if let Err(err) = self.drain_ready_tasks(&shutdown).await {
                error!(%err, "task runner iteration failed");
            }
        }
    }

    async fn drain_ready_tasks(&self, shutdown: &CancellationToken) -> Result<(), MirrorError> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            let Some(picked) = tasks::pick_next(&self.pool).await? else {
                return Ok(());
            };

            self.dispatch(picked, shutdown).await?;
        }
    }

    #[instrument(skip(self, picked, shutdown), fields(task_id = picked.task.id, task_type = ?picked.task.task_type))]
    async fn dispatch(
        &self,
        picked: PickedTask,
        shutdown: &CancellationToken,
    ) -> Result<(), MirrorError> {
        let PickedTask { task, channel } = picked;

        let outcome = match task.task_type {
            TaskType::Resolve => {
                resolve::run(
                    &self.pool,
                    self.gateway.as_ref(),
                    &self.rate_limiter,
                    &self.settings,
                    &channel,
                )
                .await
            }
            TaskType::HistoryFull | TaskType::HistoryPartial => {
                history::run(
                    &self.pool,
                    self.gateway.as_ref(),
                    &self.rate_limiter,
                    &self.mirror,
                    &task,
                    &channel,
                    shutdown,
                )
                .await
            }
            TaskType::RetryFailed => {
                retry::run(
                    &self.pool,
                    self.gateway.as_ref(),
                    &self.settings,
                    &self.mirror,
                    &channel,
                )
                .await
            }
            TaskType::Realtime => {
                // State carrier only; C7 owns execution (spec §4.6 step 3).
                return Ok(());
            }
        };

        match outcome {
            Ok(()) => {
                tasks::mark_completed(&self.pool, task.id).await?;
                events::append(
                    &self.pool,
                    Some(channel.id),
                    EventLevel::Info,
                    &format!("{:?} completed", task.task_type),
                    None,
                )
                .await?;
            }
            Err(err) if err.flood_wait_seconds().is_some() => {
                let seconds = err.flood_wait_seconds().unwrap();
                tasks::mark_paused(&self.pool, task.id, &format!("FLOOD_WAIT_{seconds}")).await?;
                events::append(
                    &self.pool,
                    Some(channel.id),
                    EventLevel::Warn,
                    &format!("{:?} paused: flood wait of {}s exceeds the configured ceiling", task.task_type, seconds),
                    None,
                )
                .await?;
            }
            Err(err) if err.is_fatal() => {
                tasks::mark_failed(&self.pool, task.id, &err.to_string()).await?;
                crate::storage::channels::set_sync_status(
                    &self.pool,
                    channel.id,
                    crate::storage::models::SyncStatus::Error,
                )
                .await?;
                events::append(
                    &self.pool,
                    Some(channel.id),
                    EventLevel::Error,
                    &format!("{:?} failed: {}", task.task_type, err),
                    None,
                )
                .await?;
            }
            Err(err) => {
                warn!(%err, "task handler returned a non-fatal error, marking failed");
                tasks::mark_failed(&self.pool, task.id, &err.to_string()).await?;
            }
        }

        Ok(())
    }
}
