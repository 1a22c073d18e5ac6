use std::sync::Arc;

use sqlx::postgres::PgListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::MirrorError;

const CHANNEL: &str = "tg_back_sync_tasks_v1";

/// C8's low-latency half. `sync_tasks` already carries an `AFTER INSERT OR
/// UPDATE` trigger that issues `pg_notify(tg_back_sync_tasks_v1, ...)`
/// (migrations/0001_init.sql); this just relays that NOTIFY onto the task
/// runner's `Notify` so a freshly enqueued task doesn't have to wait out
/// the 5s poll tick (`tasks::TaskRunner::run`). That poll tick is the real
/// correctness guarantee — if `DATABASE_URL_LISTEN` can't carry
/// notifications (a pooled connection behind a transaction pooler, for
/// instance), this task simply never starts and the runner falls back to
/// polling alone (spec §4.8).
pub async fn run(database_url_listen: Option<String>, wake: Arc<tokio::sync::Notify>, shutdown: CancellationToken) {
    let Some(url) = database_url_listen else {
        info!("DATABASE_URL_LISTEN not set, relying on interval polling only");
        return;
    };

    loop {
        if shutdown.is_cancelled() {
            return;
        }

        match listen_once(&url, &wake, &shutdown).await {
            Ok(()) => return,
            Err(err) => {
                warn!(%err, "change bus listener dropped, retrying in 5s");
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(tokio::time::Duration::from_secs(5)) => {}
                }
            }
        }
    }
}

async fn listen_once(
    url: &str,
    wake: &Arc<tokio::sync::Notify>,
    shutdown: &CancellationToken,
) -> Result<(), MirrorError> {
    let mut listener = PgListener::connect(url).await?;
    listener.listen(CHANNEL).await?;
    info!(channel = CHANNEL, "change bus listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            notification = listener.recv() => {
                let _ = notification?;
                wake.notify_one();
            }
        }
    }
}
