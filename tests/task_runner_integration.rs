mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tg_mirror_daemon::filter::FilterEngine;
use tg_mirror_daemon::mirror::MessageMirror;
use tg_mirror_daemon::ratelimiter::RateLimiter;
use tg_mirror_daemon::settings::Settings;
use tg_mirror_daemon::storage::channels;
use tg_mirror_daemon::storage::models::{MirrorMode, SyncStatus, TaskType};
use tg_mirror_daemon::storage::tasks;
use tg_mirror_daemon::tasks::TaskRunner;

use support::test_pool;

/// Drives `resolve` straight through to `history_full` completion with an
/// empty fake history, exercising the runner's dispatch table end to end
/// (spec §4.6 steps 1-3) without a real Telegram account.
#[tokio::test]
async fn resolve_then_empty_history_completes_the_channel() {
    let Some(pool) = test_pool().await else { return };

    let (source_id,): (i64,) = sqlx::query_as(
        "INSERT INTO source_channels (channel_identifier, mirror_mode) VALUES ($1, $2) RETURNING id",
    )
    .bind("@unresolved_runner_test")
    .bind(MirrorMode::Forward)
    .fetch_one(&pool)
    .await
    .unwrap();

    tasks::enqueue(&pool, source_id, TaskType::Resolve).await.unwrap();

    let settings = Arc::new(Settings::new(pool.clone(), None));
    let rate_limiter = Arc::new(RateLimiter::new(settings.clone()));
    let filter = Arc::new(FilterEngine::new(String::new()));
    let gateway = Arc::new(support::FakeGateway::new());
    let mirror = Arc::new(MessageMirror::new(
        pool.clone(),
        settings.clone(),
        rate_limiter.clone(),
        gateway.clone(),
        filter,
    ));
    let wake = Arc::new(tokio::sync::Notify::new());
    let runner = TaskRunner::new(pool.clone(), settings, gateway, rate_limiter, mirror, wake);

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { runner.run(shutdown).await }
    });

    let mut completed = false;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let channel = channels::get_source_channel(&pool, source_id).await.unwrap();
        if channel.sync_status == SyncStatus::Completed {
            completed = true;
            break;
        }
    }

    shutdown.cancel();
    let _ = handle.await;

    assert!(completed, "channel should reach completed after resolve + empty history");

    let mirror_channel = channels::get_mirror_channel(&pool, source_id).await.unwrap();
    assert!(mirror_channel.is_some(), "resolve should have auto-created a mirror channel");
}
