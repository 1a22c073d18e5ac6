mod support;

use std::sync::Arc;

use tg_mirror_daemon::filter::FilterEngine;
use tg_mirror_daemon::mirror::{MessageMirror, MirrorOutcome};
use tg_mirror_daemon::ratelimiter::RateLimiter;
use tg_mirror_daemon::settings::Settings;
use tg_mirror_daemon::storage::channels;
use tg_mirror_daemon::storage::models::{MirrorMode, SkipReason};

use support::{file_message, insert_mirror_channel, insert_source_channel, test_pool, text_message, FakeGateway};

async fn fixture(
    identifier: &str,
    mode: MirrorMode,
) -> Option<(sqlx::PgPool, MessageMirror, Arc<FakeGateway>, tg_mirror_daemon::storage::models::SourceChannel)> {
    let pool = test_pool().await?;
    let source_id = insert_source_channel(&pool, identifier, mode).await;
    insert_mirror_channel(&pool, source_id).await;

    let settings = Arc::new(Settings::new(pool.clone(), None));
    let rate_limiter = Arc::new(RateLimiter::new(settings.clone()));
    let filter = Arc::new(FilterEngine::new("spam".to_string()));
    let gateway = Arc::new(FakeGateway::new());
    let mirror = MessageMirror::new(pool.clone(), settings, rate_limiter, gateway.clone(), filter);

    let channel = channels::get_source_channel(&pool, source_id).await.unwrap();
    Some((pool, mirror, gateway, channel))
}

#[tokio::test]
async fn mirrors_a_single_text_message_by_copy() {
    let Some((_pool, mirror, _gateway, channel)) = fixture("@mirror_copy_one", MirrorMode::Copy).await else {
        return;
    };

    let message = text_message(1, "hello world");
    let outcome = mirror.mirror_one(&channel, &message).await.unwrap();
    assert!(matches!(outcome, MirrorOutcome::Success { .. }));
}

#[tokio::test]
async fn duplicate_send_is_a_noop() {
    let Some((_pool, mirror, _gateway, channel)) = fixture("@mirror_dup", MirrorMode::Copy).await else {
        return;
    };

    let message = text_message(1, "hello again");
    let first = mirror.mirror_one(&channel, &message).await.unwrap();
    assert!(matches!(first, MirrorOutcome::Success { .. }));

    let second = mirror.mirror_one(&channel, &message).await.unwrap();
    assert_eq!(second, MirrorOutcome::NoopSuccess);
}

#[tokio::test]
async fn oversized_file_is_skipped() {
    let Some((_pool, mirror, _gateway, channel)) = fixture("@mirror_oversize", MirrorMode::Copy).await else {
        return;
    };

    // Default max_file_size_mb is 100MB; this file is larger.
    let message = file_message(1, 200 * 1024 * 1024);
    let outcome = mirror.mirror_one(&channel, &message).await.unwrap();
    assert_eq!(outcome, MirrorOutcome::Skipped(SkipReason::FileTooLarge));
}

#[tokio::test]
async fn filtered_keyword_is_skipped() {
    let Some((_pool, mirror, _gateway, channel)) = fixture("@mirror_filtered", MirrorMode::Copy).await else {
        return;
    };

    let message = text_message(1, "buy cheap SPAM now");
    let outcome = mirror.mirror_one(&channel, &message).await.unwrap();
    assert_eq!(outcome, MirrorOutcome::Skipped(SkipReason::Filtered));
}

#[tokio::test]
async fn forward_mode_assigns_each_group_member_its_own_mirror_id() {
    let Some((_pool, mirror, gateway, channel)) = fixture("@mirror_group", MirrorMode::Forward).await else {
        return;
    };

    let group = vec![text_message(1, "part one"), text_message(2, "part two"), text_message(3, "part three")];
    let outcomes = mirror.mirror_group(&channel, &group).await.unwrap();

    assert_eq!(outcomes.len(), 3);
    let mut seen_ids = Vec::new();
    for outcome in outcomes {
        match outcome {
            MirrorOutcome::Success { mirror_message_id } => seen_ids.push(mirror_message_id),
            other => panic!("expected Success, got {other:?}"),
        }
    }
    seen_ids.sort_unstable();
    seen_ids.dedup();
    assert_eq!(seen_ids.len(), 3, "every group member must get a distinct mirror id");
    assert_eq!(
        gateway.forward_call_count(),
        1,
        "a 3-message album must be forwarded with a single batched call, not one per member"
    );
}
