// `pick_next` operates over the whole `sync_tasks` table with no per-test
// scoping (by design: spec §4.6 models one global single-worker queue), so
// this file's tests assume serial execution, e.g. `cargo test
// --test task_queue -- --test-threads=1`.
mod support;

use tg_mirror_daemon::storage::models::{MirrorMode, TaskStatus, TaskType};
use tg_mirror_daemon::storage::tasks;

use support::{insert_source_channel, test_pool};

#[tokio::test]
async fn enqueue_is_a_singleton_per_channel_and_type() {
    let Some(pool) = test_pool().await else { return };
    let source_id = insert_source_channel(&pool, "@queue_singleton", MirrorMode::Forward).await;

    let first = tasks::enqueue(&pool, source_id, TaskType::HistoryFull).await.unwrap();
    assert!(first.is_some());

    let second = tasks::enqueue(&pool, source_id, TaskType::HistoryFull).await.unwrap();
    assert!(second.is_none(), "a second in-flight history_full task must not be queued");
}

#[tokio::test]
async fn pick_next_orders_by_priority_then_age() {
    let Some(pool) = test_pool().await else { return };
    let low_priority = insert_source_channel(&pool, "@queue_low", MirrorMode::Forward).await;
    let high_priority = insert_source_channel(&pool, "@queue_high", MirrorMode::Forward).await;

    sqlx::query("UPDATE source_channels SET priority = 10 WHERE id = $1")
        .bind(high_priority)
        .execute(&pool)
        .await
        .unwrap();

    tasks::enqueue(&pool, low_priority, TaskType::HistoryFull).await.unwrap();
    tasks::enqueue(&pool, high_priority, TaskType::HistoryFull).await.unwrap();

    let picked = tasks::pick_next(&pool).await.unwrap().expect("a task should be ready");
    assert_eq!(picked.channel.id, high_priority, "higher-priority channel's task must be picked first");
    assert_eq!(picked.task.status, TaskStatus::Running, "pick_next must flip the task to running");
}

#[tokio::test]
async fn pause_then_resume_round_trips_through_paused() {
    let Some(pool) = test_pool().await else { return };
    let source_id = insert_source_channel(&pool, "@queue_pause", MirrorMode::Forward).await;
    let task = tasks::enqueue(&pool, source_id, TaskType::HistoryFull).await.unwrap().unwrap();

    tasks::mark_paused(&pool, task.id, "FLOOD_WAIT_7200").await.unwrap();
    assert_eq!(tasks::current_status(&pool, task.id).await.unwrap(), TaskStatus::Paused);

    tasks::resume(&pool, task.id).await.unwrap();
    assert_eq!(tasks::current_status(&pool, task.id).await.unwrap(), TaskStatus::Pending);
}

#[tokio::test]
async fn persist_progress_is_monotonic_and_visible_to_pick_next() {
    let Some(pool) = test_pool().await else { return };
    let source_id = insert_source_channel(&pool, "@queue_progress", MirrorMode::Forward).await;
    let task = tasks::enqueue(&pool, source_id, TaskType::HistoryFull).await.unwrap().unwrap();

    tasks::persist_progress(&pool, task.id, 5, 105, 1, 0).await.unwrap();

    let (last_processed_id,): (Option<i64>,) =
        sqlx::query_as("SELECT last_processed_id FROM sync_tasks WHERE id = $1")
            .bind(task.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(last_processed_id, Some(105));
}
