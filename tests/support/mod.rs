use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use tg_mirror_daemon::gateway::{CreatedChannel, GatewayMessage, ResolvedChannel, TelegramGateway};
use tg_mirror_daemon::MirrorError;
use tg_mirror_daemon::storage::models::MessageType;

/// An in-memory double for [`TelegramGateway`], standing in for a real
/// Telegram connection in tests (the trait exists at this seam precisely
/// so the core never needs a live account to be exercised end to end).
pub struct FakeGateway {
    next_outgoing_id: AtomicI32,
    by_id: Mutex<HashMap<i32, GatewayMessage>>,
    forward_calls: AtomicI32,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            next_outgoing_id: AtomicI32::new(9000),
            by_id: Mutex::new(HashMap::new()),
            forward_calls: AtomicI32::new(0),
        }
    }

    /// Number of `forward_messages` invocations seen so far, to assert a
    /// media group was sent with one batched call rather than one per member.
    pub fn forward_call_count(&self) -> i32 {
        self.forward_calls.load(Ordering::SeqCst)
    }

    pub fn with_history(messages: Vec<GatewayMessage>) -> Self {
        let gateway = Self::new();
        let mut guard = gateway.by_id.lock().unwrap();
        for message in messages {
            guard.insert(message.id, message);
        }
        drop(guard);
        gateway
    }

    fn next_id(&self) -> i32 {
        self.next_outgoing_id.fetch_add(1, Ordering::SeqCst)
    }
}

pub fn text_message(id: i32, text: &str) -> GatewayMessage {
    GatewayMessage {
        id,
        text: text.to_string(),
        media_group_id: None,
        message_type: MessageType::Text,
        has_media: false,
        file_size: None,
        is_service: false,
        has_spoiler: false,
        date: Utc::now(),
        raw: None,
    }
}

pub fn file_message(id: i32, file_size: i64) -> GatewayMessage {
    GatewayMessage {
        file_size: Some(file_size),
        has_media: true,
        message_type: MessageType::Document,
        ..text_message(id, "")
    }
}

#[async_trait]
impl TelegramGateway for FakeGateway {
    async fn resolve_channel(&self, identifier: &str) -> Result<ResolvedChannel, MirrorError> {
        Ok(ResolvedChannel {
            telegram_id: 111_000,
            access_hash: 222_000,
            title: identifier.trim_start_matches('@').to_string(),
            username: Some(identifier.trim_start_matches('@').to_string()),
            member_count: Some(42),
            about: None,
            noforwards: false,
        })
    }

    async fn iterate_history(
        &self,
        _telegram_id: i64,
        _access_hash: i64,
        from_message_id: i32,
    ) -> Result<Vec<GatewayMessage>, MirrorError> {
        let guard = self.by_id.lock().unwrap();
        let mut out: Vec<GatewayMessage> = guard
            .values()
            .filter(|m| m.id > from_message_id)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.id);
        Ok(out)
    }

    async fn forward_messages(
        &self,
        _from_telegram_id: i64,
        _from_access_hash: i64,
        _to_telegram_id: i64,
        _to_access_hash: i64,
        ids: &[i32],
    ) -> Result<Vec<Option<i32>>, MirrorError> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ids.iter().map(|_| Some(self.next_id())).collect())
    }

    async fn copy_message(
        &self,
        _to_telegram_id: i64,
        _to_access_hash: i64,
        _source: &GatewayMessage,
    ) -> Result<i32, MirrorError> {
        Ok(self.next_id())
    }

    async fn get_message(
        &self,
        _telegram_id: i64,
        _access_hash: i64,
        message_id: i32,
    ) -> Result<Option<GatewayMessage>, MirrorError> {
        Ok(self.by_id.lock().unwrap().get(&message_id).cloned())
    }

    async fn create_private_channel(
        &self,
        title: &str,
        _about: &str,
    ) -> Result<CreatedChannel, MirrorError> {
        Ok(CreatedChannel {
            telegram_id: 333_000,
            access_hash: 444_000,
            invite_link: Some(format!("https://t.me/+fake-{title}")),
        })
    }

    async fn export_invite_link(
        &self,
        _telegram_id: i64,
        _access_hash: i64,
    ) -> Result<String, MirrorError> {
        Ok("https://t.me/+fake".to_string())
    }
}

/// Connects to a scratch Postgres database and applies the schema, or
/// returns `None` (and prints why) when no test database is configured.
/// Gated this way rather than `#[sqlx::test]` so the suite degrades to a
/// skip instead of a hard failure in an environment with no Postgres.
pub async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")).ok()?;
    let pool = match sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
    {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("skipping: could not connect to test database ({err})");
            return None;
        }
    };

    if let Err(err) = sqlx::migrate!("./migrations").run(&pool).await {
        eprintln!("skipping: could not apply migrations ({err})");
        return None;
    }

    Some(pool)
}

/// Inserts a minimal active, resolved source channel and returns its id.
pub async fn insert_source_channel(
    pool: &PgPool,
    identifier: &str,
    mirror_mode: tg_mirror_daemon::storage::models::MirrorMode,
) -> i64 {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO source_channels (channel_identifier, telegram_id, access_hash, name, is_active, mirror_mode)
        VALUES ($1, $2, $3, $4, TRUE, $5)
        RETURNING id
        "#,
    )
    .bind(identifier)
    .bind(rand::random::<i64>().abs())
    .bind(rand::random::<i64>().abs())
    .bind(identifier)
    .bind(mirror_mode)
    .fetch_one(pool)
    .await
    .expect("insert source channel");
    id
}

pub async fn insert_mirror_channel(pool: &PgPool, source_channel_id: i64) -> i64 {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO mirror_channels (source_channel_id, telegram_id, access_hash, is_auto_created)
        VALUES ($1, $2, $3, TRUE)
        RETURNING id
        "#,
    )
    .bind(source_channel_id)
    .bind(rand::random::<i64>().abs())
    .bind(rand::random::<i64>().abs())
    .fetch_one(pool)
    .await
    .expect("insert mirror channel");
    id
}
