use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row models for the C1 schema (spec §3). Enums mirror the Postgres
/// `CREATE TYPE ... AS ENUM` definitions in `migrations/0001_init.sql`.

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "sync_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "mirror_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MirrorMode {
    Forward,
    Copy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "message_filter_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageFilterMode {
    Inherit,
    Disabled,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "task_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Resolve,
    HistoryFull,
    HistoryPartial,
    Realtime,
    RetryFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "message_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Animation,
    Sticker,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "mapping_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    Pending,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "skip_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ProtectedContent,
    FileTooLarge,
    UnsupportedType,
    RateLimitedSkip,
    FailedTooManyTimes,
    MessageDeleted,
    Filtered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "event_level", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SourceChannel {
    pub id: i64,
    pub channel_identifier: String,
    pub telegram_id: Option<i64>,
    pub access_hash: Option<i64>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub member_count: Option<i32>,
    pub total_messages: Option<i32>,
    pub is_protected: Option<bool>,
    pub is_active: bool,
    pub priority: i32,
    pub mirror_mode: MirrorMode,
    pub message_filter_mode: MessageFilterMode,
    pub message_filter_keywords: String,
    pub group_name: String,
    pub sync_status: SyncStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MirrorChannel {
    pub id: i64,
    pub source_channel_id: i64,
    pub telegram_id: Option<i64>,
    pub access_hash: Option<i64>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub invite_link: Option<String>,
    pub is_auto_created: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncTask {
    pub id: i64,
    pub source_channel_id: i64,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub progress_current: i64,
    pub progress_total: Option<i64>,
    pub last_processed_id: Option<i64>,
    pub failed_count: i64,
    pub skipped_count: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageMapping {
    pub id: i64,
    pub source_channel_id: i64,
    pub source_message_id: i64,
    pub mirror_channel_id: Option<i64>,
    pub mirror_message_id: Option<i64>,
    pub message_type: MessageType,
    pub media_group_id: Option<i64>,
    pub status: MappingStatus,
    pub skip_reason: Option<SkipReason>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub has_media: bool,
    pub file_size: Option<i64>,
    pub text: Option<String>,
    pub text_preview: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub mirrored_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub edit_count: i32,
    pub last_edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncEvent {
    pub id: i64,
    pub source_channel_id: Option<i64>,
    pub level: EventLevel,
    pub message: String,
    pub correlation_id: Option<uuid::Uuid>,
    pub created_at: DateTime<Utc>,
}

/// First 200 chars of `text`, for `MessageMapping::text_preview` (spec §3).
pub fn text_preview(text: &str) -> String {
    text.chars().take(200).collect()
}
