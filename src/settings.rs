use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::MirrorError;
use crate::storage::models::MirrorMode;

/// Process-wide snapshot of the `settings` table tunables (spec §4.2, §6.2).
/// Refreshed at most every `TTL` on read, invalidatable explicitly when the
/// UI mutates a row out of process. Generalizes the teacher's
/// process-constant `RetryConfig`/`CircuitBreakerConfig` structs into a
/// DB-backed, hot-reloadable equivalent, the way spec §9 "Dynamic config"
/// requires.
const TTL: Duration = Duration::from_secs(60);

pub struct Settings {
    pool: PgPool,
    snapshot: RwLock<(Instant, HashMap<String, Value>)>,
    /// Process-envelope fallback for `floodWaitMaxSec` (spec §6.5
    /// `MIRROR_FLOOD_WAIT_MAX_SEC`), used only while the DB has no row for
    /// the key yet — the DB value always wins once one exists.
    flood_wait_max_sec_override: Option<u64>,
}

impl Settings {
    pub fn new(pool: PgPool, flood_wait_max_sec_override: Option<u64>) -> Self {
        Self {
            pool,
            snapshot: RwLock::new((Instant::now() - TTL - Duration::from_secs(1), HashMap::new())),
            flood_wait_max_sec_override,
        }
    }

    /// Forces the next read to refetch, regardless of TTL.
    pub async fn invalidate(&self) {
        let mut guard = self.snapshot.write().await;
        guard.0 = Instant::now() - TTL - Duration::from_secs(1);
    }

    async fn refresh_if_stale(&self) -> Result<(), MirrorError> {
        {
            let guard = self.snapshot.read().await;
            if guard.0.elapsed() < TTL {
                return Ok(());
            }
        }

        let rows: Vec<(String, Value)> = sqlx::query_as("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;

        let mut guard = self.snapshot.write().await;
        guard.0 = Instant::now();
        guard.1 = rows.into_iter().collect();
        debug!(count = guard.1.len(), "settings cache refreshed");
        Ok(())
    }

    async fn raw(&self, key: &str) -> Result<Option<Value>, MirrorError> {
        self.refresh_if_stale().await?;
        let guard = self.snapshot.read().await;
        Ok(guard.1.get(key).cloned())
    }

    pub async fn mirror_interval_ms(&self) -> Result<u64, MirrorError> {
        Ok(self.u64_or("mirror_interval_ms", 1000).await?)
    }

    pub async fn max_retry_count(&self) -> Result<u32, MirrorError> {
        Ok(self.u64_or("max_retry_count", 3).await? as u32)
    }

    pub async fn flood_wait_max_sec(&self) -> Result<u64, MirrorError> {
        let default = self.flood_wait_max_sec_override.unwrap_or(3600);
        self.u64_or("floodWaitMaxSec", default).await
    }

    pub async fn retry_interval_sec(&self) -> Result<u64, MirrorError> {
        // Reserved: read but not consulted — see DESIGN.md Open Question 3.
        self.u64_or("retry_interval_sec", 60).await
    }

    pub async fn skip_after_max_retry(&self) -> Result<bool, MirrorError> {
        self.bool_or("skip_after_max_retry", true).await
    }

    pub async fn sync_message_edits(&self) -> Result<bool, MirrorError> {
        self.bool_or("sync_message_edits", false).await
    }

    pub async fn keep_edit_history(&self) -> Result<bool, MirrorError> {
        self.bool_or("keep_edit_history", true).await
    }

    pub async fn sync_message_deletions(&self) -> Result<bool, MirrorError> {
        self.bool_or("sync_message_deletions", false).await
    }

    pub async fn mirror_videos(&self) -> Result<bool, MirrorError> {
        self.bool_or("mirror_videos", true).await
    }

    pub async fn max_file_size_bytes(&self) -> Result<i64, MirrorError> {
        Ok(self.u64_or("max_file_size_mb", 100).await? as i64 * 1024 * 1024)
    }

    pub async fn skip_protected_content(&self) -> Result<bool, MirrorError> {
        self.bool_or("skip_protected_content", true).await
    }

    pub async fn group_media_messages(&self) -> Result<bool, MirrorError> {
        self.bool_or("group_media_messages", true).await
    }

    pub async fn auto_channel_prefix(&self) -> Result<String, MirrorError> {
        self.string_or("auto_channel_prefix", "[备份] ").await
    }

    /// The global keyword list `inherit` mode falls back to (spec §4.9).
    pub async fn global_filter_keywords(&self) -> Result<String, MirrorError> {
        self.string_or("global_filter_keywords", "").await
    }

    pub async fn default_mirror_mode(&self) -> Result<MirrorMode, MirrorError> {
        let value = self.string_or("default_mirror_mode", "forward").await?;
        Ok(match value.as_str() {
            "copy" => MirrorMode::Copy,
            _ => MirrorMode::Forward,
        })
    }

    /// Reserved (spec §9 Open Question 2): always 1 regardless of the
    /// configured value. Exposed so the UI can still display it.
    pub async fn concurrent_mirrors_configured(&self) -> Result<u32, MirrorError> {
        Ok(self.u64_or("concurrent_mirrors", 1).await? as u32)
    }

    async fn u64_or(&self, key: &str, default: u64) -> Result<u64, MirrorError> {
        Ok(self
            .raw(key)
            .await?
            .and_then(|v| v.as_u64())
            .unwrap_or(default))
    }

    async fn bool_or(&self, key: &str, default: bool) -> Result<bool, MirrorError> {
        Ok(self
            .raw(key)
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(default))
    }

    async fn string_or(&self, key: &str, default: &str) -> Result<String, MirrorError> {
        Ok(self
            .raw(key)
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| default.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Unknown keys are simply absent from the in-memory map and fall back
    // to documented defaults (spec §4.2) — this is exercised end-to-end in
    // tests/settings_defaults.rs against a live database; here we only
    // check the pure default-selection arithmetic that doesn't need one.
    #[test]
    fn max_file_size_conversion() {
        let mb = 100u64;
        assert_eq!(mb as i64 * 1024 * 1024, 104_857_600);
    }
}
