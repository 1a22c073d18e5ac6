use anyhow::{Context, Result};

/// Process envelope (spec §6.5): everything the daemon needs before it can
/// even open a database connection. Unlike [`crate::settings::Settings`]
/// (the DB-backed, hot-reloadable tunables of spec §6.2), this is read once
/// at startup and never changes for the life of the process.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub database_url: String,
    pub database_url_listen: Option<String>,
    pub encryption_secret: String,
    pub telegram_api_id: i32,
    pub telegram_api_hash: String,
    pub log_file: Option<String>,
    pub flood_wait_max_sec_override: Option<u64>,
}

impl ProcessConfig {
    /// Loads and validates the process envelope. Exit code 1 (missing
    /// required env) is the caller's responsibility in `main` — this just
    /// returns a descriptive error per offending variable, in the teacher's
    /// `Config::validate` style of one readable message per problem.
    pub fn from_env() -> Result<Self> {
        let database_url = require_env("DATABASE_URL")?;
        let database_url_listen = std::env::var("DATABASE_URL_LISTEN").ok();
        let encryption_secret = require_env("ENCRYPTION_SECRET")?;
        let telegram_api_id = require_env("TELEGRAM_API_ID")?
            .parse::<i32>()
            .context("TELEGRAM_API_ID must be a valid integer")?;
        let telegram_api_hash = require_env("TELEGRAM_API_HASH")?;
        let log_file = std::env::var("MIRROR_LOG_FILE").ok();
        let flood_wait_max_sec_override = std::env::var("MIRROR_FLOOD_WAIT_MAX_SEC")
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("MIRROR_FLOOD_WAIT_MAX_SEC must be a valid integer")?;

        let config = Self {
            database_url,
            database_url_listen,
            encryption_secret,
            telegram_api_id,
            telegram_api_hash,
            log_file,
            flood_wait_max_sec_override,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.encryption_secret.len() < 16 {
            anyhow::bail!(
                "ENCRYPTION_SECRET is too short ({} bytes); use at least 16 bytes of high-entropy secret",
                self.encryption_secret.len()
            );
        }
        if self.telegram_api_id <= 0 {
            anyhow::bail!("TELEGRAM_API_ID must be a positive integer");
        }
        if self.telegram_api_hash.is_empty() {
            anyhow::bail!("TELEGRAM_API_HASH must not be empty");
        }
        Ok(())
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required environment variable {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable tests must not run concurrently with each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "DATABASE_URL_LISTEN",
            "ENCRYPTION_SECRET",
            "TELEGRAM_API_ID",
            "TELEGRAM_API_HASH",
            "MIRROR_LOG_FILE",
            "MIRROR_FLOOD_WAIT_MAX_SEC",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn missing_database_url_fails() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("ENCRYPTION_SECRET", "0123456789abcdef");
        std::env::set_var("TELEGRAM_API_ID", "12345");
        std::env::set_var("TELEGRAM_API_HASH", "deadbeef");
        let err = ProcessConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn valid_env_loads() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/mirror");
        std::env::set_var("ENCRYPTION_SECRET", "0123456789abcdef");
        std::env::set_var("TELEGRAM_API_ID", "12345");
        std::env::set_var("TELEGRAM_API_HASH", "deadbeef");
        let cfg = ProcessConfig::from_env().unwrap();
        assert_eq!(cfg.telegram_api_id, 12345);
        assert_eq!(cfg.database_url_listen, None);
    }
}
