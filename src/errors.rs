use thiserror::Error;

/// Core error taxonomy (spec §7), from most local to most global.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("telegram gateway error: {0}")]
    Gateway(String),

    #[error("flood wait required: {seconds}s")]
    FloodWait { seconds: u64 },

    #[error("peer could not be resolved: {0}")]
    PeerUnresolvable(String),

    #[error("session corrupt; re-login required")]
    SessionCorrupt,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("account-global error, human intervention required: {0}")]
    Fatal(String),

    #[error("retry attempts exhausted: {0}")]
    RetryExhausted(String),
}

impl MirrorError {
    /// Per-message / account-global classification (spec §6.3, §7).
    ///
    /// `FLOOD_WAIT`s are retryable-with-wait (handled by the caller
    /// inspecting [`MirrorError::flood_wait_seconds`] first); the three
    /// named fatal gateway errors and a corrupt session are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            MirrorError::FloodWait { .. } => true,
            MirrorError::Gateway(msg) => !is_fatal_gateway_text(msg),
            MirrorError::Database(_) => true,
            MirrorError::SessionCorrupt | MirrorError::Fatal(_) => false,
            MirrorError::PeerUnresolvable(_) => false,
            MirrorError::Config(_) | MirrorError::Serialization(_) => false,
            MirrorError::Migration(_) => false,
            MirrorError::RetryExhausted(_) => false,
        }
    }

    /// Extracts a server-suggested wait duration, if the gateway reported one.
    ///
    /// Matches `FLOOD_WAIT_<N>` and the alternate textual form Telegram
    /// sometimes sends ("A wait of N seconds is required") per spec §4.3.
    pub fn flood_wait_seconds(&self) -> Option<u64> {
        match self {
            MirrorError::FloodWait { seconds } => Some(*seconds),
            MirrorError::Gateway(msg) => parse_flood_wait_seconds(msg),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        match self {
            MirrorError::SessionCorrupt | MirrorError::Fatal(_) => true,
            MirrorError::Gateway(msg) => is_fatal_gateway_text(msg),
            _ => false,
        }
    }
}

/// `AUTH_KEY_UNREGISTERED`, `SESSION_REVOKED`, `USER_DEACTIVATED` (spec §6.3)
/// classify as fatal: task fails, channel flagged error, human intervention.
fn is_fatal_gateway_text(msg: &str) -> bool {
    const FATAL: [&str; 3] = [
        "AUTH_KEY_UNREGISTERED",
        "SESSION_REVOKED",
        "USER_DEACTIVATED",
    ];
    FATAL.iter().any(|tag| msg.contains(tag))
}

pub fn parse_flood_wait_seconds(msg: &str) -> Option<u64> {
    if let Some(rest) = msg.strip_prefix("FLOOD_WAIT_") {
        return rest
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .ok();
    }
    // "A wait of N seconds is required"
    let lower = msg.to_ascii_lowercase();
    if let Some(idx) = lower.find("a wait of ") {
        let rest = &msg[idx + "a wait of ".len()..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        return digits.parse().ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flood_wait_tag() {
        assert_eq!(parse_flood_wait_seconds("FLOOD_WAIT_30"), Some(30));
    }

    #[test]
    fn parses_flood_wait_sentence() {
        assert_eq!(
            parse_flood_wait_seconds("A wait of 7200 seconds is required"),
            Some(7200)
        );
    }

    #[test]
    fn non_flood_wait_text_has_no_duration() {
        assert_eq!(parse_flood_wait_seconds("CHANNEL_INVALID"), None);
    }

    #[test]
    fn fatal_gateway_errors_are_not_retryable() {
        let err = MirrorError::Gateway("SESSION_REVOKED".to_string());
        assert!(!err.is_retryable());
        assert!(err.is_fatal());
    }

    #[test]
    fn message_local_gateway_errors_are_retryable() {
        let err = MirrorError::Gateway("MSG_ID_INVALID".to_string());
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }
}
