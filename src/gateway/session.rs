use sqlx::PgPool;

use crate::crypto::SessionCipher;
use crate::errors::MirrorError;

/// The single settings key the encrypted session blob lives under (spec
/// §4.4: "Session is persisted encrypted at a single settings key").
const SESSION_SETTINGS_KEY: &str = "telegram_session_encrypted";

/// Loads the session for `GrammersGateway::connect`. A decryption failure
/// is fatal and bubbles up as `SessionCorrupt`, which `supervisor.rs`
/// reports as "session corrupt; re-login required" and refuses to start
/// (spec §4.4).
pub async fn load_or_create_session(
    pool: &PgPool,
    cipher: &SessionCipher,
) -> Result<grammers_session::Session, MirrorError> {
    let row: Option<(serde_json::Value,)> =
        sqlx::query_as("SELECT value FROM settings WHERE key = $1")
            .bind(SESSION_SETTINGS_KEY)
            .fetch_optional(pool)
            .await?;

    let Some((value,)) = row else {
        return Ok(grammers_session::Session::new());
    };

    let encrypted = value
        .as_str()
        .ok_or(MirrorError::SessionCorrupt)?;
    let decrypted = cipher.decrypt(encrypted)?;
    let bytes = hex::decode(decrypted).map_err(|_| MirrorError::SessionCorrupt)?;

    grammers_session::Session::load(&bytes).map_err(|_| MirrorError::SessionCorrupt)
}

/// Persists the (possibly updated) session back to the same settings key,
/// encrypted at rest (spec §4.4, §4.10).
pub async fn persist_session(
    pool: &PgPool,
    cipher: &SessionCipher,
    session: &grammers_session::Session,
) -> Result<(), MirrorError> {
    let bytes = session.save();
    let hex_bytes = hex::encode(bytes);
    let encrypted = cipher.encrypt(&hex_bytes)?;
    let value = serde_json::Value::String(encrypted);

    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES ($1, $2, now())
        ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
        "#,
    )
    .bind(SESSION_SETTINGS_KEY)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}
