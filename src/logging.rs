use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes structured logging. Mirrors the teacher's `setup_logging`
/// (`tracing-subscriber` + `EnvFilter`, default `info`), adding an optional
/// append-only file layer when `MIRROR_LOG_FILE` is set (spec §6.4).
pub fn setup_logging(log_file: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .compact(),
    );

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        registry
            .with(fmt::layer().with_writer(file).with_ansi(false).json())
            .init();
    } else {
        registry.init();
    }

    Ok(())
}
