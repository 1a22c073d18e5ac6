use std::process::ExitCode;

use tracing::info;

use tg_mirror_daemon::config::ProcessConfig;
use tg_mirror_daemon::supervisor;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = dotenvy::dotenv() {
        if !matches!(err, dotenvy::Error::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("warning: failed to load .env file: {err}");
        }
    }

    let config = match ProcessConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            return ExitCode::from(1);
        }
    };

    if let Err(err) = tg_mirror_daemon::logging::setup_logging(config.log_file.as_deref()) {
        eprintln!("failed to initialize logging: {err:#}");
        return ExitCode::from(1);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting tg-mirror-daemon"
    );

    supervisor::run(config).await
}
