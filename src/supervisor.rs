use std::process::ExitCode;
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ProcessConfig;
use crate::crypto::SessionCipher;
use crate::errors::MirrorError;
use crate::filter::FilterEngine;
use crate::gateway::{self, GrammersGateway};
use crate::mirror::MessageMirror;
use crate::ratelimiter::RateLimiter;
use crate::realtime::RealtimeManager;
use crate::settings::Settings;
use crate::storage;
use crate::tasks::TaskRunner;

/// C11: the whole process lifecycle (spec §4.11). `main.rs` only calls
/// [`run`]; everything boot-order-sensitive — storage, session, gateway,
/// workers, signal handling, graceful shutdown — lives here, generalizing
/// the teacher's `main.rs` wiring.
///
/// Exit codes (spec §6.5): 0 clean shutdown, 1 configuration error, 2
/// session decrypt failure, 3 migration mismatch. `ProcessConfig::from_env`
/// already covers code 1 from `main.rs`; everything from here on returns 2
/// or 3 on failure, 0 otherwise.
pub async fn run(config: ProcessConfig) -> ExitCode {
    let pool = match storage::connect(&config.database_url, 10).await {
        Ok(pool) => pool,
        Err(MirrorError::Migration(err)) => {
            error!(%err, "database migration failed");
            return ExitCode::from(3);
        }
        Err(err) => {
            error!(%err, "failed to connect to database");
            return ExitCode::from(3);
        }
    };

    let cipher = SessionCipher::from_secret(&config.encryption_secret);
    let session = match gateway::load_or_create_session(&pool, &cipher).await {
        Ok(session) => session,
        Err(err) => {
            error!(%err, "failed to load telegram session, refusing to start");
            return ExitCode::from(2);
        }
    };

    let gateway = match GrammersGateway::connect(
        config.telegram_api_id,
        &config.telegram_api_hash,
        session,
    )
    .await
    {
        Ok(gateway) => Arc::new(gateway),
        Err(err) => {
            error!(%err, "failed to connect to telegram");
            return ExitCode::from(2);
        }
    };

    if let Err(err) = gateway::persist_session(&pool, &cipher, &gateway.session()).await {
        warn!(%err, "failed to persist freshly-authorized session");
    }

    let settings = Arc::new(Settings::new(pool.clone(), config.flood_wait_max_sec_override));
    let rate_limiter = Arc::new(RateLimiter::new(settings.clone()));
    let global_filter_keywords = match settings.global_filter_keywords().await {
        Ok(keywords) => keywords,
        Err(err) => {
            warn!(%err, "failed to load global filter keywords, starting with an empty list");
            String::new()
        }
    };
    let filter = Arc::new(FilterEngine::new(global_filter_keywords));
    let mirror = Arc::new(MessageMirror::new(
        pool.clone(),
        settings.clone(),
        rate_limiter.clone(),
        gateway.clone(),
        filter,
    ));

    let shutdown = CancellationToken::new();
    let wake = Arc::new(tokio::sync::Notify::new());

    let task_runner = TaskRunner::new(
        pool.clone(),
        settings.clone(),
        gateway.clone(),
        rate_limiter.clone(),
        mirror.clone(),
        wake.clone(),
    );
    let realtime = RealtimeManager::new(
        pool.clone(),
        settings.clone(),
        gateway.clone(),
        rate_limiter.clone(),
        mirror.clone(),
    );

    let task_runner_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { task_runner.run(shutdown).await }
    });
    let realtime_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { realtime.run(shutdown).await }
    });
    let changebus_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        let listen_url = config.database_url_listen.clone();
        async move { crate::changebus::run(listen_url, wake, shutdown).await }
    });

    info!("daemon is running");

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping workers");
    shutdown.cancel();

    let shutdown_budget = tokio::time::Duration::from_secs(30);
    let joined = tokio::time::timeout(
        shutdown_budget,
        futures::future::join3(task_runner_handle, realtime_handle, changebus_handle),
    )
    .await;

    match joined {
        Ok((task_result, realtime_result, changebus_result)) => {
            if let Err(err) = task_result {
                error!(%err, "task runner panicked");
            }
            if let Err(err) = realtime_result {
                error!(%err, "realtime manager panicked");
            }
            if let Err(err) = changebus_result {
                error!(%err, "change bus listener panicked");
            }
        }
        Err(_) => {
            warn!("shutdown budget exceeded, exiting without waiting further");
        }
    }

    info!("daemon stopped");
    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(err) => {
            warn!(%err, "failed to install SIGTERM handler, only ctrl-c will trigger shutdown");
            let _ = signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
