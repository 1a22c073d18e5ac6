use std::future::Future;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::errors::MirrorError;
use crate::settings::Settings;

/// Single-account call pacing (spec §4.3). Generalizes the teacher's
/// `RetryHandler` + `CircuitBreaker` pair into the strict two-operation
/// contract the gateway actually needs: there is exactly one account, so
/// there is no per-chat bucket and no circuit-breaker state machine, only a
/// single shared "next allowed call" instant plus an account-wide
/// flood-wait gate.
struct Pacing {
    last_call_at: Option<Instant>,
    flood_wait_until: Option<Instant>,
}

pub struct RateLimiter {
    settings: Arc<Settings>,
    pacing: Mutex<Pacing>,
}

impl RateLimiter {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            pacing: Mutex::new(Pacing {
                last_call_at: None,
                flood_wait_until: None,
            }),
        }
    }

    /// Blocks until `now >= max(lastCallAt + baseInterval, floodWaitUntil)`
    /// (spec §4.3). Updates `lastCallAt` to the instant it releases the
    /// caller, so back-to-back callers are always spaced by at least
    /// `baseInterval`.
    pub async fn wait_for_slot(&self) -> Result<(), MirrorError> {
        let base_interval = Duration::from_millis(self.settings.mirror_interval_ms().await?);

        loop {
            let now = Instant::now();
            let earliest = {
                let guard = self.pacing.lock().await;
                let from_last_call = guard
                    .last_call_at
                    .map(|t| t + base_interval)
                    .unwrap_or(now);
                match guard.flood_wait_until {
                    Some(fw) if fw > from_last_call => fw,
                    _ => from_last_call,
                }
            };

            if earliest <= now {
                self.pacing.lock().await.last_call_at = Some(now);
                return Ok(());
            }

            tokio::time::sleep(earliest - now).await;
        }
    }

    /// Calls `waitForSlot` then `op`. On a FLOOD_WAIT-shaped failure, sets
    /// the account-wide `floodWaitUntil` and suspends-and-retries when the
    /// wait is within `floodWaitMaxSec`, otherwise propagates so the task
    /// runner pauses the task (spec §4.3, §7 category 4). Any other
    /// retryable failure backs off exponentially up to `maxRetryCount`.
    #[instrument(skip(self, op))]
    pub async fn execute_with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, MirrorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MirrorError>>,
    {
        let max_retry_count = self.settings.max_retry_count().await?;
        let flood_wait_max_sec = self.settings.flood_wait_max_sec().await?;

        let mut attempt = 0u32;
        loop {
            self.wait_for_slot().await?;

            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if let Some(seconds) = err.flood_wait_seconds() {
                        self.set_flood_wait(seconds).await;

                        if seconds <= flood_wait_max_sec {
                            warn!(seconds, "flood wait within ceiling, suspending and retrying");
                            tokio::time::sleep(Duration::from_secs(seconds + 1)).await;
                            continue;
                        }

                        warn!(seconds, flood_wait_max_sec, "flood wait exceeds ceiling, propagating");
                        return Err(err);
                    }

                    if !err.is_retryable() {
                        return Err(err);
                    }

                    attempt += 1;
                    if attempt >= max_retry_count {
                        return Err(MirrorError::RetryExhausted(err.to_string()));
                    }

                    let delay = Self::backoff_delay(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, %err, "retrying after backoff");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn set_flood_wait(&self, seconds: u64) {
        let mut guard = self.pacing.lock().await;
        guard.flood_wait_until = Some(Instant::now() + Duration::from_secs(seconds + 1));
    }

    /// `base * 2^k` with +/-10% jitter (spec §4.3, teacher's `add_jitter`).
    fn backoff_delay(attempt: u32) -> Duration {
        const BASE_MS: u64 = 500;
        let exponential = BASE_MS.saturating_mul(1u64 << attempt.min(16));
        let capped = exponential.min(Duration::from_secs(30).as_millis() as u64);

        let mut rng = rand::thread_rng();
        let jitter_factor: f64 = rng.gen_range(-0.1..0.1);
        let jittered = (capped as f64) * (1.0 + jitter_factor);
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_grows_and_caps() {
        let d0 = RateLimiter::backoff_delay(0);
        let d3 = RateLimiter::backoff_delay(3);
        let d20 = RateLimiter::backoff_delay(20);
        assert!(d0.as_millis() < d3.as_millis());
        assert!(d20.as_millis() <= Duration::from_secs(30).as_millis() + 1);
    }
}
