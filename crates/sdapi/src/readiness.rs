//! Waiting for a server that may still be starting up.
//!
//! A1111 and SD.Next take a while to load their first model. Hosts call
//! [`wait_until_ready`] before submitting anything; it probes the progress
//! endpoint with increasing delays until the server answers or the
//! caller's [`CancellationToken`] fires.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::SdApi;

/// How often, and for how long, to probe a starting server.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Delay before the second probe.
    pub initial_delay: Duration,
    /// Upper bound on the delay between probes.
    pub max_delay: Duration,
    /// Growth of the delay after each failed probe.
    pub multiplier: f64,
    /// Give up after this many probes. `None` retries until cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

/// Delay before the probe after `current`, capped at
/// [`ReadinessConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReadinessConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Probe the server until it answers.
///
/// Returns `true` once a probe succeeds, `false` if `cancel` fires or the
/// attempt limit is reached first.
pub async fn wait_until_ready(api: &SdApi, config: &ReadinessConfig, cancel: &CancellationToken) -> bool {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        tracing::debug!(base_url = api.base_url(), attempt, "Probing server");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(base_url = api.base_url(), "Readiness wait cancelled");
                return false;
            }
            result = api.progress() => {
                match result {
                    Ok(_) => {
                        tracing::info!(base_url = api.base_url(), attempt, "Server is ready");
                        return true;
                    }
                    Err(e) => {
                        tracing::warn!(
                            base_url = api.base_url(),
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "Server not ready (attempt {attempt})",
                        );
                    }
                }
            }
        }

        if config.max_attempts.is_some_and(|max| attempt >= max) {
            tracing::error!(base_url = api.base_url(), attempt, "Server never became ready");
            return false;
        }

        // Wait before the next probe, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_delay_doubles() {
        let config = ReadinessConfig::default();
        assert_eq!(next_delay(Duration::from_secs(1), &config), Duration::from_secs(2));
    }

    #[test]
    fn probe_delay_is_capped() {
        let config = ReadinessConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(next_delay(Duration::from_secs(8), &config), Duration::from_secs(10));
    }

    #[test]
    fn default_probe_schedule() {
        let config = ReadinessConfig::default();
        let mut delay = config.initial_delay;
        for expected_secs in [1, 2, 4, 8, 16, 30, 30] {
            assert_eq!(delay.as_secs(), expected_secs);
            delay = next_delay(delay, &config);
        }
    }

    #[tokio::test]
    async fn cancelled_token_stops_waiting() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let api = SdApi::new("http://127.0.0.1:9");
        assert!(!wait_until_ready(&api, &ReadinessConfig::default(), &cancel).await);
    }

    #[tokio::test]
    async fn attempt_limit_gives_up() {
        let config = ReadinessConfig {
            initial_delay: Duration::from_millis(1),
            max_attempts: Some(2),
            ..Default::default()
        };
        let api = SdApi::new("http://127.0.0.1:9");
        assert!(!wait_until_ready(&api, &config, &CancellationToken::new()).await);
    }
}
