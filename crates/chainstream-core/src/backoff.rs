//! Exponential reconnect backoff with an injectable sleeper.
//!
//! There is no retry ceiling: the driver keeps reconnecting on retryable
//! errors for as long as it runs. The delay resets once a connection
//! delivers its first envelope.

use async_trait::async_trait;
use std::time::Duration;

/// Configuration for the reconnect backoff.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnect.
    pub initial: Duration,
    /// Upper bound on any delay, jitter included.
    pub max: Duration,
    /// Multiplier applied on each consecutive failure.
    pub multiplier: f64,
    /// Adds `jitter_fraction * delay / 2` on top of each delay (0.0 = none).
    pub jitter_fraction: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

/// Stateful backoff: counts consecutive failures since the last reset.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Consecutive failures recorded since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let exp = (self.attempt - 1).min(i32::MAX as u32) as i32;
        let base_ms = self.config.initial.as_millis() as f64 * self.config.multiplier.powi(exp);
        let cap_ms = self.config.max.as_millis() as f64;

        // Deterministic jitter so tests can assert exact delays.
        let jitter_ms = base_ms * self.config.jitter_fraction * 0.5;
        Duration::from_millis((base_ms + jitter_ms).min(cap_ms) as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Waits out a backoff delay. Tests substitute a recorder that returns
/// immediately.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Real-time sleeper backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}
