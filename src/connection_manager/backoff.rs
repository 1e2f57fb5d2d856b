//! Exponential backoff for stream reconnection

use std::time::Duration;

use rand::Rng;

use super::types::ConnectionConfig;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first reconnect, in milliseconds
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_factor: 0.0,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            base_delay_ms: config.reconnect_delay_ms,
            max_delay_ms: config.max_reconnect_delay_ms,
            jitter_factor: config.reconnect_jitter,
        }
    }

    /// Delay before reconnect number `attempt` (1-based):
    /// `min(base * 2^(attempt - 1), max)`, then jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let base_delay = self.base_delay_ms as f64 * 2f64.powi(exponent);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        // Apply jitter only if jitter_factor > 0
        let final_delay = if self.jitter_factor > 0.0 && capped_delay > 0.0 {
            let jitter_range = capped_delay * self.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
            (capped_delay + jitter).clamp(1.0, self.max_delay_ms.max(1) as f64) as u64
        } else {
            capped_delay.max(1.0) as u64
        };

        Duration::from_millis(final_delay)
    }
}
