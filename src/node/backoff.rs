use std::time::Duration;

use rand::Rng;

use crate::configs::ReconnectConfig;

/// Exponential reconnect delay, capped at `max_delay_ms`, with up to 10% jitter.
pub(super) struct Backoff {
    attempt: u32,
    base_ms: u64,
    max_ms: u64,
}

impl Backoff {
    pub(super) fn new(config: &ReconnectConfig) -> Self {
        Self {
            attempt: 0,
            base_ms: config.base_delay_ms.max(1),
            max_ms: config.max_delay_ms.max(config.base_delay_ms),
        }
    }

    pub(super) fn next(&mut self) -> Duration {
        let exp = self.attempt.min(16);
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.base_ms.saturating_mul(1u64 << exp).min(self.max_ms);
        let jitter = rand::thread_rng().gen_range(0..=delay / 10);
        Duration::from_millis((delay + jitter).min(self.max_ms))
    }

    pub(super) fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(super) fn reset(&mut self) {
        self.attempt = 0;
    }
}
