//! Exponential backoff with jitter
//!
//! Used for shard reconnects and for REST retries on 5xx/transport errors.
//! The un-jittered delay is `min(cap, base * 2^attempt)`; the returned delay
//! keeps half of it and randomizes the other half, so it always lies in
//! `[delay / 2, delay]`.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff calculator
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Un-jittered delay for the current attempt
    pub fn ceiling(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Compute the next delay and advance the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);

        let half = ceiling / 2;
        let spread = (ceiling - half).as_millis() as u64;
        if spread == 0 {
            return ceiling;
        }
        half + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }

    /// Number of delays handed out since the last reset
    #[inline]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reset after a successful connection or request
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
