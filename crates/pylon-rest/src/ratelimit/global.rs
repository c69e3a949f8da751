//! Process-wide request limiter
//!
//! Two gates sit in front of every bucket: a steady requests-per-second
//! quota, and a hard block installed when the remote answers with a
//! global 429.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::Mutex;
use tokio::time::Instant;

pub struct GlobalLimiter {
    limiter: DefaultDirectRateLimiter,
    blocked_until: Mutex<Option<Instant>>,
}

impl GlobalLimiter {
    /// Create a limiter admitting `per_second` requests per second
    pub fn new(per_second: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate)),
            blocked_until: Mutex::new(None),
        }
    }

    /// Wait until a request may be sent
    pub async fn acquire(&self) {
        while let Some(wait) = self.blocked_for(Instant::now()) {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "Waiting out global rate limit");
            tokio::time::sleep(wait).await;
        }
        self.limiter.until_ready().await;
    }

    /// Block every route for `duration`
    ///
    /// An existing longer block is kept.
    pub fn block_for(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut blocked = self.blocked_until.lock();
        if blocked.map_or(true, |current| current < until) {
            *blocked = Some(until);
        }
    }

    /// Remaining global block, if any
    pub fn blocked_for(&self, now: Instant) -> Option<Duration> {
        let mut blocked = self.blocked_until.lock();
        match *blocked {
            Some(until) if until > now => Some(until - now),
            Some(_) => {
                *blocked = None;
                None
            }
            None => None,
        }
    }
}

impl std::fmt::Debug for GlobalLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalLimiter")
            .field("blocked_until", &*self.blocked_until.lock())
            .finish_non_exhaustive()
    }
}
