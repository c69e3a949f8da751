//! Per-route rate limit buckets
//!
//! Each route key maps to one `RateLimitBucket`. A request holds the
//! bucket's lock for its whole lifetime (preemptive wait, send, header
//! refresh), so requests on the same bucket run strictly one at a time in
//! FIFO order while other buckets proceed independently.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use super::RateLimitHeaders;

/// Throttling state of one bucket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketState {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_at: Option<Instant>,
    /// Bucket hash reported by the remote
    pub hash: Option<String>,
}

impl BucketState {
    /// Time to wait before the next request may be sent
    ///
    /// Only an exhausted bucket with a reset in the future waits.
    pub fn wait_time(&self, now: Instant) -> Option<Duration> {
        match (self.remaining, self.reset_at) {
            (Some(0), Some(reset_at)) if reset_at > now => Some(reset_at - now),
            _ => None,
        }
    }

    #[inline]
    pub fn is_exhausted(&self, now: Instant) -> bool {
        self.wait_time(now).is_some()
    }

    /// Refresh from response headers; absent headers leave fields untouched
    pub fn update(&mut self, headers: &RateLimitHeaders, now: Instant) {
        if let Some(limit) = headers.limit {
            self.limit = Some(limit);
        }
        if let Some(remaining) = headers.remaining {
            self.remaining = Some(remaining);
        }
        if let Some(reset_after) = headers.reset_after {
            self.reset_at = Some(now + reset_after);
        }
        if let Some(hash) = &headers.bucket {
            self.hash = Some(hash.clone());
        }
    }

    /// Block the bucket for `retry_after`, after a route-scoped 429
    pub fn exhaust_for(&mut self, retry_after: Duration, now: Instant) {
        self.remaining = Some(0);
        self.reset_at = Some(now + retry_after);
    }

    /// Check if the state can be forgotten without losing a pending wait
    pub fn is_expired(&self, now: Instant) -> bool {
        self.reset_at.map_or(true, |reset_at| reset_at <= now)
    }
}

/// A bucket shared by every request to the same route key
#[derive(Debug)]
pub struct RateLimitBucket {
    key: String,
    state: Mutex<BucketState>,
}

impl RateLimitBucket {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(BucketState::default()),
        }
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for exclusive access to the bucket (FIFO)
    pub async fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().await
    }

    /// Snapshot of the state if no request currently holds the bucket
    pub fn try_snapshot(&self) -> Option<BucketState> {
        self.state.try_lock().ok().map(|state| state.clone())
    }
}

/// Route key to bucket map
#[derive(Debug, Default)]
pub struct BucketStore {
    buckets: DashMap<String, Arc<RateLimitBucket>>,
}

impl BucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the bucket for a route key, creating it on first use
    pub fn get_or_create(&self, key: &str) -> Arc<RateLimitBucket> {
        if let Some(bucket) = self.buckets.get(key) {
            return Arc::clone(&bucket);
        }
        Arc::clone(
            &self
                .buckets
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(RateLimitBucket::new(key))),
        )
    }

    pub fn get(&self, key: &str) -> Option<Arc<RateLimitBucket>> {
        self.buckets.get(key).map(|bucket| Arc::clone(&bucket))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop idle buckets whose reset has passed
    ///
    /// Buckets that are referenced by an in-flight request or still
    /// waiting out a reset are kept. Returns the number removed.
    pub fn prune_expired(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            Arc::strong_count(bucket) > 1
                || bucket
                    .try_snapshot()
                    .map_or(true, |state| !state.is_expired(now))
        });
        before.saturating_sub(self.buckets.len())
    }
}
