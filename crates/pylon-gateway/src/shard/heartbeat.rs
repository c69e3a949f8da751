//! Heartbeat scheduling and zombie detection
//!
//! The first beat is sent after `interval * jitter` (jitter in `[0, 1)`),
//! then every `interval`. When a beat comes due while the previous one is
//! still unacknowledged, it counts as a miss; more misses than the
//! tolerance mark the connection as zombied.
//!
//! The interval comes from the remote and is capped at
//! `MAX_HEARTBEAT_INTERVAL`, so deadlines never overflow `Instant`.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Longest heartbeat interval a HELLO may ask for
pub const MAX_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// What to do when the heartbeat timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    Send,
    Zombie,
}

#[derive(Debug, Clone)]
pub struct Heartbeater {
    interval: Duration,
    tolerance: u32,
    next_at: Instant,
    sent_at: Option<Instant>,
    awaiting_ack: bool,
    missed: u32,
}

impl Heartbeater {
    /// Schedule with a random first-beat jitter
    pub fn new(interval: Duration, tolerance: u32, now: Instant) -> Self {
        let jitter = rand::thread_rng().gen_range(0.0..1.0);
        Self::with_jitter(interval, jitter, tolerance, now)
    }

    pub fn with_jitter(interval: Duration, jitter: f64, tolerance: u32, now: Instant) -> Self {
        let interval = interval.min(MAX_HEARTBEAT_INTERVAL);
        Self {
            interval,
            tolerance,
            next_at: now + interval.mul_f64(jitter.clamp(0.0, 1.0)),
            sent_at: None,
            awaiting_ack: false,
            missed: 0,
        }
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// When the next beat is due
    #[inline]
    pub fn deadline(&self) -> Instant {
        self.next_at
    }

    /// The timer fired: either send a beat or give up on the connection
    pub fn on_due(&mut self, now: Instant) -> Beat {
        if self.awaiting_ack {
            self.missed += 1;
            if self.missed > self.tolerance {
                return Beat::Zombie;
            }
        }

        self.awaiting_ack = true;
        self.sent_at = Some(now);
        self.next_at = now + self.interval;
        Beat::Send
    }

    /// A beat was sent at the remote's request; the schedule is unchanged
    pub fn on_request(&mut self, now: Instant) {
        if !self.awaiting_ack {
            self.awaiting_ack = true;
            self.sent_at = Some(now);
        }
    }

    /// A HEARTBEAT_ACK arrived; returns the round trip when one was pending
    pub fn on_ack(&mut self, now: Instant) -> Option<Duration> {
        let pending = std::mem::replace(&mut self.awaiting_ack, false);
        self.missed = 0;
        if pending {
            self.sent_at.map(|sent| now.saturating_duration_since(sent))
        } else {
            None
        }
    }

    #[inline]
    pub fn sent_at(&self) -> Option<Instant> {
        self.sent_at
    }

    #[inline]
    pub fn is_acked(&self) -> bool {
        !self.awaiting_ack
    }
}
