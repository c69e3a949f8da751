//! Shared shard state
//!
//! Written only by the shard's own connection task; the manager and
//! handles read snapshots.

use std::fmt;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

/// Which handshake a shard is performing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handshake {
    Identify,
    Resume,
}

/// Connection lifecycle of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShardStatus {
    #[default]
    Disconnected,
    Connecting,
    AwaitingHello,
    Handshaking(Handshake),
    Ready,
    Reconnecting,
    /// Stopped by a fatal error; never restarted
    Closed,
}

impl ShardStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::Handshaking(Handshake::Identify) => "identifying",
            Self::Handshaking(Handshake::Resume) => "resuming",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a shard
#[derive(Debug, Clone, Default)]
pub struct ShardSnapshot {
    pub status: ShardStatus,
    pub session_id: Option<String>,
    pub sequence: Option<u64>,
    pub last_heartbeat_sent_at: Option<Instant>,
    pub last_heartbeat_acked: bool,
    /// Heartbeat round trip of the last acknowledged beat
    pub latency: Option<Duration>,
    /// Set once the shard has reached Ready at least once
    pub ready_once: bool,
}

#[derive(Debug)]
pub struct ShardState {
    id: u32,
    count: u32,
    inner: RwLock<ShardSnapshot>,
}

impl ShardState {
    pub fn new(id: u32, count: u32) -> Self {
        Self {
            id,
            count,
            inner: RwLock::new(ShardSnapshot::default()),
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn snapshot(&self) -> ShardSnapshot {
        self.inner.read().clone()
    }

    pub fn status(&self) -> ShardStatus {
        self.inner.read().status
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.read().session_id.clone()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.inner.read().sequence
    }

    pub fn latency(&self) -> Option<Duration> {
        self.inner.read().latency
    }

    pub fn has_been_ready(&self) -> bool {
        self.inner.read().ready_once
    }

    pub(crate) fn set_status(&self, status: ShardStatus) {
        let mut inner = self.inner.write();
        if inner.status != status {
            tracing::debug!(shard_id = self.id, from = %inner.status, to = %status, "Shard status changed");
            inner.status = status;
        }
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut ShardSnapshot)) {
        f(&mut self.inner.write());
    }
}
