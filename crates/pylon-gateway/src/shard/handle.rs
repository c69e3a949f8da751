//! Outbound gateway commands and the per-shard handle

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::RwLock;
use pylon_common::GatewayConfig;
use tokio::sync::mpsc;

use super::{ShardSnapshot, ShardState, ShardStatus};
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{GatewayMessage, PresenceUpdatePayload, RequestGuildMembersPayload};

/// Commands queued until the shard is Ready
const COMMAND_BUFFER_SIZE: usize = 32;

/// A command a client may send on an established session
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCommand {
    PresenceUpdate(PresenceUpdatePayload),
    RequestGuildMembers(RequestGuildMembersPayload),
}

impl GatewayCommand {
    pub fn to_message(&self) -> Result<GatewayMessage, serde_json::Error> {
        match self {
            Self::PresenceUpdate(payload) => GatewayMessage::presence_update(payload),
            Self::RequestGuildMembers(payload) => GatewayMessage::request_guild_members(payload),
        }
    }
}

/// Caller-side view of one shard
///
/// Commands sent through the handle are throttled to the remote's
/// per-connection budget and held until the shard is Ready.
pub struct ShardHandle {
    state: Arc<ShardState>,
    commands: RwLock<mpsc::Sender<GatewayCommand>>,
    limiter: DefaultDirectRateLimiter,
}

impl ShardHandle {
    /// Create a handle and the receiver its connection reads commands from
    pub fn new(
        state: Arc<ShardState>,
        config: &GatewayConfig,
    ) -> (Self, mpsc::Receiver<GatewayCommand>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let handle = Self {
            state,
            commands: RwLock::new(tx),
            limiter: RateLimiter::direct(command_quota(config.command_limit, config.command_period_secs)),
        };
        (handle, rx)
    }

    /// Replace the command channel after the connection was restarted
    pub(crate) fn reopen(&self) -> mpsc::Receiver<GatewayCommand> {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        *self.commands.write() = tx;
        rx
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.state.id()
    }

    pub fn status(&self) -> ShardStatus {
        self.state.status()
    }

    pub fn snapshot(&self) -> ShardSnapshot {
        self.state.snapshot()
    }

    pub fn latency(&self) -> Option<Duration> {
        self.state.latency()
    }

    #[inline]
    pub fn state(&self) -> &Arc<ShardState> {
        &self.state
    }

    /// Queue a command, waiting for send budget first
    pub async fn send(&self, command: GatewayCommand) -> GatewayResult<()> {
        self.limiter.until_ready().await;
        let tx = self.commands.read().clone();
        tx.send(command).await.map_err(|_| GatewayError::Shutdown)
    }

    pub async fn update_presence(&self, presence: PresenceUpdatePayload) -> GatewayResult<()> {
        self.send(GatewayCommand::PresenceUpdate(presence)).await
    }

    pub async fn request_guild_members(&self, request: RequestGuildMembersPayload) -> GatewayResult<()> {
        self.send(GatewayCommand::RequestGuildMembers(request)).await
    }
}

impl std::fmt::Debug for ShardHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardHandle")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// `limit` commands per `period_secs`, all available as a burst
fn command_quota(limit: u32, period_secs: u64) -> Quota {
    let limit = NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(Duration::from_secs(period_secs.max(1)) / limit.get())
        .map_or_else(|| Quota::per_minute(limit), |quota| quota.allow_burst(limit))
}
