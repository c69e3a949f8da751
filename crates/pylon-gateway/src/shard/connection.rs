//! Shard connection state machine
//!
//! One task per shard. A session runs
//! `Connecting -> AwaitingHello -> Handshaking -> Ready`; when it ends the
//! shard either stops (shutdown or fatal close) or backs off and opens a
//! new session, resuming when the previous close allows it.
//!
//! Frames, the heartbeat timer, the identify slot and queued commands are
//! all polled by a single `select!`, so frames are applied to the cache in
//! arrival order and the heartbeat keeps running while the shard waits for
//! its identify slot.
//!
//! After READY the shard waits for the guilds it announced to stream in as
//! GUILD_CREATE, or for `ready_timeout`, before it counts as ready.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, OptionFuture};
use pylon_cache::ClientCache;
use pylon_common::{ClientConfig, ExponentialBackoff};
use pylon_core::{DispatchEvent, ReadyPayload, Snowflake};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::heartbeat::{Beat, Heartbeater, MAX_HEARTBEAT_INTERVAL};
use super::{GatewayCommand, Handshake, ShardState, ShardStatus};
use crate::error::{GatewayError, GatewayResult};
use crate::events::{Event, EventDispatcher};
use crate::identify::IdentifyCoordinator;
use crate::protocol::{
    connect_url, CloseClass, CloseCode, CloseCodeTable, GatewayMessage, IdentifyPayload, OpCode,
    ResumePayload,
};
use crate::transport::{Frame, GatewayStream, GatewayTransport, ZlibInflater};

/// Collaborators shared by every shard of a manager
#[derive(Clone)]
pub struct ShardContext {
    pub config: Arc<ClientConfig>,
    pub gateway_url: String,
    pub transport: Arc<dyn GatewayTransport>,
    pub identify: Arc<IdentifyCoordinator>,
    pub close_codes: Arc<CloseCodeTable>,
    pub cache: Arc<ClientCache>,
    pub events: Arc<EventDispatcher>,
    /// Number of shards that reached Ready at least once
    pub ready: Arc<watch::Sender<u32>>,
}

/// How a session ended
#[derive(Debug)]
pub enum SessionEnd {
    /// Shutdown was requested; the stream was closed with 1000
    Shutdown,
    /// Open a new session after backoff
    Reconnect { resumable: bool },
    /// Stop the shard for good
    Fatal(GatewayError),
}

/// Session identity kept across reconnects
#[derive(Debug, Clone)]
struct Session {
    id: String,
    resume_url: Option<String>,
}

pub struct ShardConnection {
    id: u32,
    count: u32,
    ctx: ShardContext,
    state: Arc<ShardState>,
    commands: mpsc::Receiver<GatewayCommand>,
    shutdown: watch::Receiver<bool>,
    session: Option<Session>,
    sequence: Option<u64>,
    /// Whether the last close allows resuming
    resumable: bool,
    backoff: ExponentialBackoff,
    /// Consecutive protocol violations
    violations: u32,
    /// Guilds announced in READY that have not arrived yet
    pending_guilds: HashSet<Snowflake>,
    /// When to stop waiting for `pending_guilds`
    ready_deadline: Option<Instant>,
    /// zlib-stream context of the current connection
    inflater: Option<ZlibInflater>,
}

impl ShardConnection {
    pub fn new(
        ctx: ShardContext,
        state: Arc<ShardState>,
        commands: mpsc::Receiver<GatewayCommand>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let backoff = ExponentialBackoff::new(
            ctx.config.gateway.reconnect_base(),
            ctx.config.gateway.reconnect_cap(),
        );
        Self {
            id: state.id(),
            count: state.count(),
            ctx,
            state,
            commands,
            shutdown,
            session: None,
            sequence: None,
            resumable: false,
            backoff,
            violations: 0,
            pending_guilds: HashSet::new(),
            ready_deadline: None,
            inflater: None,
        }
    }

    /// Run sessions until shutdown or a fatal error
    pub async fn run(mut self) -> GatewayResult<()> {
        info!(shard_id = self.id, shard_count = self.count, "Shard starting");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.run_session().await {
                SessionEnd::Shutdown => break,
                SessionEnd::Fatal(err) => {
                    self.clear_session();
                    self.state.set_status(ShardStatus::Closed);
                    error!(shard_id = self.id, error = %err, "Shard stopped by fatal error");
                    return Err(err);
                }
                SessionEnd::Reconnect { resumable } => {
                    self.resumable = resumable;
                    if !resumable {
                        self.clear_session();
                    }
                    self.state.set_status(ShardStatus::Reconnecting);

                    let delay = self.backoff.next_delay();
                    info!(
                        shard_id = self.id,
                        resumable,
                        attempt = self.backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.changed() => break,
                    }
                }
            }
        }

        self.clear_session();
        self.state.set_status(ShardStatus::Disconnected);
        info!(shard_id = self.id, "Shard stopped");
        Ok(())
    }

    async fn run_session(&mut self) -> SessionEnd {
        self.state.set_status(ShardStatus::Connecting);

        let base = match &self.session {
            Some(Session {
                resume_url: Some(url),
                ..
            }) if self.can_resume() => url.clone(),
            _ => self.ctx.gateway_url.clone(),
        };
        let compress = self.ctx.config.gateway.compress;
        let url = connect_url(&base, compress);
        self.inflater = compress.then(ZlibInflater::new);

        let transport = Arc::clone(&self.ctx.transport);
        let mut stream = tokio::select! {
            result = transport.connect(&url) => match result {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(shard_id = self.id, error = %e, "Failed to connect");
                    return SessionEnd::Reconnect { resumable: self.resumable };
                }
            },
            _ = self.shutdown.changed() => return SessionEnd::Shutdown,
        };

        let interval = match self.await_hello(&mut *stream).await {
            ControlFlow::Continue(interval) => interval,
            ControlFlow::Break(end) => return end,
        };
        debug!(shard_id = self.id, interval_ms = interval.as_millis() as u64, "Received HELLO");

        let mut heartbeater = Heartbeater::new(
            interval,
            self.ctx.config.gateway.heartbeat_ack_tolerance,
            Instant::now(),
        );

        // Identify waits for a coordinator slot inside the main loop so
        // heartbeats keep flowing meanwhile
        let mut identify_wait: Option<BoxFuture<'static, GatewayResult<()>>> = None;
        if self.can_resume() {
            if let Err(e) = self.send_resume(&mut *stream).await {
                return self.transient(&e);
            }
        } else {
            self.clear_session();
            self.state.set_status(ShardStatus::Handshaking(Handshake::Identify));
            let identify = Arc::clone(&self.ctx.identify);
            let shard_id = self.id;
            identify_wait = Some(Box::pin(async move { identify.acquire(shard_id).await }));
        }

        loop {
            let ready = self.state.status() == ShardStatus::Ready;

            tokio::select! {
                biased;

                _ = self.shutdown.changed() => {
                    info!(shard_id = self.id, "Closing session for shutdown");
                    let _ = stream.close(CloseCode::NORMAL).await;
                    return SessionEnd::Shutdown;
                }

                Some(slot) = OptionFuture::from(identify_wait.as_mut()), if identify_wait.is_some() => {
                    identify_wait = None;
                    if slot.is_err() {
                        let _ = stream.close(CloseCode::NORMAL).await;
                        return SessionEnd::Shutdown;
                    }
                    if let Err(e) = self.send_identify(&mut *stream).await {
                        return self.transient(&e);
                    }
                }

                () = tokio::time::sleep_until(heartbeater.deadline()) => {
                    let now = Instant::now();
                    match heartbeater.on_due(now) {
                        Beat::Send => {
                            if let Err(e) = self.send_heartbeat(&mut *stream).await {
                                return self.transient(&e);
                            }
                            self.state.update(|s| {
                                s.last_heartbeat_sent_at = Some(now);
                                s.last_heartbeat_acked = false;
                            });
                        }
                        Beat::Zombie => {
                            warn!(shard_id = self.id, "Heartbeat not acknowledged, connection zombied");
                            let _ = stream.close(CloseCode::RECONNECT).await;
                            return SessionEnd::Reconnect { resumable: true };
                        }
                    }
                }

                frame = stream.recv() => {
                    if let ControlFlow::Break(end) = self.handle_frame(frame, &mut *stream, &mut heartbeater).await {
                        return end;
                    }
                }

                Some(()) = OptionFuture::from(self.ready_deadline.map(tokio::time::sleep_until)), if self.ready_deadline.is_some() => {
                    warn!(
                        shard_id = self.id,
                        missing = self.pending_guilds.len(),
                        "Guilds still unavailable after ready timeout"
                    );
                    self.finish_ready();
                }

                Some(command) = self.commands.recv(), if ready => {
                    match command.to_message() {
                        Ok(message) => {
                            if let Err(e) = self.send(&mut *stream, &message).await {
                                return self.transient(&e);
                            }
                            debug!(shard_id = self.id, op = %message.op, "Command sent");
                        }
                        Err(e) => warn!(shard_id = self.id, error = %e, "Dropping command that failed to encode"),
                    }
                }
            }
        }
    }

    /// Wait for HELLO and return the heartbeat interval
    async fn await_hello(&mut self, stream: &mut dyn GatewayStream) -> ControlFlow<SessionEnd, Duration> {
        self.state.set_status(ShardStatus::AwaitingHello);
        let timeout = self.ctx.config.gateway.hello_timeout();
        let deadline = Instant::now() + timeout;

        // A compressed HELLO may span several binary frames
        let text = loop {
            let next = tokio::select! {
                result = tokio::time::timeout_at(deadline, stream.recv()) => result,
                _ = self.shutdown.changed() => {
                    let _ = stream.close(CloseCode::NORMAL).await;
                    return ControlFlow::Break(SessionEnd::Shutdown);
                }
            };

            match next {
                Err(_) => {
                    warn!(shard_id = self.id, timeout_ms = timeout.as_millis() as u64, "No HELLO before timeout");
                    let _ = stream.close(CloseCode::RECONNECT).await;
                    return ControlFlow::Break(SessionEnd::Reconnect { resumable: self.resumable });
                }
                Ok(None) => {
                    return ControlFlow::Break(self.transient(&GatewayError::transport("stream ended before HELLO")));
                }
                Ok(Some(Err(e))) => return ControlFlow::Break(self.transient(&e)),
                Ok(Some(Ok(Frame::Close(code)))) => return ControlFlow::Break(self.on_close(code)),
                Ok(Some(Ok(Frame::Text(text)))) => break text,
                Ok(Some(Ok(Frame::Binary(bytes)))) => match self.inflate(&bytes) {
                    Ok(Some(text)) => break text,
                    Ok(None) => continue,
                    Err(e) => return ControlFlow::Break(self.protocol_violation(stream, e).await),
                },
            }
        };

        let Some(hello) = GatewayMessage::from_json(&text).ok().and_then(|m| m.as_hello()) else {
            return ControlFlow::Break(self.protocol_violation(stream, "expected HELLO as first frame").await);
        };
        let interval = Duration::from_millis(hello.heartbeat_interval);
        if interval.is_zero() || interval > MAX_HEARTBEAT_INTERVAL {
            let message = format!("heartbeat interval out of range: {}ms", hello.heartbeat_interval);
            return ControlFlow::Break(self.protocol_violation(stream, message).await);
        }
        ControlFlow::Continue(interval)
    }

    /// Decode a binary frame, through zlib-stream when compression is on
    ///
    /// `Ok(None)` while a compressed message is still incomplete.
    fn inflate(&mut self, bytes: &[u8]) -> GatewayResult<Option<String>> {
        match self.inflater.as_mut() {
            Some(inflater) => inflater.push(bytes),
            None => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| GatewayError::protocol("binary frame is not UTF-8")),
        }
    }

    async fn handle_frame(
        &mut self,
        frame: Option<GatewayResult<Frame>>,
        stream: &mut dyn GatewayStream,
        heartbeater: &mut Heartbeater,
    ) -> ControlFlow<SessionEnd> {
        let text = match frame {
            None => {
                warn!(shard_id = self.id, "Stream ended without a close frame");
                return ControlFlow::Break(SessionEnd::Reconnect { resumable: true });
            }
            Some(Err(e)) => {
                warn!(shard_id = self.id, error = %e, "Stream error");
                return ControlFlow::Break(SessionEnd::Reconnect { resumable: true });
            }
            Some(Ok(Frame::Close(code))) => return ControlFlow::Break(self.on_close(code)),
            Some(Ok(Frame::Text(text))) => text,
            Some(Ok(Frame::Binary(bytes))) => match self.inflate(&bytes) {
                Ok(Some(text)) => text,
                Ok(None) => return ControlFlow::Continue(()),
                Err(e) => return ControlFlow::Break(self.protocol_violation(stream, e).await),
            },
        };

        let message = match GatewayMessage::from_json(&text) {
            Ok(message) => message,
            Err(e) => {
                return ControlFlow::Break(
                    self.protocol_violation(stream, format!("undecodable frame: {e}")).await,
                );
            }
        };
        trace!(shard_id = self.id, op = %message.op, seq = ?message.s, "Frame received");

        match message.op {
            OpCode::Dispatch => self.handle_dispatch(message, stream).await,
            OpCode::Heartbeat => {
                if let Err(e) = self.send_heartbeat(stream).await {
                    return ControlFlow::Break(self.transient(&e));
                }
                let now = Instant::now();
                heartbeater.on_request(now);
                self.state.update(|s| {
                    s.last_heartbeat_sent_at = heartbeater.sent_at();
                    s.last_heartbeat_acked = heartbeater.is_acked();
                });
                ControlFlow::Continue(())
            }
            OpCode::HeartbeatAck => {
                let latency = heartbeater.on_ack(Instant::now());
                self.state.update(|s| {
                    s.last_heartbeat_acked = true;
                    if latency.is_some() {
                        s.latency = latency;
                    }
                });
                trace!(shard_id = self.id, latency = ?latency, "Heartbeat acknowledged");
                ControlFlow::Continue(())
            }
            OpCode::Reconnect => {
                info!(shard_id = self.id, "Remote requested reconnect");
                let _ = stream.close(CloseCode::RECONNECT).await;
                ControlFlow::Break(SessionEnd::Reconnect { resumable: true })
            }
            OpCode::InvalidSession => {
                let resumable = message.as_invalid_session().unwrap_or(false);
                warn!(shard_id = self.id, resumable, "Session invalidated");
                let code = if resumable { CloseCode::RECONNECT } else { CloseCode::NORMAL };
                let _ = stream.close(code).await;
                ControlFlow::Break(SessionEnd::Reconnect { resumable })
            }
            op => ControlFlow::Break(
                self.protocol_violation(stream, format!("unexpected op code {op}")).await,
            ),
        }
    }

    async fn handle_dispatch(
        &mut self,
        message: GatewayMessage,
        stream: &mut dyn GatewayStream,
    ) -> ControlFlow<SessionEnd> {
        let Some(name) = message.t else {
            return ControlFlow::Break(self.protocol_violation(stream, "dispatch without event name").await);
        };

        if let Some(seq) = message.s {
            if let Some(current) = self.sequence.filter(|current| seq <= *current) {
                debug!(shard_id = self.id, seq, current, event = %name, "Dropping stale dispatch");
                return ControlFlow::Continue(());
            }
            self.sequence = Some(seq);
            self.state.update(|s| s.sequence = Some(seq));
        }

        let payload = match DispatchEvent::parse(&name, &message.d) {
            Ok(payload) => payload,
            Err(e) if name == "READY" => {
                return ControlFlow::Break(self.protocol_violation(stream, e).await);
            }
            Err(e) => {
                warn!(shard_id = self.id, event = %name, error = %e, "Malformed dispatch payload");
                None
            }
        };

        let mut guilds_settled = false;
        match &payload {
            Some(DispatchEvent::Ready(ready)) => guilds_settled = self.on_ready(ready),
            Some(DispatchEvent::Resumed) => self.on_resumed(),
            Some(DispatchEvent::GuildCreate(guild)) => guilds_settled = self.settle_guild(guild.id),
            Some(DispatchEvent::GuildDelete(guild)) if guild.unavailable => {
                guilds_settled = self.settle_guild(guild.id);
            }
            _ => {}
        }

        let lifecycle = payload.as_ref().and_then(|event| self.ctx.cache.apply(event));
        let event = Event::dispatch(self.id, name, message.s, payload, message.d);
        let derived = lifecycle.map(|kind| Event::guild_lifecycle(&event, kind));
        self.ctx.events.dispatch(event);
        if let Some(derived) = derived {
            self.ctx.events.dispatch(derived);
        }

        if guilds_settled {
            self.finish_ready();
        }
        ControlFlow::Continue(())
    }

    /// Returns true when no announced guild is left to wait for
    fn on_ready(&mut self, ready: &ReadyPayload) -> bool {
        self.session = Some(Session {
            id: ready.session_id.clone(),
            resume_url: ready.resume_gateway_url.clone(),
        });
        self.resumable = true;
        self.backoff.reset();
        self.violations = 0;

        // A fresh session replays every guild
        let cleared = self.ctx.cache.clear_shard(self.id, self.count);
        self.state.set_status(ShardStatus::Ready);

        self.state.update(|s| s.session_id = Some(ready.session_id.clone()));

        self.pending_guilds = ready.guilds.iter().map(|guild| guild.id).collect();
        let timeout = self.ctx.config.gateway.ready_timeout();
        self.ready_deadline = (!self.pending_guilds.is_empty() && !timeout.is_zero())
            .then(|| Instant::now() + timeout);

        info!(
            shard_id = self.id,
            session_id = %ready.session_id,
            guilds = ready.guilds.len(),
            cleared,
            "Session ready"
        );
        self.ready_deadline.is_none()
    }

    /// A guild announced in READY arrived; true when it was the last one
    fn settle_guild(&mut self, guild_id: Snowflake) -> bool {
        self.ready_deadline.is_some() && self.pending_guilds.remove(&guild_id) && self.pending_guilds.is_empty()
    }

    /// Stop waiting for guilds; the first time, the shard counts as ready
    fn finish_ready(&mut self) {
        self.ready_deadline = None;
        self.pending_guilds.clear();

        let mut first = false;
        self.state.update(|s| {
            first = !s.ready_once;
            s.ready_once = true;
        });
        if first {
            self.ctx.ready.send_modify(|n| *n += 1);
            self.ctx.events.dispatch(Event::shard_ready(self.id, self.count));
            info!(shard_id = self.id, "Shard ready");
        }
    }

    fn on_resumed(&mut self) {
        self.backoff.reset();
        self.violations = 0;
        self.state.set_status(ShardStatus::Ready);
        info!(shard_id = self.id, seq = ?self.sequence, "Session resumed");
    }

    fn on_close(&self, code: Option<u16>) -> SessionEnd {
        match self.ctx.close_codes.classify(code) {
            CloseClass::Resumable => {
                info!(shard_id = self.id, code = ?code, "Stream closed");
                SessionEnd::Reconnect { resumable: true }
            }
            CloseClass::NonResumable => {
                warn!(shard_id = self.id, code = ?code, "Stream closed, session lost");
                SessionEnd::Reconnect { resumable: false }
            }
            CloseClass::Fatal(reason) => {
                let code = code.unwrap_or_default();
                error!(shard_id = self.id, code, reason = %reason, "Stream closed with fatal code");
                SessionEnd::Fatal(GatewayError::FatalClose { code, reason })
            }
        }
    }

    /// Reconnect once; a second consecutive violation is fatal
    async fn protocol_violation(
        &mut self,
        stream: &mut dyn GatewayStream,
        message: impl std::fmt::Display,
    ) -> SessionEnd {
        self.violations += 1;
        let message = message.to_string();

        if self.violations > 1 {
            error!(shard_id = self.id, violations = self.violations, message = %message, "Repeated protocol violation");
            let _ = stream.close(CloseCode::NORMAL).await;
            return SessionEnd::Fatal(GatewayError::Protocol {
                message,
                fatal: true,
            });
        }

        warn!(shard_id = self.id, message = %message, "Protocol violation, reconnecting");
        let _ = stream.close(CloseCode::RECONNECT).await;
        SessionEnd::Reconnect { resumable: false }
    }

    fn transient(&self, err: &GatewayError) -> SessionEnd {
        warn!(shard_id = self.id, error = %err, "Session failed");
        SessionEnd::Reconnect {
            resumable: self.resumable,
        }
    }

    /// Resume iff the last close was resumable and a session and sequence exist
    fn can_resume(&self) -> bool {
        self.resumable && self.session.is_some() && self.sequence.is_some()
    }

    fn clear_session(&mut self) {
        self.session = None;
        self.sequence = None;
        self.state.update(|s| {
            s.session_id = None;
            s.sequence = None;
        });
    }

    async fn send(&self, stream: &mut dyn GatewayStream, message: &GatewayMessage) -> GatewayResult<()> {
        stream.send(message.to_json()?).await
    }

    async fn send_heartbeat(&self, stream: &mut dyn GatewayStream) -> GatewayResult<()> {
        trace!(shard_id = self.id, seq = ?self.sequence, "Sending heartbeat");
        self.send(stream, &GatewayMessage::heartbeat(self.sequence)).await
    }

    async fn send_identify(&self, stream: &mut dyn GatewayStream) -> GatewayResult<()> {
        let config = &self.ctx.config;
        let payload = IdentifyPayload::new(config.token.as_str(), config.intents, self.id, self.count)
            .with_large_threshold(config.gateway.large_threshold);

        info!(shard_id = self.id, intents = %config.intents, "Identifying");
        self.send(stream, &GatewayMessage::identify(&payload)?).await
    }

    async fn send_resume(&self, stream: &mut dyn GatewayStream) -> GatewayResult<()> {
        let (Some(session), Some(seq)) = (&self.session, self.sequence) else {
            return Err(GatewayError::protocol("no session to resume"));
        };
        self.state.set_status(ShardStatus::Handshaking(Handshake::Resume));

        let payload = ResumePayload {
            token: self.ctx.config.token.clone(),
            session_id: session.id.clone(),
            seq,
        };
        info!(shard_id = self.id, session_id = %session.id, seq, "Resuming session");
        self.send(stream, &GatewayMessage::resume(&payload)?).await
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }
}
