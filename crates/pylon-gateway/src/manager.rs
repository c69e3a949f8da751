//! Shard manager
//!
//! Owns every shard of the client: discovers the gateway, spawns one
//! supervised task per shard, routes guilds to shards, aggregates
//! readiness and latency, and runs the shutdown sequence.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use pylon_cache::ClientCache;
use pylon_common::{ClientConfig, ClientError, ClientResult, ErrorKind};
use pylon_core::Snowflake;
use pylon_rest::RequestDispatcher;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::GatewayError;
use crate::events::{panic_message, EventDispatcher};
use crate::identify::IdentifyCoordinator;
use crate::protocol::CloseCodeTable;
use crate::shard::{GatewayCommand, ShardConnection, ShardContext, ShardHandle, ShardState, ShardStatus};
use crate::transport::{GatewayTransport, WsTransport};

/// A shard that stopped for good
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFailure {
    pub shard_id: u32,
    pub kind: ErrorKind,
    pub message: String,
}

/// Shard layout resolved at start
#[derive(Debug, Clone, PartialEq, Eq)]
struct Topology {
    url: String,
    shard_count: u32,
    max_concurrency: u32,
}

pub struct ShardManager {
    config: Arc<ClientConfig>,
    rest: Arc<RequestDispatcher>,
    cache: Arc<ClientCache>,
    events: Arc<EventDispatcher>,
    transport: Arc<dyn GatewayTransport>,
    close_codes: Arc<CloseCodeTable>,
    handles: RwLock<Vec<Arc<ShardHandle>>>,
    identify: RwLock<Option<Arc<IdentifyCoordinator>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    failures: Mutex<Vec<ShardFailure>>,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
    ready: Arc<watch::Sender<u32>>,
}

impl ShardManager {
    /// Create a manager with the WebSocket and reqwest transports
    pub fn new(config: ClientConfig) -> ClientResult<Arc<Self>> {
        config.validate()?;
        let rest = Arc::new(RequestDispatcher::new(&config)?);
        Ok(Self::with_transports(config, rest, Arc::new(WsTransport)))
    }

    /// Create a manager over caller-provided transports
    pub fn with_transports(
        config: ClientConfig,
        rest: Arc<RequestDispatcher>,
        transport: Arc<dyn GatewayTransport>,
    ) -> Arc<Self> {
        let close_codes = Arc::new(CloseCodeTable::new(config.gateway.close_code_overrides.clone()));
        let cache = ClientCache::new_shared(&config.cache);
        let (shutdown, _) = watch::channel(false);
        let (ready, _) = watch::channel(0u32);

        Arc::new(Self {
            config: Arc::new(config),
            rest,
            cache,
            events: EventDispatcher::new_shared(),
            transport,
            close_codes,
            handles: RwLock::new(Vec::new()),
            identify: RwLock::new(None),
            tasks: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            shutdown,
            ready: Arc::new(ready),
        })
    }

    #[inline]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[inline]
    pub fn cache(&self) -> &Arc<ClientCache> {
        &self.cache
    }

    #[inline]
    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    #[inline]
    pub fn rest(&self) -> &Arc<RequestDispatcher> {
        &self.rest
    }

    /// Resolve the shard layout and spawn every shard
    ///
    /// Calling this more than once has no effect.
    pub async fn start(self: &Arc<Self>) -> ClientResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Shard manager already started");
            return Ok(());
        }

        let topology = self.resolve_topology().await?;
        info!(
            url = %topology.url,
            shard_count = topology.shard_count,
            max_concurrency = topology.max_concurrency,
            "Starting shards"
        );

        let identify = IdentifyCoordinator::new_shared(
            topology.max_concurrency,
            self.config.gateway.identify_window(),
        );
        *self.identify.write() = Some(Arc::clone(&identify));

        let ctx = ShardContext {
            config: Arc::clone(&self.config),
            gateway_url: topology.url,
            transport: Arc::clone(&self.transport),
            identify,
            close_codes: Arc::clone(&self.close_codes),
            cache: Arc::clone(&self.cache),
            events: Arc::clone(&self.events),
            ready: Arc::clone(&self.ready),
        };

        let mut handles = Vec::with_capacity(topology.shard_count as usize);
        let mut tasks = Vec::with_capacity(topology.shard_count as usize);
        for shard_id in 0..topology.shard_count {
            let state = Arc::new(ShardState::new(shard_id, topology.shard_count));
            let (handle, commands) = ShardHandle::new(state, &self.config.gateway);
            let handle = Arc::new(handle);

            tasks.push(tokio::spawn(Arc::clone(self).supervise(
                ctx.clone(),
                Arc::clone(&handle),
                commands,
            )));
            handles.push(handle);
        }

        *self.handles.write() = handles;
        self.tasks.lock().extend(tasks);
        Ok(())
    }

    async fn resolve_topology(&self) -> ClientResult<Topology> {
        let gateway = &self.config.gateway;
        if let (Some(url), Some(shard_count), Some(max_concurrency)) =
            (&gateway.url, gateway.shard_count, gateway.max_concurrency)
        {
            return Ok(Topology {
                url: url.clone(),
                shard_count: shard_count.max(1),
                max_concurrency: max_concurrency.max(1),
            });
        }

        let bot = self.rest.get_gateway_bot().await?;
        let limit = bot.session_start_limit;
        info!(
            url = %bot.url,
            shards = bot.shards,
            remaining = limit.remaining,
            total = limit.total,
            max_concurrency = limit.max_concurrency,
            "Fetched gateway information"
        );

        if limit.remaining == 0 {
            let wait = Duration::from_millis(limit.reset_after);
            warn!(wait_ms = limit.reset_after, "Session start limit exhausted, waiting for reset");
            let mut shutdown = self.shutdown.subscribe();
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                _ = async { shutdown.wait_for(|stop| *stop).await.is_ok() } => {
                    return Err(ClientError::Shutdown);
                }
            }
        }

        Ok(Topology {
            url: gateway.url.clone().unwrap_or(bot.url),
            shard_count: gateway.shard_count.unwrap_or(bot.shards).max(1),
            max_concurrency: gateway
                .max_concurrency
                .unwrap_or(limit.max_concurrency)
                .max(1),
        })
    }

    /// Run one shard, restarting it after a panic
    async fn supervise(
        self: Arc<Self>,
        ctx: ShardContext,
        handle: Arc<ShardHandle>,
        mut commands: mpsc::Receiver<GatewayCommand>,
    ) {
        let shard_id = handle.id();
        loop {
            let connection = ShardConnection::new(
                ctx.clone(),
                Arc::clone(handle.state()),
                commands,
                self.shutdown.subscribe(),
            );

            match AssertUnwindSafe(connection.run()).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => {
                    self.record_failure(shard_id, err);
                    return;
                }
                Err(panic) => {
                    let err = GatewayError::Panicked(shard_id);
                    if *self.shutdown.borrow() {
                        self.record_failure(shard_id, err);
                        return;
                    }
                    error!(
                        shard_id,
                        error = %err,
                        panic = panic_message(panic.as_ref()),
                        "Restarting shard"
                    );
                    commands = handle.reopen();
                }
            }
        }
    }

    fn record_failure(&self, shard_id: u32, err: GatewayError) {
        let err = ClientError::from(err);
        error!(
            shard_id,
            kind = %err.kind(),
            code = err.error_code(),
            error = %err,
            "Shard failed"
        );
        self.failures.lock().push(ShardFailure {
            shard_id,
            kind: err.kind(),
            message: err.to_string(),
        });

        if err.stops_client() {
            error!("Credentials rejected, stopping all shards");
            self.rest.close();
            self.stop_shards();
        }
    }

    fn stop_shards(&self) {
        self.shutdown.send_replace(true);
        if let Some(identify) = self.identify.read().as_ref() {
            identify.close();
        }
    }

    /// Stop REST intake, drain in-flight requests, then close every shard with 1000
    ///
    /// Requests still running after the grace period fail with
    /// `RestError::Closed` and never reach the server.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.rest.close();

        let grace = self.config.shutdown_grace();
        if !self.rest.drain(grace).await {
            warn!(
                inflight = self.rest.inflight(),
                grace_ms = grace.as_millis() as u64,
                "REST requests cancelled after grace period"
            );
        }

        self.stop_shards();
        self.join().await;
        info!("Shutdown complete");
    }

    /// Wait for every shard task to finish
    pub async fn join(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Shard task aborted");
            }
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Wait until every shard has been Ready at least once
    ///
    /// Fails with `ClientError::Shutdown` if the manager stops first.
    pub async fn wait_until_ready(&self) -> ClientResult<()> {
        let total = self.shard_count().max(1);
        let mut ready = self.ready.subscribe();
        let mut shutdown = self.shutdown.subscribe();

        let reached = tokio::select! {
            reached = async { ready.wait_for(|n| *n >= total).await.is_ok() } => reached,
            _ = async { shutdown.wait_for(|stop| *stop).await.is_ok() } => false,
        };
        if reached {
            Ok(())
        } else {
            Err(ClientError::Shutdown)
        }
    }

    pub fn is_ready(&self) -> bool {
        let total = self.shard_count();
        total > 0 && *self.ready.borrow() >= total
    }

    /// Number of shards; 0 before `start`
    pub fn shard_count(&self) -> u32 {
        self.handles.read().len() as u32
    }

    /// Shard that receives events for a guild
    pub fn shard_for_guild(&self, guild_id: Snowflake) -> u32 {
        guild_id.shard_id(self.shard_count())
    }

    pub fn handle(&self, shard_id: u32) -> Option<Arc<ShardHandle>> {
        self.handles.read().get(shard_id as usize).cloned()
    }

    pub fn handle_for_guild(&self, guild_id: Snowflake) -> Option<Arc<ShardHandle>> {
        self.handle(self.shard_for_guild(guild_id))
    }

    pub fn statuses(&self) -> Vec<(u32, ShardStatus)> {
        self.handles
            .read()
            .iter()
            .map(|handle| (handle.id(), handle.status()))
            .collect()
    }

    /// Heartbeat round trip per shard
    pub fn latencies(&self) -> Vec<(u32, Option<Duration>)> {
        self.handles
            .read()
            .iter()
            .map(|handle| (handle.id(), handle.latency()))
            .collect()
    }

    /// Mean round trip over shards that have measured one
    pub fn average_latency(&self) -> Option<Duration> {
        average(self.latencies().into_iter().filter_map(|(_, latency)| latency))
    }

    /// Shards that stopped with a fatal error
    pub fn failures(&self) -> Vec<ShardFailure> {
        self.failures.lock().clone()
    }
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager")
            .field("shard_count", &self.shard_count())
            .field("ready", &*self.ready.borrow())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

fn average(latencies: impl Iterator<Item = Duration>) -> Option<Duration> {
    let (sum, count) = latencies.fold((Duration::ZERO, 0u32), |(sum, count), latency| {
        (sum + latency, count + 1)
    });
    (count > 0).then(|| sum / count)
}
