//! Scripted transports and harnesses
//!
//! `MockGateway` hands every stream a shard opens to the test as a
//! `MockConnection`, which plays the remote side: it pushes frames to the
//! shard and reads what the shard sent. `MockHttp` answers REST requests
//! from per-route queues and records when each request reached it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flate2::{Compress, Compression, FlushCompress};
use parking_lot::Mutex;
use pylon_cache::ClientCache;
use pylon_common::ClientConfig;
use pylon_gateway::{
    EventDispatcher, Frame, GatewayCommand, GatewayError, GatewayMessage, GatewayResult,
    GatewayStream, GatewayTransport, IdentifyCoordinator, OpCode, ShardConnection, ShardContext,
    ShardHandle, ShardManager, ShardState, CloseCodeTable,
};
use pylon_rest::{HttpRequest, HttpResponse, HttpTransport, Method, RequestDispatcher, RestResult};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::fixtures::{http_response, MOCK_API_BASE, MOCK_GATEWAY_URL};

/// Longest a test waits for the shard to do something
const WAIT: Duration = Duration::from_secs(600);

/// What a shard wrote to its stream
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Message(GatewayMessage),
    Close(u16),
}

// ============================================================================
// Gateway transport
// ============================================================================

pub struct MockGateway {
    accepted: mpsc::UnboundedSender<MockConnection>,
    urls: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> (Arc<Self>, MockAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(Self {
            accepted: tx,
            urls: Mutex::default(),
        });
        (gateway, MockAcceptor { rx })
    }

    /// URLs of every stream opened so far
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl GatewayTransport for MockGateway {
    async fn connect(&self, url: &str) -> GatewayResult<Box<dyn GatewayStream>> {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();

        self.urls.lock().push(url.to_string());
        self.accepted
            .send(MockConnection {
                url: url.to_string(),
                to_client,
                from_client,
                deflate: Mutex::new(None),
            })
            .map_err(|_| GatewayError::transport("mock gateway gone"))?;

        Ok(Box::new(MockStream {
            inbound,
            outbound,
            closed: false,
        }))
    }
}

pub struct MockAcceptor {
    rx: mpsc::UnboundedReceiver<MockConnection>,
}

impl MockAcceptor {
    /// Next stream a shard opened
    pub async fn accept(&mut self) -> MockConnection {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("no connection opened")
            .expect("mock gateway dropped")
    }
}

struct MockStream {
    inbound: mpsc::UnboundedReceiver<GatewayResult<Frame>>,
    outbound: mpsc::UnboundedSender<Sent>,
    closed: bool,
}

#[async_trait]
impl GatewayStream for MockStream {
    async fn send(&mut self, text: String) -> GatewayResult<()> {
        let message = GatewayMessage::from_json(&text)?;
        self.outbound
            .send(Sent::Message(message))
            .map_err(|_| GatewayError::transport("remote went away"))
    }

    async fn recv(&mut self) -> Option<GatewayResult<Frame>> {
        if self.closed {
            return None;
        }
        self.inbound.recv().await
    }

    async fn close(&mut self, code: u16) -> GatewayResult<()> {
        self.closed = true;
        let _ = self.outbound.send(Sent::Close(code));
        Ok(())
    }
}

/// The remote end of one shard stream
pub struct MockConnection {
    pub url: String,
    to_client: mpsc::UnboundedSender<GatewayResult<Frame>>,
    from_client: mpsc::UnboundedReceiver<Sent>,
    /// The remote's side of the zlib stream, once compression is on
    deflate: Mutex<Option<Compress>>,
}

impl MockConnection {
    /// Deflate every following frame into one zlib stream
    pub fn enable_compression(&self) {
        *self.deflate.lock() = Some(Compress::new(Compression::default(), true));
    }

    pub fn send(&self, message: &GatewayMessage) {
        self.send_raw(&message.to_json().expect("encode frame"));
    }

    pub fn send_raw(&self, text: &str) {
        let frame = match self.deflate.lock().as_mut() {
            Some(compress) => Frame::Binary(deflate(compress, text)),
            None => Frame::Text(text.to_string()),
        };
        let _ = self.to_client.send(Ok(frame));
    }

    /// Send one compressed message across two binary frames
    pub fn send_split(&self, message: &GatewayMessage) {
        let text = message.to_json().expect("encode frame");
        let bytes = {
            let mut deflate_state = self.deflate.lock();
            let compress = deflate_state.as_mut().expect("compression not enabled");
            deflate(compress, &text)
        };
        let (head, tail) = bytes.split_at(bytes.len() / 2);
        let _ = self.to_client.send(Ok(Frame::Binary(head.to_vec())));
        let _ = self.to_client.send(Ok(Frame::Binary(tail.to_vec())));
    }

    pub fn hello(&self, interval_ms: u64) {
        self.send(&GatewayMessage::hello(interval_ms));
    }

    pub fn ack(&self) {
        self.send(&GatewayMessage::heartbeat_ack());
    }

    pub fn dispatch(&self, name: &str, seq: u64, data: Value) {
        self.send(&GatewayMessage::dispatch(name, seq, data));
    }

    /// Close from the remote side
    pub fn close(&self, code: u16) {
        let _ = self.to_client.send(Ok(Frame::Close(Some(code))));
    }

    /// Next frame the shard sent; `None` once the shard dropped the stream
    pub async fn next(&mut self) -> Option<Sent> {
        tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("shard went silent")
    }

    /// Next message with `op`, skipping heartbeats unless asked for one
    pub async fn expect_op(&mut self, op: OpCode) -> GatewayMessage {
        loop {
            match self.next().await {
                Some(Sent::Message(message)) if message.op == op => return message,
                Some(Sent::Message(message)) if message.op == OpCode::Heartbeat => {}
                other => panic!("expected {op}, got {other:?}"),
            }
        }
    }

    /// Skip messages until the shard closes the stream
    pub async fn expect_close(&mut self) -> u16 {
        loop {
            match self.next().await {
                Some(Sent::Close(code)) => return code,
                Some(Sent::Message(_)) => {}
                None => panic!("stream dropped without a close frame"),
            }
        }
    }

    /// HELLO, IDENTIFY and READY
    pub async fn handshake(&mut self, session_id: &str) -> GatewayMessage {
        self.hello(crate::fixtures::HEARTBEAT_INTERVAL_MS);
        let identify = self.expect_op(OpCode::Identify).await;
        self.dispatch("READY", 1, crate::fixtures::ready(session_id, &[]));
        identify
    }
}

// ============================================================================
// Single shard harness
// ============================================================================

/// One `ShardConnection` running against a `MockGateway`
pub struct ShardHarness {
    pub gateway: Arc<MockGateway>,
    pub acceptor: MockAcceptor,
    pub state: Arc<ShardState>,
    pub handle: ShardHandle,
    pub cache: Arc<ClientCache>,
    pub events: Arc<EventDispatcher>,
    pub task: JoinHandle<GatewayResult<()>>,
    shutdown: watch::Sender<bool>,
}

impl ShardHarness {
    pub fn spawn(config: ClientConfig) -> Self {
        let (gateway, acceptor) = MockGateway::new();
        let cache = ClientCache::new_shared(&config.cache);
        let events = EventDispatcher::new_shared();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (ready, _) = watch::channel(0u32);

        let state = Arc::new(ShardState::new(0, 1));
        let (handle, commands) = ShardHandle::new(Arc::clone(&state), &config.gateway);

        let ctx = ShardContext {
            identify: IdentifyCoordinator::new_shared(1, config.gateway.identify_window()),
            close_codes: Arc::new(CloseCodeTable::new(config.gateway.close_code_overrides.clone())),
            config: Arc::new(config),
            gateway_url: MOCK_GATEWAY_URL.to_string(),
            transport: Arc::clone(&gateway) as Arc<dyn GatewayTransport>,
            cache: Arc::clone(&cache),
            events: Arc::clone(&events),
            ready: Arc::new(ready),
        };
        let connection = ShardConnection::new(ctx, Arc::clone(&state), commands, shutdown_rx);
        let task = tokio::spawn(connection.run());

        Self {
            gateway,
            acceptor,
            state,
            handle,
            cache,
            events,
            task,
            shutdown,
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub async fn accept(&mut self) -> MockConnection {
        self.acceptor.accept().await
    }

    pub async fn command(&self, command: GatewayCommand) {
        self.handle.send(command).await.expect("queue command");
    }
}

/// Deflate one message and sync-flush, as the remote does per message
fn deflate(compress: &mut Compress, text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 64);
    compress
        .compress_vec(text.as_bytes(), &mut out, FlushCompress::Sync)
        .expect("deflate frame");
    out
}

/// Poll until `f` holds, letting the runtime (and paused clock) advance
pub async fn eventually(mut f: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ============================================================================
// HTTP transport
// ============================================================================

/// A request as it reached the transport
#[derive(Debug, Clone)]
pub struct Received {
    pub at: Instant,
    pub method: Method,
    pub path: String,
    pub request: HttpRequest,
}

/// Answers from per-route queues; unscripted routes get `200 {}`
#[derive(Default)]
pub struct MockHttp {
    responses: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
    delays: Mutex<HashMap<String, Duration>>,
    received: Mutex<Vec<Received>>,
}

impl MockHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, method: Method, path: &str, response: HttpResponse) {
        self.responses
            .lock()
            .entry(key(&method, path))
            .or_default()
            .push_back(response);
    }

    /// Hold every response for a route by `delay`
    pub fn delay(&self, method: Method, path: &str, delay: Duration) {
        self.delays.lock().insert(key(&method, path), delay);
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().clone()
    }

    /// Arrival times of requests for one route
    pub fn arrivals(&self, method: &Method, path: &str) -> Vec<Instant> {
        self.received
            .lock()
            .iter()
            .filter(|r| r.method == *method && r.path == path)
            .map(|r| r.at)
            .collect()
    }

    /// Dispatcher over this transport with default REST settings
    pub fn dispatcher(self: &Arc<Self>, config: &ClientConfig) -> Arc<RequestDispatcher> {
        let mut rest = config.rest.clone();
        rest.api_base_url = MOCK_API_BASE.to_string();
        Arc::new(RequestDispatcher::with_transport(
            Arc::clone(self) as Arc<dyn HttpTransport>,
            config.token.clone(),
            rest,
        ))
    }
}

#[async_trait]
impl HttpTransport for MockHttp {
    async fn send(&self, request: HttpRequest) -> RestResult<HttpResponse> {
        let path = request
            .url
            .strip_prefix(MOCK_API_BASE)
            .unwrap_or(&request.url)
            .to_string();
        let key = key(&request.method, &path);

        self.received.lock().push(Received {
            at: Instant::now(),
            method: request.method.clone(),
            path,
            request,
        });

        let delay = self.delays.lock().get(&key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = self
            .responses
            .lock()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        Ok(response.unwrap_or_else(|| http_response(200, &[], "{}")))
    }
}

fn key(method: &Method, path: &str) -> String {
    format!("{method} {path}")
}

/// Manager over a scripted gateway and REST transport
pub fn manager(config: ClientConfig) -> (Arc<ShardManager>, MockAcceptor, Arc<MockHttp>) {
    let http = MockHttp::new();
    let rest = http.dispatcher(&config);
    let (gateway, acceptor) = MockGateway::new();
    let manager = ShardManager::with_transports(config, rest, gateway);
    (manager, acceptor, http)
}
