//! Gateway stream transport
//!
//! Shards talk to a `GatewayStream` opened by a `GatewayTransport`. The
//! production transport is a tokio-tungstenite WebSocket; tests substitute
//! a scripted one.

mod compression;
mod websocket;

use async_trait::async_trait;

use crate::error::GatewayResult;

pub use compression::{ZlibInflater, ZLIB_SUFFIX};
pub use websocket::{WsStream, WsTransport};

/// A frame read from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A JSON text frame
    Text(String),
    /// A binary frame, zlib-stream compressed when compression is on
    Binary(Vec<u8>),
    /// The remote closed the stream, with its close code if one was sent
    Close(Option<u16>),
}

/// Opens gateway streams
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn connect(&self, url: &str) -> GatewayResult<Box<dyn GatewayStream>>;
}

/// An open gateway stream
///
/// `recv` must be cancel-safe: shards poll it inside `select!` next to
/// their heartbeat timer.
#[async_trait]
pub trait GatewayStream: Send {
    async fn send(&mut self, text: String) -> GatewayResult<()>;

    /// Next frame, or `None` once the stream has ended
    async fn recv(&mut self) -> Option<GatewayResult<Frame>>;

    /// Close the stream with a close code
    async fn close(&mut self, code: u16) -> GatewayResult<()>;
}
