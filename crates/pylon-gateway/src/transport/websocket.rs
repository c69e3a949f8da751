//! WebSocket transport over tokio-tungstenite

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{Frame, GatewayStream, GatewayTransport};
use crate::error::{GatewayError, GatewayResult};

/// Connects with `tokio_tungstenite::connect_async`
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl GatewayTransport for WsTransport {
    async fn connect(&self, url: &str) -> GatewayResult<Box<dyn GatewayStream>> {
        let (inner, response) = connect_async(url).await.map_err(GatewayError::transport)?;
        tracing::debug!(url = %url, status = %response.status(), "Gateway stream opened");
        Ok(Box::new(WsStream { inner }))
    }
}

pub struct WsStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl GatewayStream for WsStream {
    async fn send(&mut self, text: String) -> GatewayResult<()> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(GatewayError::transport)
    }

    async fn recv(&mut self) -> Option<GatewayResult<Frame>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(GatewayError::transport(e))),
            };

            match message {
                Message::Text(text) => return Some(Ok(Frame::Text(text))),
                Message::Binary(bytes) => return Some(Ok(Frame::Binary(bytes))),
                Message::Close(frame) => {
                    return Some(Ok(Frame::Close(frame.map(|f| u16::from(f.code)))));
                }
                // Pings are answered by tungstenite on the next write
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    tracing::trace!("Control frame received");
                }
            }
        }
    }

    async fn close(&mut self, code: u16) -> GatewayResult<()> {
        let frame = CloseFrame {
            code: WsCloseCode::from(code),
            reason: "".into(),
        };
        self.inner
            .close(Some(frame))
            .await
            .map_err(GatewayError::transport)
    }
}
