//! Gateway error types

use pylon_common::ClientError;
use pylon_rest::RestError;
use thiserror::Error;

use crate::protocol::FatalReason;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Connecting, reading or writing the stream failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// A frame could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The remote broke the protocol
    #[error("Protocol violation: {message}")]
    Protocol { message: String, fatal: bool },

    /// The remote closed with a code that must not be retried
    #[error("Closed with fatal code {code} ({reason})")]
    FatalClose { code: u16, reason: FatalReason },

    /// Gateway discovery failed
    #[error(transparent)]
    Rest(#[from] RestError),

    #[error("Shard {0} panicked")]
    Panicked(u32),

    #[error("Gateway is shutting down")]
    Shutdown,
}

impl GatewayError {
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol {
            message: msg.to_string(),
            fatal: false,
        }
    }

    /// Check if the shard must stop instead of reconnecting
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::FatalClose { .. } => true,
            Self::Protocol { fatal, .. } => *fatal,
            _ => false,
        }
    }
}

impl From<GatewayError> for ClientError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Transport(msg) => ClientError::TransientNetwork(msg),
            GatewayError::Codec(e) => ClientError::protocol(e, false),
            GatewayError::Protocol { message, fatal } => ClientError::ProtocolViolation { message, fatal },
            GatewayError::FatalClose {
                code,
                reason: FatalReason::Authentication,
            } => ClientError::AuthFatal(format!("gateway closed with {code}")),
            GatewayError::FatalClose {
                code,
                reason: FatalReason::Intents,
            } => ClientError::IntentsFatal(format!("gateway closed with {code}")),
            GatewayError::FatalClose { code, reason } => {
                ClientError::protocol(format!("gateway closed with {code} ({reason})"), true)
            }
            GatewayError::Rest(e) => e.into(),
            GatewayError::Panicked(id) => ClientError::protocol(format!("shard {id} panicked"), false),
            GatewayError::Shutdown => ClientError::Shutdown,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
