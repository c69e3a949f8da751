//! REST error types

use std::time::Duration;

use pylon_common::ClientError;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Rate limited on {bucket} for {retry_after:?} (global: {global})")]
    RateLimited {
        bucket: String,
        retry_after: Duration,
        global: bool,
    },

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("Request dispatcher is closed")]
    Closed,

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RestError {
    /// Check if another attempt may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status, when the remote answered
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RestError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<RestError> for ClientError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Http { status: 401, body } => ClientError::AuthFatal(body),
            RestError::Http { status, body } if status >= 500 => {
                ClientError::TransientNetwork(format!("HTTP {status}: {body}"))
            }
            RestError::Http { status, body } => ClientError::Request {
                status,
                message: body,
            },
            RestError::RateLimited {
                retry_after,
                global,
                ..
            } => ClientError::RateLimited {
                retry_after,
                global,
            },
            RestError::Closed => ClientError::Shutdown,
            RestError::Decode(e) => ClientError::protocol(e, false),
            other @ (RestError::Transport(_) | RestError::Exhausted { .. }) => {
                ClientError::transient(other)
            }
        }
    }
}

pub type RestResult<T> = Result<T, RestError>;
