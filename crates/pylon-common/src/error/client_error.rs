//! Client error taxonomy
//!
//! Every failure the client surfaces falls into one of the `ErrorKind`
//! classes. Components recover from what they can locally; only fatal
//! classes travel up to the shard manager.

use crate::config::ConfigError;
use std::fmt;
use std::time::Duration;

/// Failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Retried with backoff
    TransientNetwork,
    /// Retried after a scheduled delay
    RateLimited,
    /// Credentials rejected; stops the whole client
    AuthFatal,
    /// Requested intents rejected; the shard stops without retrying
    IntentsFatal,
    /// Unexpected frame or payload; reconnect once, then fatal
    ProtocolViolation,
    /// A listener errored or panicked; contained at the dispatch boundary
    ListenerFailure,
    /// The remote rejected a REST request (4xx other than 401/429)
    Request,
    /// Invalid configuration
    Config,
    /// The client is shutting down
    Shutdown,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient_network",
            Self::RateLimited => "rate_limited",
            Self::AuthFatal => "auth_fatal",
            Self::IntentsFatal => "intents_fatal",
            Self::ProtocolViolation => "protocol_violation",
            Self::ListenerFailure => "listener_failure",
            Self::Request => "request",
            Self::Config => "config",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-wide error type
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transient network failure: {0}")]
    TransientNetwork(String),

    #[error("Rate limited for {retry_after:?} (global: {global})")]
    RateLimited { retry_after: Duration, global: bool },

    #[error("Authentication failed: {0}")]
    AuthFatal(String),

    #[error("Intents rejected: {0}")]
    IntentsFatal(String),

    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String, fatal: bool },

    #[error("Listener for {event} failed: {message}")]
    ListenerFailure { event: String, message: String },

    #[error("Request rejected with status {status}: {message}")]
    Request { status: u16, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Client is shutting down")]
    Shutdown,
}

impl ClientError {
    /// Get the failure class
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransientNetwork(_) => ErrorKind::TransientNetwork,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::AuthFatal(_) => ErrorKind::AuthFatal,
            Self::IntentsFatal(_) => ErrorKind::IntentsFatal,
            Self::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
            Self::ListenerFailure { .. } => ErrorKind::ListenerFailure,
            Self::Request { .. } => ErrorKind::Request,
            Self::Config(_) => ErrorKind::Config,
            Self::Shutdown => ErrorKind::Shutdown,
        }
    }

    /// Get a stable error code for logs
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TransientNetwork(_) => "TRANSIENT_NETWORK",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::AuthFatal(_) => "AUTH_FATAL",
            Self::IntentsFatal(_) => "INTENTS_FATAL",
            Self::ProtocolViolation { fatal: true, .. } => "PROTOCOL_VIOLATION_FATAL",
            Self::ProtocolViolation { .. } => "PROTOCOL_VIOLATION",
            Self::ListenerFailure { .. } => "LISTENER_FAILURE",
            Self::Request { .. } => "REQUEST_REJECTED",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Shutdown => "SHUTDOWN",
        }
    }

    /// Check if the failure ends the component that raised it
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::AuthFatal(_) | Self::IntentsFatal(_) | Self::Config(_) => true,
            Self::ProtocolViolation { fatal, .. } => *fatal,
            _ => false,
        }
    }

    /// Check if the operation may succeed when retried
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::RateLimited { .. })
    }

    /// Check if the whole client must stop, not just one shard
    #[must_use]
    pub fn stops_client(&self) -> bool {
        matches!(self, Self::AuthFatal(_) | Self::Config(_))
    }

    /// Delay to honour before retrying, when the error carries one
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Create a transient network error
    #[must_use]
    pub fn transient(msg: impl fmt::Display) -> Self {
        Self::TransientNetwork(msg.to_string())
    }

    /// Create a protocol violation
    #[must_use]
    pub fn protocol(msg: impl fmt::Display, fatal: bool) -> Self {
        Self::ProtocolViolation {
            message: msg.to_string(),
            fatal,
        }
    }
}

/// Result type using `ClientError`
pub type ClientResult<T> = Result<T, ClientError>;
