//! Model errors - failures decoding dispatch payloads into typed records

use thiserror::Error;

/// Decoding errors for dispatch payloads
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Malformed {event} payload: {source}")]
    MalformedPayload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing payload for {0}")]
    MissingPayload(&'static str),
}

impl ModelError {
    /// Name of the dispatch event that failed to decode
    pub fn event(&self) -> &'static str {
        match self {
            Self::MalformedPayload { event, .. } | Self::MissingPayload(event) => event,
        }
    }
}
