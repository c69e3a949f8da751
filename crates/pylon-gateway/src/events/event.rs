//! Events handed to listeners

use chrono::{DateTime, Utc};
use pylon_core::{DispatchEvent, EventKind};
use serde_json::{json, Value};

/// A dispatch received by a shard, after the cache has applied it
#[derive(Debug, Clone)]
pub struct Event {
    /// Dispatch name as sent by the remote (`t`)
    pub name: String,
    pub shard_id: u32,
    /// Typed kind, `None` for names without a typed mapping
    pub kind: Option<EventKind>,
    /// Receipt order across all shards, assigned by the dispatcher
    pub sequence: u64,
    /// Sequence number on the shard's session (`s`)
    pub gateway_sequence: Option<u64>,
    pub received_at: DateTime<Utc>,
    pub payload: Option<DispatchEvent>,
    /// Raw `d` field
    pub data: Value,
}

impl Event {
    /// Build from a dispatch frame
    pub fn dispatch(
        shard_id: u32,
        name: impl Into<String>,
        gateway_sequence: Option<u64>,
        payload: Option<DispatchEvent>,
        data: Value,
    ) -> Self {
        Self {
            name: name.into(),
            shard_id,
            kind: payload.as_ref().map(DispatchEvent::kind),
            sequence: 0,
            gateway_sequence,
            received_at: Utc::now(),
            payload,
            data,
        }
    }

    /// Synthetic event emitted the first time a shard reaches Ready
    pub fn shard_ready(shard_id: u32, shard_count: u32) -> Self {
        Self {
            name: EventKind::ShardReady.as_str().to_string(),
            shard_id,
            kind: Some(EventKind::ShardReady),
            sequence: 0,
            gateway_sequence: None,
            received_at: Utc::now(),
            payload: None,
            data: json!({ "shard_id": shard_id, "shard_count": shard_count }),
        }
    }

    /// Guild lifecycle event derived from a GUILD_CREATE or GUILD_DELETE
    ///
    /// Carries the source frame's payload and data under the derived name.
    pub fn guild_lifecycle(source: &Event, kind: EventKind) -> Self {
        Self {
            name: kind.as_str().to_string(),
            shard_id: source.shard_id,
            kind: Some(kind),
            sequence: 0,
            gateway_sequence: source.gateway_sequence,
            received_at: source.received_at,
            payload: source.payload.clone(),
            data: source.data.clone(),
        }
    }

    /// Check if the event was produced locally rather than received
    pub fn is_synthetic(&self) -> bool {
        self.kind.is_some_and(EventKind::is_synthetic)
    }
}
