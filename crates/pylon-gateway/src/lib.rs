//! # pylon-gateway
//!
//! Sharded gateway sessions: protocol codec, handshake and heartbeat
//! state machine, cross-shard identify gate, shard supervision and
//! typed event fan-out.

pub mod error;
pub mod events;
pub mod identify;
pub mod manager;
pub mod protocol;
pub mod shard;
pub mod transport;

pub use error::{GatewayError, GatewayResult};
pub use events::{Event, EventDispatcher, EventListener, FnListener};
pub use identify::IdentifyCoordinator;
pub use manager::{ShardFailure, ShardManager};
pub use protocol::{
    CloseClass, CloseCode, CloseCodeTable, FatalReason, GatewayMessage, OpCode,
    PresenceUpdatePayload, RequestGuildMembersPayload,
};
pub use shard::{
    GatewayCommand, SessionEnd, ShardConnection, ShardContext, ShardHandle, ShardSnapshot,
    ShardState, ShardStatus,
};
pub use transport::{Frame, GatewayStream, GatewayTransport, WsTransport, ZlibInflater, ZLIB_SUFFIX};
