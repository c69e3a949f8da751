//! Shards: one gateway session each

mod connection;
mod handle;
mod heartbeat;
mod state;

pub use connection::{SessionEnd, ShardConnection, ShardContext};
pub use handle::{GatewayCommand, ShardHandle};
pub use heartbeat::{Beat, Heartbeater, MAX_HEARTBEAT_INTERVAL};
pub use state::{Handshake, ShardSnapshot, ShardState, ShardStatus};
