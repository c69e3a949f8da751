//! # pylon-core
//!
//! Domain layer shared by the cache, REST and gateway crates: snowflake ids,
//! gateway intents, the entity records kept in the cache, and the typed
//! payloads decoded from dispatch frames.
//! This crate has no runtime or network dependencies.

pub mod entities;
pub mod error;
pub mod events;
pub mod traits;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use entities::{Channel, Emoji, Fields, Guild, Member, PrivateChannel, Role, User};
pub use error::ModelError;
pub use events::{
    ChannelPayload, DispatchEvent, EmojisUpdatePayload, EventKind, GuildDeletePayload,
    GuildPayload, MemberPayload, MemberRemovePayload, MembersChunkPayload, MessageDeletePayload,
    MessagePayload, PresencePayload, ReadyPayload, RoleDeletePayload, RolePayload, TypingPayload,
};
pub use traits::{HasId, HasName, HasTimestamp};
pub use value_objects::{Intents, Snowflake, SnowflakeParseError};
