//! Dispatch events - kinds and typed payloads

mod dispatch;
mod kind;

pub use dispatch::{
    ChannelPayload, DispatchEvent, EmojisUpdatePayload, GuildDeletePayload, GuildPayload,
    MemberPayload, MemberRemovePayload, MembersChunkPayload, MessageDeletePayload, MessagePayload,
    PresencePayload, ReadyPayload, RoleDeletePayload, RolePayload, TypingPayload,
};
pub use kind::EventKind;
