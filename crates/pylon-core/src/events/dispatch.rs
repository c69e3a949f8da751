//! Typed dispatch payloads
//!
//! Decodes the `d` field of a dispatch frame into a `DispatchEvent`. Only
//! the fields the cache needs are named; everything else is kept in the
//! flattened field maps so merges never lose data.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::EventKind;
use crate::entities::{Channel, Emoji, Guild, Member, PrivateChannel, Role, User};
use crate::error::ModelError;
use crate::value_objects::Snowflake;

/// READY - sent once a fresh session is established
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    pub user: User,
    /// Guilds that will follow as GUILD_CREATE
    #[serde(default)]
    pub guilds: Vec<GuildDeletePayload>,
    #[serde(default)]
    pub private_channels: Vec<ChannelPayload>,
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}

/// GUILD_CREATE / GUILD_UPDATE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildPayload {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub members: Vec<MemberPayload>,
    #[serde(default)]
    pub emojis: Vec<Emoji>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl GuildPayload {
    /// The guild record without its sub-collections
    pub fn guild(&self) -> Guild {
        Guild::new(self.id, self.fields.clone())
    }
}

/// GUILD_DELETE, also used for the unavailable guild stubs in READY
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildDeletePayload {
    pub id: Snowflake,
    /// Set when the guild went down; absent when the client was removed
    #[serde(default)]
    pub unavailable: bool,
}

/// GUILD_ROLE_CREATE / GUILD_ROLE_UPDATE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePayload {
    pub guild_id: Snowflake,
    pub role: Role,
}

/// GUILD_ROLE_DELETE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDeletePayload {
    pub guild_id: Snowflake,
    pub role_id: Snowflake,
}

/// GUILD_MEMBER_ADD / GUILD_MEMBER_UPDATE, and members embedded in guilds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
    pub user: User,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl MemberPayload {
    /// The member record, referencing the user by id
    pub fn member(&self) -> Member {
        Member::new(self.user.id, self.fields.clone())
    }
}

/// GUILD_MEMBER_REMOVE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRemovePayload {
    pub guild_id: Snowflake,
    pub user: User,
}

/// GUILD_MEMBERS_CHUNK
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembersChunkPayload {
    pub guild_id: Snowflake,
    pub members: Vec<MemberPayload>,
    #[serde(default)]
    pub chunk_index: u32,
    #[serde(default)]
    pub chunk_count: u32,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// GUILD_EMOJIS_UPDATE - the full replacement emoji list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmojisUpdatePayload {
    pub guild_id: Snowflake,
    pub emojis: Vec<Emoji>,
}

/// CHANNEL_CREATE / CHANNEL_UPDATE / CHANNEL_DELETE
///
/// Carries a guild channel when `guild_id` is set, a private channel otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPayload {
    pub id: Snowflake,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<User>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ChannelPayload {
    /// Check whether this is a private channel
    #[inline]
    pub fn is_private(&self) -> bool {
        self.guild_id.is_none()
    }

    pub fn channel(&self) -> Channel {
        Channel {
            id: self.id,
            guild_id: self.guild_id,
            fields: self.fields.clone(),
        }
    }

    pub fn private_channel(&self) -> PrivateChannel {
        PrivateChannel::new(
            self.id,
            self.recipients.iter().map(|user| user.id).collect(),
            self.fields.clone(),
        )
    }
}

/// MESSAGE_CREATE / MESSAGE_UPDATE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<Snowflake>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<User>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// MESSAGE_DELETE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDeletePayload {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

/// PRESENCE_UPDATE - `user` is partial, usually only an id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user: User,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// TYPING_START
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingPayload {
    pub channel_id: Snowflake,
    pub user_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub timestamp: u64,
}

/// A decoded dispatch payload
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    Ready(ReadyPayload),
    Resumed,
    GuildCreate(GuildPayload),
    GuildUpdate(GuildPayload),
    GuildDelete(GuildDeletePayload),
    GuildRoleCreate(RolePayload),
    GuildRoleUpdate(RolePayload),
    GuildRoleDelete(RoleDeletePayload),
    GuildMemberAdd(MemberPayload),
    GuildMemberUpdate(MemberPayload),
    GuildMemberRemove(MemberRemovePayload),
    GuildMembersChunk(MembersChunkPayload),
    GuildEmojisUpdate(EmojisUpdatePayload),
    ChannelCreate(ChannelPayload),
    ChannelUpdate(ChannelPayload),
    ChannelDelete(ChannelPayload),
    MessageCreate(MessagePayload),
    MessageUpdate(MessagePayload),
    MessageDelete(MessageDeletePayload),
    PresenceUpdate(PresencePayload),
    TypingStart(TypingPayload),
    UserUpdate(User),
}

fn decode<T: DeserializeOwned>(kind: EventKind, data: &Value) -> Result<T, ModelError> {
    T::deserialize(data).map_err(|source| ModelError::MalformedPayload {
        event: kind.as_str(),
        source,
    })
}

impl DispatchEvent {
    /// Decode a dispatch payload by event name
    ///
    /// Returns `Ok(None)` for names without a typed mapping.
    pub fn parse(name: &str, data: &Value) -> Result<Option<Self>, ModelError> {
        let Some(kind) = EventKind::from_str(name) else {
            return Ok(None);
        };

        let event = match kind {
            EventKind::Ready => Self::Ready(decode(kind, data)?),
            EventKind::Resumed => Self::Resumed,
            EventKind::GuildCreate => Self::GuildCreate(decode(kind, data)?),
            EventKind::GuildUpdate => Self::GuildUpdate(decode(kind, data)?),
            EventKind::GuildDelete => Self::GuildDelete(decode(kind, data)?),
            EventKind::GuildRoleCreate => Self::GuildRoleCreate(decode(kind, data)?),
            EventKind::GuildRoleUpdate => Self::GuildRoleUpdate(decode(kind, data)?),
            EventKind::GuildRoleDelete => Self::GuildRoleDelete(decode(kind, data)?),
            EventKind::GuildMemberAdd => Self::GuildMemberAdd(decode(kind, data)?),
            EventKind::GuildMemberUpdate => Self::GuildMemberUpdate(decode(kind, data)?),
            EventKind::GuildMemberRemove => Self::GuildMemberRemove(decode(kind, data)?),
            EventKind::GuildMembersChunk => Self::GuildMembersChunk(decode(kind, data)?),
            EventKind::GuildEmojisUpdate => Self::GuildEmojisUpdate(decode(kind, data)?),
            EventKind::ChannelCreate => Self::ChannelCreate(decode(kind, data)?),
            EventKind::ChannelUpdate => Self::ChannelUpdate(decode(kind, data)?),
            EventKind::ChannelDelete => Self::ChannelDelete(decode(kind, data)?),
            EventKind::MessageCreate => Self::MessageCreate(decode(kind, data)?),
            EventKind::MessageUpdate => Self::MessageUpdate(decode(kind, data)?),
            EventKind::MessageDelete => Self::MessageDelete(decode(kind, data)?),
            EventKind::PresenceUpdate => Self::PresenceUpdate(decode(kind, data)?),
            EventKind::TypingStart => Self::TypingStart(decode(kind, data)?),
            EventKind::UserUpdate => Self::UserUpdate(decode(kind, data)?),
            EventKind::ShardReady
            | EventKind::Raw
            | EventKind::GuildAvailable
            | EventKind::GuildJoin
            | EventKind::GuildUnavailable
            | EventKind::GuildLeave => return Ok(None),
        };

        Ok(Some(event))
    }

    /// The kind tag of this event
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ready(_) => EventKind::Ready,
            Self::Resumed => EventKind::Resumed,
            Self::GuildCreate(_) => EventKind::GuildCreate,
            Self::GuildUpdate(_) => EventKind::GuildUpdate,
            Self::GuildDelete(_) => EventKind::GuildDelete,
            Self::GuildRoleCreate(_) => EventKind::GuildRoleCreate,
            Self::GuildRoleUpdate(_) => EventKind::GuildRoleUpdate,
            Self::GuildRoleDelete(_) => EventKind::GuildRoleDelete,
            Self::GuildMemberAdd(_) => EventKind::GuildMemberAdd,
            Self::GuildMemberUpdate(_) => EventKind::GuildMemberUpdate,
            Self::GuildMemberRemove(_) => EventKind::GuildMemberRemove,
            Self::GuildMembersChunk(_) => EventKind::GuildMembersChunk,
            Self::GuildEmojisUpdate(_) => EventKind::GuildEmojisUpdate,
            Self::ChannelCreate(_) => EventKind::ChannelCreate,
            Self::ChannelUpdate(_) => EventKind::ChannelUpdate,
            Self::ChannelDelete(_) => EventKind::ChannelDelete,
            Self::MessageCreate(_) => EventKind::MessageCreate,
            Self::MessageUpdate(_) => EventKind::MessageUpdate,
            Self::MessageDelete(_) => EventKind::MessageDelete,
            Self::PresenceUpdate(_) => EventKind::PresenceUpdate,
            Self::TypingStart(_) => EventKind::TypingStart,
            Self::UserUpdate(_) => EventKind::UserUpdate,
        }
    }

    /// Guild the event belongs to, if any
    pub fn guild_id(&self) -> Option<Snowflake> {
        match self {
            Self::GuildCreate(p) | Self::GuildUpdate(p) => Some(p.id),
            Self::GuildDelete(p) => Some(p.id),
            Self::GuildRoleCreate(p) | Self::GuildRoleUpdate(p) => Some(p.guild_id),
            Self::GuildRoleDelete(p) => Some(p.guild_id),
            Self::GuildMemberAdd(p) | Self::GuildMemberUpdate(p) => p.guild_id,
            Self::GuildMemberRemove(p) => Some(p.guild_id),
            Self::GuildMembersChunk(p) => Some(p.guild_id),
            Self::GuildEmojisUpdate(p) => Some(p.guild_id),
            Self::ChannelCreate(p) | Self::ChannelUpdate(p) | Self::ChannelDelete(p) => p.guild_id,
            Self::MessageCreate(p) | Self::MessageUpdate(p) => p.guild_id,
            Self::MessageDelete(p) => p.guild_id,
            Self::PresenceUpdate(p) => p.guild_id,
            Self::TypingStart(p) => p.guild_id,
            Self::Ready(_) | Self::Resumed | Self::UserUpdate(_) => None,
        }
    }
}
