//! Dispatch event kinds
//!
//! The names sent in the `t` field of dispatch frames, plus synthetic kinds
//! produced locally: `ShardReady`, `Raw`, and the guild lifecycle kinds the
//! cache derives from GUILD_CREATE and GUILD_DELETE.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Event kinds understood by the typed dispatch path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    // Connection events
    /// Sent after a successful Identify
    Ready,
    /// Sent after a successful Resume
    Resumed,

    // Guild events
    GuildCreate,
    GuildUpdate,
    /// Left guild, kicked, or guild became unavailable
    GuildDelete,
    GuildRoleCreate,
    GuildRoleUpdate,
    GuildRoleDelete,
    GuildMemberAdd,
    GuildMemberUpdate,
    GuildMemberRemove,
    /// Response to a RequestGuildMembers command
    GuildMembersChunk,
    GuildEmojisUpdate,

    // Channel events
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,

    // Message events
    MessageCreate,
    MessageUpdate,
    MessageDelete,

    // Presence events
    PresenceUpdate,
    TypingStart,

    // User events
    /// Current user updated
    UserUpdate,

    // Synthetic events
    /// A shard reached Ready for the first time and its guilds streamed in
    ShardReady,
    /// GUILD_CREATE for a guild that was unavailable or already cached
    GuildAvailable,
    /// GUILD_CREATE for a guild the client was just added to
    GuildJoin,
    /// GUILD_DELETE (or GUILD_CREATE) marking a guild unavailable
    GuildUnavailable,
    /// GUILD_DELETE after the client was removed from a guild
    GuildLeave,
    /// Every dispatch frame, including names without a typed mapping
    Raw,
}

impl EventKind {
    /// Get the wire name of the event kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Resumed => "RESUMED",
            Self::GuildCreate => "GUILD_CREATE",
            Self::GuildUpdate => "GUILD_UPDATE",
            Self::GuildDelete => "GUILD_DELETE",
            Self::GuildRoleCreate => "GUILD_ROLE_CREATE",
            Self::GuildRoleUpdate => "GUILD_ROLE_UPDATE",
            Self::GuildRoleDelete => "GUILD_ROLE_DELETE",
            Self::GuildMemberAdd => "GUILD_MEMBER_ADD",
            Self::GuildMemberUpdate => "GUILD_MEMBER_UPDATE",
            Self::GuildMemberRemove => "GUILD_MEMBER_REMOVE",
            Self::GuildMembersChunk => "GUILD_MEMBERS_CHUNK",
            Self::GuildEmojisUpdate => "GUILD_EMOJIS_UPDATE",
            Self::ChannelCreate => "CHANNEL_CREATE",
            Self::ChannelUpdate => "CHANNEL_UPDATE",
            Self::ChannelDelete => "CHANNEL_DELETE",
            Self::MessageCreate => "MESSAGE_CREATE",
            Self::MessageUpdate => "MESSAGE_UPDATE",
            Self::MessageDelete => "MESSAGE_DELETE",
            Self::PresenceUpdate => "PRESENCE_UPDATE",
            Self::TypingStart => "TYPING_START",
            Self::UserUpdate => "USER_UPDATE",
            Self::ShardReady => "SHARD_READY",
            Self::GuildAvailable => "GUILD_AVAILABLE",
            Self::GuildJoin => "GUILD_JOIN",
            Self::GuildUnavailable => "GUILD_UNAVAILABLE",
            Self::GuildLeave => "GUILD_LEAVE",
            Self::Raw => "RAW",
        }
    }

    /// Parse a wire event name
    ///
    /// Synthetic kinds never arrive on the wire and are not matched.
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "READY" => Some(Self::Ready),
            "RESUMED" => Some(Self::Resumed),
            "GUILD_CREATE" => Some(Self::GuildCreate),
            "GUILD_UPDATE" => Some(Self::GuildUpdate),
            "GUILD_DELETE" => Some(Self::GuildDelete),
            "GUILD_ROLE_CREATE" => Some(Self::GuildRoleCreate),
            "GUILD_ROLE_UPDATE" => Some(Self::GuildRoleUpdate),
            "GUILD_ROLE_DELETE" => Some(Self::GuildRoleDelete),
            "GUILD_MEMBER_ADD" => Some(Self::GuildMemberAdd),
            "GUILD_MEMBER_UPDATE" => Some(Self::GuildMemberUpdate),
            "GUILD_MEMBER_REMOVE" => Some(Self::GuildMemberRemove),
            "GUILD_MEMBERS_CHUNK" => Some(Self::GuildMembersChunk),
            "GUILD_EMOJIS_UPDATE" => Some(Self::GuildEmojisUpdate),
            "CHANNEL_CREATE" => Some(Self::ChannelCreate),
            "CHANNEL_UPDATE" => Some(Self::ChannelUpdate),
            "CHANNEL_DELETE" => Some(Self::ChannelDelete),
            "MESSAGE_CREATE" => Some(Self::MessageCreate),
            "MESSAGE_UPDATE" => Some(Self::MessageUpdate),
            "MESSAGE_DELETE" => Some(Self::MessageDelete),
            "PRESENCE_UPDATE" => Some(Self::PresenceUpdate),
            "TYPING_START" => Some(Self::TypingStart),
            "USER_UPDATE" => Some(Self::UserUpdate),
            _ => None,
        }
    }

    /// Check if this kind is produced locally rather than received
    #[must_use]
    pub const fn is_synthetic(self) -> bool {
        matches!(
            self,
            Self::ShardReady
                | Self::Raw
                | Self::GuildAvailable
                | Self::GuildJoin
                | Self::GuildUnavailable
                | Self::GuildLeave
        )
    }

    /// Check if this is a guild-related event
    #[must_use]
    pub const fn is_guild_event(self) -> bool {
        matches!(
            self,
            Self::GuildCreate
                | Self::GuildUpdate
                | Self::GuildDelete
                | Self::GuildRoleCreate
                | Self::GuildRoleUpdate
                | Self::GuildRoleDelete
                | Self::GuildMemberAdd
                | Self::GuildMemberUpdate
                | Self::GuildMemberRemove
                | Self::GuildMembersChunk
                | Self::GuildEmojisUpdate
                | Self::GuildAvailable
                | Self::GuildJoin
                | Self::GuildUnavailable
                | Self::GuildLeave
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AsRef<str> for EventKind {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
