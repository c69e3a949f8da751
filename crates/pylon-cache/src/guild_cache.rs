//! Per-guild cache
//!
//! A `GuildCache` owns everything scoped to one guild. It is created from a
//! full GUILD_CREATE payload and dropped as a unit when the guild goes away.

use std::collections::HashMap;

use pylon_core::{Channel, Emoji, Fields, Guild, GuildPayload, Member, Role, Snowflake};

/// Cached state of a single available guild
#[derive(Debug, Clone)]
pub struct GuildCache {
    guild: Guild,
    roles: HashMap<Snowflake, Role>,
    members: HashMap<Snowflake, Member>,
    channels: HashMap<Snowflake, Channel>,
    emojis: HashMap<Snowflake, Emoji>,
}

impl GuildCache {
    /// Empty cache for a guild record
    pub fn new(guild: Guild) -> Self {
        Self {
            guild,
            roles: HashMap::new(),
            members: HashMap::new(),
            channels: HashMap::new(),
            emojis: HashMap::new(),
        }
    }

    /// Build from a full GUILD_CREATE payload
    ///
    /// Member users are not stored here; the caller registers them in the
    /// global user map.
    pub fn from_payload(payload: &GuildPayload) -> Self {
        let mut cache = Self::new(payload.guild());

        for role in &payload.roles {
            cache.roles.insert(role.id, role.clone());
        }
        for channel in &payload.channels {
            let mut channel = channel.clone();
            channel.guild_id = Some(payload.id);
            cache.channels.insert(channel.id, channel);
        }
        for member in &payload.members {
            cache.members.insert(member.user.id, member.member());
        }
        for emoji in &payload.emojis {
            cache.emojis.insert(emoji.id, emoji.clone());
        }

        cache
    }

    #[inline]
    pub fn id(&self) -> Snowflake {
        self.guild.id
    }

    #[inline]
    pub fn guild(&self) -> &Guild {
        &self.guild
    }

    /// Overlay changed guild fields
    pub fn merge_guild(&mut self, guild: &Guild) {
        self.guild.merge(&guild.fields);
    }

    // =========================================================================
    // Roles
    // =========================================================================

    pub fn role(&self, id: Snowflake) -> Option<&Role> {
        self.roles.get(&id)
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    /// Insert a new role or merge into the cached one
    pub fn upsert_role(&mut self, role: &Role) {
        match self.roles.get_mut(&role.id) {
            Some(cached) => cached.merge(&role.fields),
            None => {
                self.roles.insert(role.id, role.clone());
            }
        }
    }

    pub fn remove_role(&mut self, id: Snowflake) -> Option<Role> {
        self.roles.remove(&id)
    }

    // =========================================================================
    // Members
    // =========================================================================

    pub fn member(&self, user_id: Snowflake) -> Option<&Member> {
        self.members.get(&user_id)
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member_ids(&self) -> impl Iterator<Item = Snowflake> + '_ {
        self.members.keys().copied()
    }

    #[inline]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Insert a new member or merge into the cached one
    pub fn upsert_member(&mut self, member: &Member) {
        match self.members.get_mut(&member.user_id) {
            Some(cached) => cached.merge(&member.fields),
            None => {
                self.members.insert(member.user_id, member.clone());
            }
        }
    }

    pub fn remove_member(&mut self, user_id: Snowflake) -> Option<Member> {
        self.members.remove(&user_id)
    }

    // =========================================================================
    // Channels
    // =========================================================================

    pub fn channel(&self, id: Snowflake) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Insert a new channel or merge into the cached one
    pub fn upsert_channel(&mut self, channel: &Channel) {
        match self.channels.get_mut(&channel.id) {
            Some(cached) => cached.merge(&channel.fields),
            None => {
                self.channels.insert(channel.id, channel.clone());
            }
        }
    }

    pub fn remove_channel(&mut self, id: Snowflake) -> Option<Channel> {
        self.channels.remove(&id)
    }

    // =========================================================================
    // Emojis
    // =========================================================================

    pub fn emoji(&self, id: Snowflake) -> Option<&Emoji> {
        self.emojis.get(&id)
    }

    pub fn emojis(&self) -> impl Iterator<Item = &Emoji> {
        self.emojis.values()
    }

    /// Replace the emoji set; the remote always sends the full list
    pub fn replace_emojis(&mut self, emojis: &[Emoji]) {
        self.emojis = emojis.iter().map(|e| (e.id, e.clone())).collect();
    }
}
