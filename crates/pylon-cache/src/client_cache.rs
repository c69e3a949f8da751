//! Client-wide cache
//!
//! Holds every available guild (each with its own `GuildCache`), the global
//! user map, and a capacity-bounded LRU of private channels. Shards apply
//! decoded dispatch events through [`ClientCache::apply`] in arrival order,
//! before listeners see them.
//!
//! User retention: users are never removed as a side effect of a guild or
//! member going away; only their guild back-reference is dropped. Call
//! [`ClientCache::evict_orphaned_users`] to reclaim users that no cached
//! guild or private channel references anymore.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use pylon_common::CacheConfig;
use pylon_core::{
    ChannelPayload, DispatchEvent, EventKind, Fields, GuildDeletePayload, GuildPayload, MemberPayload,
    PrivateChannel, ReadyPayload, Snowflake, User,
};

use crate::guild_cache::GuildCache;
use crate::lru::LruMap;

/// A user plus the guilds it is known through
#[derive(Debug, Clone)]
pub struct CachedUser {
    pub user: User,
    pub guild_ids: BTreeSet<Snowflake>,
}

/// Entry counts, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub guilds: usize,
    pub unavailable_guilds: usize,
    pub users: usize,
    pub private_channels: usize,
}

/// Client-wide in-memory cache
pub struct ClientCache {
    guilds: DashMap<Snowflake, GuildCache>,
    unavailable: DashSet<Snowflake>,
    users: DashMap<Snowflake, CachedUser>,
    private_channels: Mutex<LruMap<Snowflake, PrivateChannel>>,
    current_user: RwLock<Option<User>>,
}

impl ClientCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_private_channel_capacity(config.private_channel_capacity)
    }

    pub fn with_private_channel_capacity(capacity: usize) -> Self {
        Self {
            guilds: DashMap::new(),
            unavailable: DashSet::new(),
            users: DashMap::new(),
            private_channels: Mutex::new(LruMap::new(capacity)),
            current_user: RwLock::new(None),
        }
    }

    /// Create a new cache wrapped in Arc
    pub fn new_shared(config: &CacheConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    // =========================================================================
    // Event application
    // =========================================================================

    /// Apply a decoded dispatch event
    ///
    /// For GUILD_CREATE and GUILD_DELETE, returns the guild lifecycle kind
    /// implied by what the cache held before the event.
    pub fn apply(&self, event: &DispatchEvent) -> Option<EventKind> {
        match event {
            DispatchEvent::Ready(ready) => self.on_ready(ready),
            DispatchEvent::GuildCreate(payload) => return Some(self.on_guild_create(payload)),
            DispatchEvent::GuildUpdate(payload) => {
                let guild = payload.guild();
                self.with_guild_mut(payload.id, |cache| cache.merge_guild(&guild));
            }
            DispatchEvent::GuildDelete(payload) => return Some(self.on_guild_delete(payload)),
            DispatchEvent::GuildRoleCreate(payload) | DispatchEvent::GuildRoleUpdate(payload) => {
                self.with_guild_mut(payload.guild_id, |cache| cache.upsert_role(&payload.role));
            }
            DispatchEvent::GuildRoleDelete(payload) => {
                self.with_guild_mut(payload.guild_id, |cache| {
                    cache.remove_role(payload.role_id);
                });
            }
            DispatchEvent::GuildMemberAdd(payload) | DispatchEvent::GuildMemberUpdate(payload) => {
                match payload.guild_id {
                    Some(guild_id) => self.upsert_member(guild_id, payload),
                    None => tracing::debug!(user_id = %payload.user.id, "Member payload without guild id"),
                }
            }
            DispatchEvent::GuildMemberRemove(payload) => {
                self.remove_member(payload.guild_id, payload.user.id);
            }
            DispatchEvent::GuildMembersChunk(chunk) => {
                for member in &chunk.members {
                    self.upsert_member(chunk.guild_id, member);
                }
            }
            DispatchEvent::GuildEmojisUpdate(payload) => {
                self.with_guild_mut(payload.guild_id, |cache| cache.replace_emojis(&payload.emojis));
            }
            DispatchEvent::ChannelCreate(payload) | DispatchEvent::ChannelUpdate(payload) => {
                match payload.guild_id {
                    Some(guild_id) => {
                        let channel = payload.channel();
                        self.with_guild_mut(guild_id, |cache| cache.upsert_channel(&channel));
                    }
                    None => self.upsert_private_channel(payload),
                }
            }
            DispatchEvent::ChannelDelete(payload) => match payload.guild_id {
                Some(guild_id) => {
                    self.with_guild_mut(guild_id, |cache| {
                        cache.remove_channel(payload.id);
                    });
                }
                None => {
                    self.private_channels.lock().remove(&payload.id);
                }
            },
            DispatchEvent::MessageCreate(message) => {
                if message.guild_id.is_none() {
                    self.private_channels.lock().touch(&message.channel_id);
                }
                if let Some(author) = &message.author {
                    self.merge_known_user(author);
                }
            }
            DispatchEvent::PresenceUpdate(presence) => self.merge_known_user(&presence.user),
            DispatchEvent::UserUpdate(user) => {
                if let Some(current) = self.current_user.write().as_mut() {
                    current.merge(&user.fields);
                }
                self.upsert_user(user, None);
            }
            DispatchEvent::Resumed
            | DispatchEvent::MessageUpdate(_)
            | DispatchEvent::MessageDelete(_)
            | DispatchEvent::TypingStart(_) => {}
        }
        None
    }

    fn on_ready(&self, ready: &ReadyPayload) {
        *self.current_user.write() = Some(ready.user.clone());
        self.upsert_user(&ready.user, None);

        for guild in &ready.guilds {
            if !self.guilds.contains_key(&guild.id) {
                self.unavailable.insert(guild.id);
            }
        }
        for channel in &ready.private_channels {
            self.upsert_private_channel(channel);
        }
    }

    fn on_guild_create(&self, payload: &GuildPayload) -> EventKind {
        if payload.unavailable {
            self.remove_guild(payload.id);
            self.unavailable.insert(payload.id);
            return EventKind::GuildUnavailable;
        }

        let cache = GuildCache::from_payload(payload);
        let member_ids: HashSet<Snowflake> = cache.member_ids().collect();
        for member in &payload.members {
            self.upsert_user(&member.user, Some(payload.id));
        }

        // A re-sent GUILD_CREATE replaces the old cache wholesale
        let previous = self.guilds.insert(payload.id, cache);
        let known = previous.is_some();
        if let Some(previous) = previous {
            for user_id in previous.member_ids().filter(|id| !member_ids.contains(id)) {
                self.drop_guild_ref(user_id, payload.id);
            }
        }
        let was_unavailable = self.unavailable.remove(&payload.id).is_some();

        tracing::trace!(guild_id = %payload.id, members = member_ids.len(), "Guild cached");
        if was_unavailable || known {
            EventKind::GuildAvailable
        } else {
            EventKind::GuildJoin
        }
    }

    fn on_guild_delete(&self, payload: &GuildDeletePayload) -> EventKind {
        self.remove_guild(payload.id);
        if payload.unavailable {
            self.unavailable.insert(payload.id);
            EventKind::GuildUnavailable
        } else {
            self.unavailable.remove(&payload.id);
            EventKind::GuildLeave
        }
    }

    /// Run `f` against a cached guild; returns false when it is not cached
    fn with_guild_mut(&self, guild_id: Snowflake, f: impl FnOnce(&mut GuildCache)) -> bool {
        match self.guilds.get_mut(&guild_id) {
            Some(mut cache) => {
                f(&mut cache);
                true
            }
            None => {
                tracing::debug!(guild_id = %guild_id, "Dropping update for uncached guild");
                false
            }
        }
    }

    fn upsert_member(&self, guild_id: Snowflake, payload: &MemberPayload) {
        let member = payload.member();
        if self.with_guild_mut(guild_id, |cache| cache.upsert_member(&member)) {
            self.upsert_user(&payload.user, Some(guild_id));
        }
    }

    fn remove_member(&self, guild_id: Snowflake, user_id: Snowflake) {
        self.with_guild_mut(guild_id, |cache| {
            cache.remove_member(user_id);
        });
        self.drop_guild_ref(user_id, guild_id);
    }

    /// Insert a user or merge into the cached one, adding a guild back-reference
    fn upsert_user(&self, user: &User, guild_id: Option<Snowflake>) {
        self.users
            .entry(user.id)
            .and_modify(|cached| {
                cached.user.merge(&user.fields);
                if let Some(guild_id) = guild_id {
                    cached.guild_ids.insert(guild_id);
                }
            })
            .or_insert_with(|| CachedUser {
                user: user.clone(),
                guild_ids: guild_id.into_iter().collect(),
            });
    }

    /// Merge partial user data into a user that is already cached
    fn merge_known_user(&self, user: &User) {
        if let Some(mut cached) = self.users.get_mut(&user.id) {
            cached.user.merge(&user.fields);
        }
    }

    fn drop_guild_ref(&self, user_id: Snowflake, guild_id: Snowflake) {
        if let Some(mut cached) = self.users.get_mut(&user_id) {
            cached.guild_ids.remove(&guild_id);
        }
    }

    fn upsert_private_channel(&self, payload: &ChannelPayload) {
        for recipient in &payload.recipients {
            self.upsert_user(recipient, None);
        }

        let mut channels = self.private_channels.lock();
        if let Some(cached) = channels.get_mut(&payload.id) {
            cached.merge(&payload.fields);
            if !payload.recipients.is_empty() {
                cached.recipient_ids = payload.recipients.iter().map(|u| u.id).collect();
            }
            return;
        }
        if let Some((evicted, _)) = channels.insert(payload.id, payload.private_channel()) {
            tracing::trace!(channel_id = %evicted, "Evicted least recently used private channel");
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Remove a guild and its back-references, returning its cache
    pub fn remove_guild(&self, guild_id: Snowflake) -> Option<GuildCache> {
        let (_, cache) = self.guilds.remove(&guild_id)?;
        for user_id in cache.member_ids() {
            self.drop_guild_ref(user_id, guild_id);
        }
        Some(cache)
    }

    /// Drop every guild routed to `shard_id`, ahead of a fresh session
    ///
    /// Returns the number of cached guilds removed.
    pub fn clear_shard(&self, shard_id: u32, shard_count: u32) -> usize {
        let owned: Vec<Snowflake> = self
            .guilds
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| id.shard_id(shard_count) == shard_id)
            .collect();

        for guild_id in &owned {
            self.remove_guild(*guild_id);
        }
        self.unavailable
            .retain(|id| id.shard_id(shard_count) != shard_id);

        tracing::debug!(shard_id, removed = owned.len(), "Cleared shard cache");
        owned.len()
    }

    /// Remove users with no guild back-reference and no private channel
    ///
    /// The current user is always kept. Returns the number removed.
    pub fn evict_orphaned_users(&self) -> usize {
        let recipients: HashSet<Snowflake> = self
            .private_channels
            .lock()
            .values()
            .flat_map(|channel| channel.recipient_ids.iter().copied())
            .collect();
        let current = self.current_user.read().as_ref().map(|user| user.id);

        let before = self.users.len();
        self.users.retain(|id, cached| {
            !cached.guild_ids.is_empty() || recipients.contains(id) || Some(*id) == current
        });
        let removed = before.saturating_sub(self.users.len());

        tracing::debug!(removed, "Evicted orphaned users");
        removed
    }

    /// Drop everything
    pub fn clear(&self) {
        self.guilds.clear();
        self.unavailable.clear();
        self.users.clear();
        self.private_channels.lock().clear();
        *self.current_user.write() = None;
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Run `f` against a cached guild
    pub fn with_guild<R>(&self, guild_id: Snowflake, f: impl FnOnce(&GuildCache) -> R) -> Option<R> {
        self.guilds.get(&guild_id).map(|cache| f(&cache))
    }

    /// Snapshot of a cached guild
    pub fn guild(&self, guild_id: Snowflake) -> Option<GuildCache> {
        self.with_guild(guild_id, Clone::clone)
    }

    pub fn guild_ids(&self) -> Vec<Snowflake> {
        self.guilds.iter().map(|entry| *entry.key()).collect()
    }

    pub fn is_unavailable(&self, guild_id: Snowflake) -> bool {
        self.unavailable.contains(&guild_id)
    }

    pub fn user(&self, user_id: Snowflake) -> Option<User> {
        self.users.get(&user_id).map(|cached| cached.user.clone())
    }

    /// Guilds the user is currently known through
    pub fn user_guilds(&self, user_id: Snowflake) -> Option<Vec<Snowflake>> {
        self.users
            .get(&user_id)
            .map(|cached| cached.guild_ids.iter().copied().collect())
    }

    /// Look up a private channel, marking it recently used
    pub fn private_channel(&self, channel_id: Snowflake) -> Option<PrivateChannel> {
        self.private_channels.lock().get(&channel_id).cloned()
    }

    /// Check for a private channel without touching its recency
    pub fn has_private_channel(&self, channel_id: Snowflake) -> bool {
        self.private_channels.lock().contains(&channel_id)
    }

    pub fn current_user(&self) -> Option<User> {
        self.current_user.read().clone()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            guilds: self.guilds.len(),
            unavailable_guilds: self.unavailable.len(),
            users: self.users.len(),
            private_channels: self.private_channels.lock().len(),
        }
    }
}

impl Default for ClientCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl std::fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCache")
            .field("stats", &self.stats())
            .finish()
    }
}
