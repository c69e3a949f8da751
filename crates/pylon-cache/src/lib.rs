//! # pylon-cache
//!
//! In-memory cache kept consistent with the gateway event stream.
//!
//! - `ClientCache`: guild map, global user map, private channel LRU
//! - `GuildCache`: roles, members, channels and emoji of one guild
//! - `LruMap`: the capacity-bounded map behind private channels

pub mod client_cache;
pub mod guild_cache;
pub mod lru;

pub use client_cache::{CacheStats, CachedUser, ClientCache};
pub use guild_cache::GuildCache;
pub use lru::LruMap;
