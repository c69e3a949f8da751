//! Cache consistency as frames stream through a shard
//!
//! Run with: cargo test -p integration-tests --test cache_tests

use integration_tests::{eventually, fixtures::*, ShardHarness};
use pylon_core::Snowflake;
use pylon_gateway::{OpCode, ShardStatus};
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn test_257th_private_channel_evicts_least_recent() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut conn = shard.accept().await;
    conn.handshake("s").await;

    let mut seq = 1;
    for id in 1..=256 {
        seq += 1;
        conn.dispatch("CHANNEL_CREATE", seq, private_channel(id, 1_000));
    }
    // Channel 1 becomes the most recent, leaving 2 as the eviction candidate
    seq += 1;
    conn.dispatch("MESSAGE_CREATE", seq, json!({"id": "9000", "channel_id": "1", "content": "hi"}));
    seq += 1;
    conn.dispatch("CHANNEL_CREATE", seq, private_channel(257, 1_000));
    eventually(|| shard.state.sequence() == Some(seq)).await;

    assert_eq!(shard.cache.stats().private_channels, 256);
    assert!(shard.cache.has_private_channel(Snowflake::new(1)));
    assert!(!shard.cache.has_private_channel(Snowflake::new(2)));
    assert!(shard.cache.has_private_channel(Snowflake::new(3)));
    assert!(shard.cache.has_private_channel(Snowflake::new(257)));
}

#[tokio::test(start_paused = true)]
async fn test_guild_delete_keeps_users() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut conn = shard.accept().await;
    conn.handshake("s").await;

    conn.dispatch("GUILD_CREATE", 2, guild_create(10, "ten", &[7, 8]));
    conn.dispatch("GUILD_CREATE", 3, guild_create(20, "twenty", &[8]));
    conn.dispatch("GUILD_DELETE", 4, json!({"id": "10"}));
    eventually(|| shard.state.sequence() == Some(4)).await;

    assert!(shard.cache.guild(Snowflake::new(10)).is_none());
    // Known only through the removed guild, still cached
    assert!(shard.cache.user(Snowflake::new(7)).is_some());
    assert_eq!(shard.cache.user_guilds(Snowflake::new(7)), Some(vec![]));
    assert_eq!(
        shard.cache.user_guilds(Snowflake::new(8)),
        Some(vec![Snowflake::new(20)])
    );

    assert_eq!(shard.cache.evict_orphaned_users(), 1);
    assert!(shard.cache.user(Snowflake::new(7)).is_none());
    assert!(shard.cache.user(Snowflake::new(1)).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_resume_keeps_guilds_and_fresh_session_clears_them() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut conn = shard.accept().await;
    conn.handshake("s").await;
    conn.dispatch("GUILD_CREATE", 2, guild_create(10, "ten", &[7]));
    eventually(|| shard.state.sequence() == Some(2)).await;

    conn.close(4000);
    let mut conn = shard.accept().await;
    conn.hello(HEARTBEAT_INTERVAL_MS);
    conn.expect_op(OpCode::Resume).await;
    conn.dispatch("RESUMED", 3, json!({}));
    eventually(|| shard.state.status() == ShardStatus::Ready).await;
    assert!(shard.cache.guild(Snowflake::new(10)).is_some());

    conn.close(4007);
    let mut conn = shard.accept().await;
    conn.hello(HEARTBEAT_INTERVAL_MS);
    conn.expect_op(OpCode::Identify).await;
    conn.dispatch("READY", 1, ready("fresh", &[10]));
    eventually(|| shard.state.session_id().as_deref() == Some("fresh")).await;

    assert!(shard.cache.guild(Snowflake::new(10)).is_none());
    assert!(shard.cache.is_unavailable(Snowflake::new(10)));
}
