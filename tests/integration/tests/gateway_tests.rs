//! Shard connection scenarios against a scripted gateway
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::sync::Arc;
use std::time::Duration;

use integration_tests::{eventually, fixtures::*, Sent, ShardHarness};
use pylon_core::{EventKind, HasName, Snowflake};
use pylon_gateway::{
    FatalReason, GatewayCommand, GatewayError, GatewayMessage, OpCode, PresenceUpdatePayload,
    ShardStatus,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

// ============================================================================
// Heartbeat
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_missed_ack_zombies_connection_and_resumes() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut conn = shard.accept().await;
    conn.handshake("session-a").await;

    let first_beat = loop {
        match conn.next().await {
            Some(Sent::Message(message)) if message.op == OpCode::Heartbeat => break Instant::now(),
            Some(Sent::Message(_)) => {}
            other => panic!("expected a heartbeat, got {other:?}"),
        }
    };

    // Never acknowledged: the next beat comes due and the shard gives up
    assert_eq!(conn.expect_close().await, 4000);
    let elapsed = Instant::now() - first_beat;
    assert!(elapsed >= Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    assert!(elapsed < Duration::from_millis(HEARTBEAT_INTERVAL_MS + 100));

    eventually(|| shard.state.status() == ShardStatus::Reconnecting).await;
    assert_eq!(shard.state.session_id().as_deref(), Some("session-a"));

    let mut conn = shard.accept().await;
    assert!(conn.url.starts_with("wss://resume.mock/?v=10"));
    conn.hello(HEARTBEAT_INTERVAL_MS);
    let resume = conn.expect_op(OpCode::Resume).await;
    assert_eq!(resume.d["session_id"], "session-a");
    assert_eq!(resume.d["seq"], 1);

    conn.dispatch("RESUMED", 2, serde_json::json!({}));
    eventually(|| shard.state.status() == ShardStatus::Ready).await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_request_and_ack_latency() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut conn = shard.accept().await;
    conn.handshake("s").await;
    eventually(|| shard.state.status() == ShardStatus::Ready).await;

    conn.send(&GatewayMessage::heartbeat(None));
    let beat = conn.expect_op(OpCode::Heartbeat).await;
    assert!(beat.d.is_null() || beat.d == 1);

    conn.ack();
    eventually(|| shard.state.latency().is_some()).await;
    assert!(shard.state.snapshot().last_heartbeat_acked);
}

// ============================================================================
// Resume vs identify
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_resumable_close_resumes() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut conn = shard.accept().await;
    conn.handshake("s").await;
    conn.dispatch("TYPING_START", 2, serde_json::json!({"channel_id": "3", "user_id": "4"}));
    eventually(|| shard.state.sequence() == Some(2)).await;

    // Codes below 4000 are resumable
    conn.close(1001);

    let mut conn = shard.accept().await;
    conn.hello(HEARTBEAT_INTERVAL_MS);
    let resume = conn.expect_op(OpCode::Resume).await;
    assert_eq!(resume.d["seq"], 2);
}

#[tokio::test(start_paused = true)]
async fn test_non_resumable_close_identifies_from_scratch() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut conn = shard.accept().await;
    conn.handshake("s").await;
    eventually(|| shard.state.status() == ShardStatus::Ready).await;

    conn.close(4009);

    let mut conn = shard.accept().await;
    assert!(conn.url.starts_with(MOCK_GATEWAY_URL));
    assert_eq!(shard.state.session_id(), None);
    assert_eq!(shard.state.sequence(), None);

    conn.hello(HEARTBEAT_INTERVAL_MS);
    let identify = conn.expect_op(OpCode::Identify).await;
    assert_eq!(identify.d["shard"], serde_json::json!([0, 1]));
    assert_eq!(identify.d["token"], "test-token");
}

#[tokio::test(start_paused = true)]
async fn test_invalid_session_not_resumable_reidentifies() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut conn = shard.accept().await;
    conn.handshake("s").await;
    eventually(|| shard.state.status() == ShardStatus::Ready).await;

    conn.send(&GatewayMessage::invalid_session(false));
    assert_eq!(conn.expect_close().await, 1000);

    let mut conn = shard.accept().await;
    conn.hello(HEARTBEAT_INTERVAL_MS);
    conn.expect_op(OpCode::Identify).await;
}

#[tokio::test(start_paused = true)]
async fn test_fresh_identify_resets_guilds_and_keeps_users() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut conn = shard.accept().await;
    conn.hello(HEARTBEAT_INTERVAL_MS);
    conn.expect_op(OpCode::Identify).await;
    conn.dispatch("READY", 1, ready("first", &[10]));
    conn.dispatch("GUILD_CREATE", 2, guild_create(10, "guild", &[2, 3]));
    conn.dispatch("CHANNEL_CREATE", 3, private_channel(50, 4));
    eventually(|| shard.cache.has_private_channel(Snowflake::new(50))).await;
    assert!(shard.cache.guild(Snowflake::new(10)).is_some());

    conn.send(&GatewayMessage::invalid_session(false));
    assert_eq!(conn.expect_close().await, 1000);

    let mut conn = shard.accept().await;
    conn.hello(HEARTBEAT_INTERVAL_MS);
    conn.expect_op(OpCode::Identify).await;
    // Nothing is dropped until the new session is established
    assert!(shard.cache.guild(Snowflake::new(10)).is_some());

    conn.dispatch("READY", 1, ready("second", &[]));
    eventually(|| shard.cache.guild(Snowflake::new(10)).is_none()).await;
    assert_eq!(shard.state.session_id().as_deref(), Some("second"));

    // Guild members stay cached without their back-reference
    for member in [2, 3] {
        assert!(shard.cache.user(Snowflake::new(member)).is_some());
        assert_eq!(shard.cache.user_guilds(Snowflake::new(member)), Some(vec![]));
    }
    assert!(shard.cache.has_private_channel(Snowflake::new(50)));
    assert!(shard.cache.user(Snowflake::new(4)).is_some());

    // Only users nothing references anymore are reclaimed
    assert_eq!(shard.cache.evict_orphaned_users(), 2);
    assert!(shard.cache.user(Snowflake::new(2)).is_none());
    assert!(shard.cache.user(Snowflake::new(4)).is_some());
    assert!(shard.cache.user(Snowflake::new(1)).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_request_resumes() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut conn = shard.accept().await;
    conn.handshake("s").await;
    eventually(|| shard.state.status() == ShardStatus::Ready).await;

    conn.send(&GatewayMessage::reconnect());
    assert_eq!(conn.expect_close().await, 4000);

    let mut conn = shard.accept().await;
    conn.hello(HEARTBEAT_INTERVAL_MS);
    conn.expect_op(OpCode::Resume).await;
}

#[tokio::test(start_paused = true)]
async fn test_absurd_heartbeat_interval_is_rejected() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut conn = shard.accept().await;

    conn.hello(u64::MAX);
    assert_eq!(conn.expect_close().await, 4000);

    let mut conn = shard.accept().await;
    conn.hello(HEARTBEAT_INTERVAL_MS);
    conn.expect_op(OpCode::Identify).await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_hello_reconnects() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut conn = shard.accept().await;

    assert_eq!(conn.expect_close().await, 4000);
    let mut conn = shard.accept().await;
    conn.hello(HEARTBEAT_INTERVAL_MS);
    conn.expect_op(OpCode::Identify).await;
}

// ============================================================================
// Dispatch ordering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stale_sequence_is_dropped_and_cache_precedes_listeners() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cache = Arc::clone(&shard.cache);
    shard.events.on(EventKind::Raw, move |event| {
        let tx = tx.clone();
        let cache = Arc::clone(&cache);
        async move {
            let cached = cache.guild(Snowflake::new(10)).is_some();
            tx.send((event.gateway_sequence, event.name.clone(), cached))?;
            anyhow::Ok(())
        }
    });

    let mut conn = shard.accept().await;
    conn.handshake("s").await;
    conn.dispatch("GUILD_CREATE", 2, guild_create(10, "first", &[5]));
    conn.dispatch("GUILD_UPDATE", 2, guild_update(10, "stale"));
    conn.dispatch("GUILD_UPDATE", 3, guild_update(10, "third"));
    eventually(|| shard.state.sequence() == Some(3)).await;

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(rx.recv().await.unwrap());
    }
    seen.sort();
    let order: Vec<_> = seen.iter().map(|(seq, name, _)| (*seq, name.as_str())).collect();
    assert_eq!(
        order,
        vec![(Some(1), "READY"), (Some(2), "GUILD_CREATE"), (Some(3), "GUILD_UPDATE")]
    );
    // Guild events only reach listeners once the guild is cached
    assert!(seen.iter().skip(1).all(|(_, _, cached)| *cached));
    assert!(tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.is_err());

    let name = shard
        .cache
        .with_guild(Snowflake::new(10), |g| g.guild().name().map(String::from));
    assert_eq!(name, Some(Some("third".to_string())));
}

#[tokio::test(start_paused = true)]
async fn test_first_ready_emits_shard_ready() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let (tx, mut rx) = mpsc::unbounded_channel();
    shard.events.on(EventKind::ShardReady, move |event| {
        let tx = tx.clone();
        async move {
            tx.send(event.shard_id)?;
            anyhow::Ok(())
        }
    });

    let mut conn = shard.accept().await;
    conn.handshake("s").await;
    assert_eq!(rx.recv().await, Some(0));
    assert!(shard.state.has_been_ready());
}

// ============================================================================
// Readiness and guild lifecycle
// ============================================================================

/// Kind, gateway sequence and arrival time of every event of `kinds`
type Recorded = (EventKind, Option<u64>, Instant);

fn record_kinds(shard: &ShardHarness, kinds: &[EventKind]) -> mpsc::UnboundedReceiver<Recorded> {
    let (tx, rx) = mpsc::unbounded_channel();
    for kind in kinds {
        let tx = tx.clone();
        shard.events.on(*kind, move |event| {
            let tx = tx.clone();
            async move {
                tx.send((event.kind.expect("typed event"), event.gateway_sequence, Instant::now()))?;
                anyhow::Ok(())
            }
        });
    }
    rx
}

#[tokio::test(start_paused = true)]
async fn test_ready_waits_for_announced_guilds() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut rx = record_kinds(&shard, &[EventKind::ShardReady, EventKind::GuildAvailable]);

    let mut conn = shard.accept().await;
    conn.hello(HEARTBEAT_INTERVAL_MS);
    conn.expect_op(OpCode::Identify).await;
    conn.dispatch("READY", 1, ready("s", &[10, 20]));
    conn.dispatch("GUILD_CREATE", 2, guild_create(10, "first", &[]));

    assert_eq!(rx.recv().await.map(|(kind, ..)| kind), Some(EventKind::GuildAvailable));
    assert!(tokio::time::timeout(Duration::from_millis(500), rx.recv()).await.is_err());
    assert!(!shard.state.has_been_ready());
    // Commands may flow while guilds stream in
    assert_eq!(shard.state.status(), ShardStatus::Ready);

    conn.dispatch("GUILD_CREATE", 3, guild_create(20, "second", &[]));
    let kinds = [rx.recv().await.unwrap().0, rx.recv().await.unwrap().0];
    assert!(kinds.contains(&EventKind::GuildAvailable));
    assert!(kinds.contains(&EventKind::ShardReady));
    assert!(shard.state.has_been_ready());
}

#[tokio::test(start_paused = true)]
async fn test_ready_timeout_gives_up_on_missing_guilds() {
    let mut config = test_config(1, 1);
    config.gateway.ready_timeout_ms = 2_000;
    let mut shard = ShardHarness::spawn(config);
    let mut rx = record_kinds(&shard, &[EventKind::ShardReady]);

    let mut conn = shard.accept().await;
    conn.hello(HEARTBEAT_INTERVAL_MS);
    conn.expect_op(OpCode::Identify).await;
    conn.dispatch("READY", 1, ready("s", &[10, 20]));
    let sent_at = Instant::now();
    conn.dispatch("GUILD_CREATE", 2, guild_create(10, "only", &[]));

    let (kind, _, at) = rx.recv().await.unwrap();
    assert_eq!(kind, EventKind::ShardReady);
    assert!(at - sent_at >= Duration::from_millis(2_000));
    assert!(shard.cache.is_unavailable(Snowflake::new(20)));
}

#[tokio::test(start_paused = true)]
async fn test_guild_join_and_leave_are_told_apart() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut rx = record_kinds(
        &shard,
        &[
            EventKind::GuildAvailable,
            EventKind::GuildJoin,
            EventKind::GuildUnavailable,
            EventKind::GuildLeave,
        ],
    );

    let mut conn = shard.accept().await;
    conn.handshake("s").await;
    conn.dispatch("GUILD_CREATE", 2, guild_create(30, "new", &[]));
    conn.dispatch("GUILD_DELETE", 3, serde_json::json!({"id": "30", "unavailable": true}));
    conn.dispatch("GUILD_CREATE", 4, guild_create(30, "back", &[]));
    conn.dispatch("GUILD_DELETE", 5, serde_json::json!({"id": "30"}));

    let mut seen = Vec::new();
    for _ in 0..4 {
        let (kind, seq, _) = rx.recv().await.unwrap();
        seen.push((seq, kind));
    }
    seen.sort_by_key(|(seq, _)| *seq);
    let kinds: Vec<EventKind> = seen.into_iter().map(|(_, kind)| kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::GuildJoin,
            EventKind::GuildUnavailable,
            EventKind::GuildAvailable,
            EventKind::GuildLeave,
        ]
    );
}

// ============================================================================
// Transport compression
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_compressed_stream_is_inflated() {
    let mut config = test_config(1, 1);
    config.gateway.compress = true;
    let mut shard = ShardHarness::spawn(config);

    let mut conn = shard.accept().await;
    assert!(conn.url.ends_with("&compress=zlib-stream"));
    conn.enable_compression();
    conn.handshake("s").await;
    eventually(|| shard.state.status() == ShardStatus::Ready).await;

    conn.send_split(&GatewayMessage::dispatch("GUILD_CREATE", 2, guild_create(10, "zipped", &[7])));
    conn.dispatch("GUILD_UPDATE", 3, guild_update(10, "still zipped"));

    eventually(|| {
        shard
            .cache
            .with_guild(Snowflake::new(10), |g| g.guild().name() == Some("still zipped"))
            == Some(true)
    })
    .await;
    assert!(shard.cache.user(Snowflake::new(7)).is_some());

    // A fresh connection starts a fresh zlib stream
    conn.close(1001);
    let mut conn = shard.accept().await;
    conn.enable_compression();
    conn.hello(HEARTBEAT_INTERVAL_MS);
    conn.expect_op(OpCode::Resume).await;
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_commands_wait_for_ready() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut conn = shard.accept().await;
    conn.hello(HEARTBEAT_INTERVAL_MS);
    conn.expect_op(OpCode::Identify).await;

    shard
        .command(GatewayCommand::PresenceUpdate(PresenceUpdatePayload::status("idle")))
        .await;

    // Nothing but heartbeats before READY
    while let Ok(sent) = tokio::time::timeout(Duration::from_millis(500), conn.next()).await {
        match sent {
            Some(Sent::Message(message)) => assert_eq!(message.op, OpCode::Heartbeat),
            other => panic!("unexpected {other:?}"),
        }
    }

    conn.dispatch("READY", 1, ready("s", &[]));
    let presence = conn.expect_op(OpCode::PresenceUpdate).await;
    assert_eq!(presence.d["status"], "idle");
}

// ============================================================================
// Failures and shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_intents_close_is_fatal() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut conn = shard.accept().await;
    conn.hello(HEARTBEAT_INTERVAL_MS);
    conn.expect_op(OpCode::Identify).await;

    conn.close(4014);

    let result = (&mut shard.task).await.unwrap();
    assert!(matches!(
        result,
        Err(GatewayError::FatalClose {
            code: 4014,
            reason: FatalReason::Intents
        })
    ));
    assert_eq!(shard.state.status(), ShardStatus::Closed);
    assert_eq!(shard.gateway.urls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_protocol_violation_is_fatal() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut conn = shard.accept().await;
    conn.handshake("s").await;
    eventually(|| shard.state.status() == ShardStatus::Ready).await;

    conn.send_raw("not json");
    assert_eq!(conn.expect_close().await, 4000);

    // The first violation drops the session
    let mut conn = shard.accept().await;
    conn.hello(HEARTBEAT_INTERVAL_MS);
    conn.expect_op(OpCode::Identify).await;

    conn.send_raw(r#"{"op": 42, "d": null}"#);
    assert_eq!(conn.expect_close().await, 1000);

    let result = (&mut shard.task).await.unwrap();
    assert!(matches!(result, Err(GatewayError::Protocol { fatal: true, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_normally_and_clears_session() {
    let mut shard = ShardHarness::spawn(test_config(1, 1));
    let mut conn = shard.accept().await;
    conn.handshake("s").await;
    eventually(|| shard.state.status() == ShardStatus::Ready).await;

    shard.shutdown();
    assert_eq!(conn.expect_close().await, 1000);

    assert!((&mut shard.task).await.unwrap().is_ok());
    assert_eq!(shard.state.status(), ShardStatus::Disconnected);
    assert_eq!(shard.state.session_id(), None);
}
