//! Shard manager scenarios: identify pacing, discovery, fatal closes and
//! the shutdown sequence
//!
//! Run with: cargo test -p integration-tests --test manager_tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use integration_tests::{eventually, fixtures::*, manager, MockConnection};
use pylon_common::{ClientConfig, ErrorKind};
use pylon_core::{EventKind, Snowflake};
use pylon_gateway::{OpCode, ShardStatus};
use pylon_rest::{Method, RestError};
use tokio::time::Instant;

/// Shard id carried by an IDENTIFY
async fn identified_shard(conn: &mut MockConnection) -> u64 {
    let identify = conn.expect_op(OpCode::Identify).await;
    identify.d["shard"][0].as_u64().unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_identify_spacing_across_shards() {
    let (manager, mut acceptor, _http) = manager(test_config(3, 1));
    manager.start().await.unwrap();
    let started = Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let mut conn = acceptor.accept().await;
        tasks.push(tokio::spawn(async move {
            conn.hello(HEARTBEAT_INTERVAL_MS);
            conn.expect_op(OpCode::Identify).await;
            (Instant::now(), conn)
        }));
    }

    let mut identified = Vec::new();
    let mut conns = Vec::new();
    for task in tasks {
        let (at, conn) = task.await.unwrap();
        identified.push(at);
        conns.push(conn);
    }
    identified.sort();

    assert!(identified[0] - started < Duration::from_secs(1));
    for pair in identified.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(5));
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_admits_a_batch_per_window() {
    let (manager, mut acceptor, _http) = manager(test_config(4, 2));
    manager.start().await.unwrap();
    let started = Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let mut conn = acceptor.accept().await;
        tasks.push(tokio::spawn(async move {
            conn.hello(HEARTBEAT_INTERVAL_MS);
            conn.expect_op(OpCode::Identify).await;
            (Instant::now() - started, conn)
        }));
    }

    let mut offsets = Vec::new();
    let mut conns = Vec::new();
    for task in tasks {
        let (offset, conn) = task.await.unwrap();
        offsets.push(offset);
        conns.push(conn);
    }
    offsets.sort();

    assert!(offsets[1] < Duration::from_secs(1));
    assert!(offsets[2] >= Duration::from_secs(5));
    assert!(offsets[3] < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_discovery_sets_url_and_shard_count() {
    let mut config = ClientConfig::new("test-token");
    config.rest.api_base_url = MOCK_API_BASE.to_string();
    let (manager, mut acceptor, http) = manager(config);
    http.push(Method::GET, "/gateway/bot", gateway_bot("wss://discovered.mock", 2, 900, 1));

    manager.start().await.unwrap();
    assert_eq!(manager.shard_count(), 2);

    for _ in 0..2 {
        let conn = acceptor.accept().await;
        assert_eq!(conn.url, "wss://discovered.mock/?v=10&encoding=json");
    }

    let guild = Snowflake::new(3 << 22);
    assert_eq!(manager.shard_for_guild(guild), 1);
    assert_eq!(manager.handle_for_guild(guild).map(|h| h.id()), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_session_starts_wait_for_reset() {
    let mut config = ClientConfig::new("test-token");
    config.rest.api_base_url = MOCK_API_BASE.to_string();
    let (manager, _acceptor, http) = manager(config);
    http.push(Method::GET, "/gateway/bot", gateway_bot("wss://discovered.mock", 1, 0, 1));

    let started = Instant::now();
    manager.start().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_ready_aggregation() {
    let (manager, mut acceptor, _http) = manager(test_config(2, 2));
    let shard_ready = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&shard_ready);
    manager.events().on(EventKind::ShardReady, move |_| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(())
        }
    });

    manager.start().await.unwrap();
    let mut conns = Vec::new();
    for session in ["a", "b"] {
        let mut conn = acceptor.accept().await;
        conn.handshake(session).await;
        conns.push(conn);
    }

    manager.wait_until_ready().await.unwrap();
    assert!(manager.is_ready());
    eventually(|| shard_ready.load(Ordering::SeqCst) == 2).await;
    assert!(manager
        .statuses()
        .iter()
        .all(|(_, status)| *status == ShardStatus::Ready));

    manager.shutdown().await;
    assert_eq!(conns.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_stops_every_shard() {
    let (manager, mut acceptor, _http) = manager(test_config(2, 2));
    manager.start().await.unwrap();

    let mut conns = Vec::new();
    for _ in 0..2 {
        let mut conn = acceptor.accept().await;
        conn.hello(HEARTBEAT_INTERVAL_MS);
        let shard_id = identified_shard(&mut conn).await;
        conns.push((shard_id, conn));
    }
    conns.sort_by_key(|(id, _)| *id);
    let (_, mut healthy) = conns.pop().unwrap();
    let (_, rejected) = conns.pop().unwrap();

    healthy.dispatch("READY", 1, ready("ok", &[]));
    eventually(|| manager.handle(1).unwrap().status() == ShardStatus::Ready).await;

    rejected.close(4004);
    assert_eq!(healthy.expect_close().await, 1000);
    manager.join().await;

    let failures = manager.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].shard_id, 0);
    assert_eq!(failures[0].kind, ErrorKind::AuthFatal);
    assert_eq!(
        manager.statuses(),
        vec![(0, ShardStatus::Closed), (1, ShardStatus::Disconnected)]
    );
    assert!(manager.rest().is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_intents_failure_stops_only_its_shard() {
    let (manager, mut acceptor, _http) = manager(test_config(2, 2));
    manager.start().await.unwrap();

    let mut conns = Vec::new();
    for _ in 0..2 {
        let mut conn = acceptor.accept().await;
        conn.hello(HEARTBEAT_INTERVAL_MS);
        let shard_id = identified_shard(&mut conn).await;
        conns.push((shard_id, conn));
    }
    conns.sort_by_key(|(id, _)| *id);

    conns[0].1.close(4014);
    eventually(|| !manager.failures().is_empty()).await;
    assert_eq!(manager.failures()[0].kind, ErrorKind::IntentsFatal);
    assert!(!manager.is_shutting_down());

    conns[1].1.dispatch("READY", 1, ready("ok", &[]));
    eventually(|| manager.handle(1).unwrap().status() == ShardStatus::Ready).await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_rest_before_closing_shards() {
    let (manager, mut acceptor, http) = manager(test_config(1, 1));
    manager.start().await.unwrap();
    let mut conn = acceptor.accept().await;
    conn.handshake("s").await;
    eventually(|| manager.is_ready()).await;

    http.delay(Method::POST, "/channels/5/messages", Duration::from_secs(3));
    let rest = Arc::clone(manager.rest());
    let request = tokio::spawn(async move {
        let result = rest.create_message(Snowflake::new(5), "bye").await;
        (result, Instant::now())
    });
    eventually(|| manager.rest().inflight() == 1).await;

    let stopping = Arc::clone(&manager);
    let shutdown = tokio::spawn(async move { stopping.shutdown().await });
    eventually(|| manager.rest().is_closed()).await;

    assert!(matches!(
        manager.rest().create_message(Snowflake::new(5), "late").await,
        Err(RestError::Closed)
    ));

    assert_eq!(conn.expect_close().await, 1000);
    let closed_at = Instant::now();

    let (result, finished_at) = request.await.unwrap();
    assert!(result.is_ok());
    assert!(finished_at <= closed_at);

    shutdown.await.unwrap();
    assert_eq!(manager.statuses(), vec![(0, ShardStatus::Disconnected)]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_requests_left_after_grace() {
    let (manager, mut acceptor, http) = manager(test_config(1, 1));
    manager.start().await.unwrap();
    let mut conn = acceptor.accept().await;
    conn.handshake("s").await;
    eventually(|| manager.is_ready()).await;

    // Exhaust the bucket for a minute
    let path = "/channels/5/messages";
    http.push(Method::POST, path, bucket_response("h", 1, 0, 60.0));
    manager
        .rest()
        .create_message(Snowflake::new(5), "first")
        .await
        .unwrap();

    let rest = Arc::clone(manager.rest());
    let parked = tokio::spawn(async move { rest.create_message(Snowflake::new(5), "second").await });
    eventually(|| manager.rest().inflight() == 1).await;

    let started = Instant::now();
    manager.shutdown().await;
    let took = started.elapsed();
    assert!(took >= manager.config().shutdown_grace());
    assert!(took < Duration::from_secs(60));

    assert!(matches!(parked.await.unwrap(), Err(RestError::Closed)));
    assert!(manager.rest().is_cancelled());
    assert_eq!(manager.rest().inflight(), 0);

    // Long past the bucket reset, the parked request never went out
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(http.arrivals(&Method::POST, path).len(), 1);
    assert_eq!(conn.expect_close().await, 1000);
}
