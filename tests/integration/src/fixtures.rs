//! Test fixtures and payload generators

use std::collections::HashMap;

use pylon_common::ClientConfig;
use pylon_rest::HttpResponse;
use serde_json::{json, Value};

/// Base URL the REST dispatcher is pointed at in tests
pub const MOCK_API_BASE: &str = "http://rest.mock";

/// Gateway URL used by fixed topologies
pub const MOCK_GATEWAY_URL: &str = "wss://gateway.mock";

pub const HEARTBEAT_INTERVAL_MS: u64 = 41_250;

/// Configuration with a fixed topology, so no discovery request is made
pub fn test_config(shard_count: u32, max_concurrency: u32) -> ClientConfig {
    let mut config = ClientConfig::new("test-token");
    config.gateway.url = Some(MOCK_GATEWAY_URL.to_string());
    config.gateway.shard_count = Some(shard_count);
    config.gateway.max_concurrency = Some(max_concurrency);
    config.rest.api_base_url = MOCK_API_BASE.to_string();
    config
}

pub fn user(id: u64) -> Value {
    json!({"id": id.to_string(), "username": format!("user{id}")})
}

pub fn ready(session_id: &str, guild_ids: &[u64]) -> Value {
    let guilds: Vec<Value> = guild_ids
        .iter()
        .map(|id| json!({"id": id.to_string(), "unavailable": true}))
        .collect();
    json!({
        "session_id": session_id,
        "resume_gateway_url": "wss://resume.mock",
        "user": user(1),
        "guilds": guilds,
    })
}

pub fn guild_create(id: u64, name: &str, members: &[u64]) -> Value {
    let members: Vec<Value> = members.iter().map(|m| json!({"user": user(*m)})).collect();
    json!({
        "id": id.to_string(),
        "name": name,
        "roles": [{"id": id.to_string(), "name": "@everyone"}],
        "channels": [{"id": (id + 1).to_string(), "type": 0, "name": "general"}],
        "members": members,
    })
}

pub fn guild_update(id: u64, name: &str) -> Value {
    json!({"id": id.to_string(), "name": name})
}

pub fn private_channel(id: u64, recipient: u64) -> Value {
    json!({
        "id": id.to_string(),
        "type": 1,
        "recipients": [user(recipient)],
    })
}

pub fn http_response(status: u16, headers: &[(&str, &str)], body: &str) -> HttpResponse {
    HttpResponse {
        status,
        headers: headers
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect::<HashMap<_, _>>(),
        body: body.as_bytes().to_vec(),
    }
}

/// A 2xx response carrying bucket headers
pub fn bucket_response(bucket: &str, limit: u32, remaining: u32, reset_after: f64) -> HttpResponse {
    let limit = limit.to_string();
    let remaining = remaining.to_string();
    let reset_after = reset_after.to_string();
    http_response(
        200,
        &[
            ("x-ratelimit-bucket", bucket),
            ("x-ratelimit-limit", &limit),
            ("x-ratelimit-remaining", &remaining),
            ("x-ratelimit-reset-after", &reset_after),
        ],
        "{}",
    )
}

/// A 429 response with the JSON body the remote sends
pub fn too_many_requests(retry_after: f64, global: bool) -> HttpResponse {
    let body = json!({"message": "You are being rate limited.", "retry_after": retry_after, "global": global});
    let retry = retry_after.to_string();
    let mut headers = vec![("retry-after", retry.as_str())];
    if global {
        headers.push(("x-ratelimit-global", "true"));
    }
    http_response(429, &headers, &body.to_string())
}

pub fn gateway_bot(url: &str, shards: u32, remaining: u32, max_concurrency: u32) -> HttpResponse {
    let body = json!({
        "url": url,
        "shards": shards,
        "session_start_limit": {
            "total": 1000,
            "remaining": remaining,
            "reset_after": 60_000,
            "max_concurrency": max_concurrency,
        }
    });
    http_response(200, &[], &body.to_string())
}
