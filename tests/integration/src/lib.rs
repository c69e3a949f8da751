//! Integration test utilities for the gateway client
//!
//! Scripted in-memory gateway and HTTP transports, a single-shard
//! harness, and payload fixtures for end-to-end scenarios.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
