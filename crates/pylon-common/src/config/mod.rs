//! Configuration structs

mod client_config;

pub use client_config::{
    CacheConfig, ClientConfig, CloseBehavior, ConfigError, GatewayConfig, RestConfig,
};
