//! # pylon-common
//!
//! Shared utilities including configuration, the client error taxonomy,
//! reconnect/retry backoff, and telemetry.

pub mod backoff;
pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use backoff::ExponentialBackoff;
pub use config::{
    CacheConfig, ClientConfig, CloseBehavior, ConfigError, GatewayConfig, RestConfig,
};
pub use error::{ClientError, ClientResult, ErrorKind};
pub use telemetry::{
    init_tracing, init_tracing_with_config, try_init_tracing, try_init_tracing_with_config,
    TracingConfig, TracingError,
};
