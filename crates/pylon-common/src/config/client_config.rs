//! Client configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file when
//! present). Every sub-config has a `Default` so clients can also be built
//! programmatically.

use pylon_core::Intents;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Main client configuration
#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    pub token: String,
    #[serde(default)]
    pub intents: Intents,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub rest: RestConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// How long shutdown waits for in-flight REST requests
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// How a shard reacts to a close code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseBehavior {
    /// Reconnect and resume the session
    Resumable,
    /// Reconnect with a fresh Identify
    NonResumable,
    /// Stop the shard and surface the error
    Fatal,
}

impl FromStr for CloseBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "resumable" | "resume" => Ok(Self::Resumable),
            "non_resumable" | "non-resumable" | "reidentify" => Ok(Self::NonResumable),
            "fatal" => Ok(Self::Fatal),
            other => Err(other.to_string()),
        }
    }
}

/// Gateway (streaming connection) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Fixed gateway URL; discovered through the REST API when unset
    #[serde(default)]
    pub url: Option<String>,
    /// Fixed shard count; the recommended count is used when unset
    #[serde(default)]
    pub shard_count: Option<u32>,
    /// Identify concurrency override; the session start limit is used when unset
    #[serde(default)]
    pub max_concurrency: Option<u32>,
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,
    /// Ask for zlib-stream transport compression
    #[serde(default)]
    pub compress: bool,
    /// How long a shard waits after READY for its unavailable guilds
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// Missed acks tolerated before a connection is considered zombied
    #[serde(default)]
    pub heartbeat_ack_tolerance: u32,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_cap_ms")]
    pub reconnect_cap_ms: u64,
    #[serde(default = "default_identify_window_ms")]
    pub identify_window_ms: u64,
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u32,
    /// Outbound gateway commands allowed per `command_period_secs`
    #[serde(default = "default_command_limit")]
    pub command_limit: u32,
    #[serde(default = "default_command_period_secs")]
    pub command_period_secs: u64,
    /// Entries replacing the built-in close code classification
    #[serde(default)]
    pub close_code_overrides: HashMap<u16, CloseBehavior>,
}

impl GatewayConfig {
    #[must_use]
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }

    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    #[must_use]
    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    #[must_use]
    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_millis(self.reconnect_cap_ms)
    }

    #[must_use]
    pub fn identify_window(&self) -> Duration {
        Duration::from_millis(self.identify_window_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            shard_count: None,
            max_concurrency: None,
            hello_timeout_ms: default_hello_timeout_ms(),
            compress: false,
            ready_timeout_ms: default_ready_timeout_ms(),
            heartbeat_ack_tolerance: 0,
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_cap_ms: default_reconnect_cap_ms(),
            identify_window_ms: default_identify_window_ms(),
            large_threshold: default_large_threshold(),
            command_limit: default_command_limit(),
            command_period_secs: default_command_period_secs(),
            close_code_overrides: HashMap::new(),
        }
    }
}

/// REST request pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Attempts per request for 5xx and transport failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Global requests per second across every route
    #[serde(default = "default_global_rate")]
    pub global_rate: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl RestConfig {
    #[must_use]
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    #[must_use]
    pub fn retry_cap(&self) -> Duration {
        Duration::from_millis(self.retry_cap_ms)
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            max_attempts: default_max_attempts(),
            global_rate: default_global_rate(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap_ms: default_retry_cap_ms(),
            user_agent: default_user_agent(),
        }
    }
}

/// In-memory cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_private_channel_capacity")]
    pub private_channel_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            private_channel_capacity: default_private_channel_capacity(),
        }
    }
}

// Default value functions
fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_hello_timeout_ms() -> u64 {
    10_000
}

fn default_ready_timeout_ms() -> u64 {
    2_000
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

fn default_reconnect_cap_ms() -> u64 {
    60_000
}

fn default_identify_window_ms() -> u64 {
    5_000
}

fn default_large_threshold() -> u32 {
    50
}

fn default_command_limit() -> u32 {
    120
}

fn default_command_period_secs() -> u64 {
    60
}

fn default_api_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_global_rate() -> u32 {
    50
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_cap_ms() -> u64 {
    30_000
}

fn default_user_agent() -> String {
    format!("DiscordBot (https://github.com/pylon-rs/pylon, {})", env!("CARGO_PKG_VERSION"))
}

fn default_private_channel_capacity() -> usize {
    256
}

/// Read and parse an optional variable, rejecting unparsable values
fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(None),
    }
}

/// `4008=resumable,4010=fatal`
fn parse_close_overrides(raw: &str) -> Result<HashMap<u16, CloseBehavior>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (code, behavior) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidValue("CLOSE_CODE_OVERRIDES", entry.to_string()))?;
            let code = code
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidValue("CLOSE_CODE_OVERRIDES", entry.to_string()))?;
            let behavior = behavior
                .parse::<CloseBehavior>()
                .map_err(|_| ConfigError::InvalidValue("CLOSE_CODE_OVERRIDES", entry.to_string()))?;
            Ok((code, behavior))
        })
        .collect()
}

impl ClientConfig {
    /// Configuration with every default and the given token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            intents: Intents::default(),
            gateway: GatewayConfig::default(),
            rest: RestConfig::default(),
            cache: CacheConfig::default(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `BOT_TOKEN` is missing or any variable is malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let token = env::var("BOT_TOKEN").map_err(|_| ConfigError::MissingVar("BOT_TOKEN"))?;

        let intents = match env::var("INTENTS") {
            Ok(raw) => Intents::parse(&raw).map_err(|_| ConfigError::InvalidValue("INTENTS", raw))?,
            Err(_) => Intents::default(),
        };

        let shard_count = match env::var("SHARD_COUNT") {
            Ok(raw) if raw.trim().eq_ignore_ascii_case("auto") => None,
            _ => parse_var("SHARD_COUNT")?,
        };

        let close_code_overrides = match env::var("CLOSE_CODE_OVERRIDES") {
            Ok(raw) => parse_close_overrides(&raw)?,
            Err(_) => HashMap::new(),
        };

        let config = Self {
            token,
            intents,
            gateway: GatewayConfig {
                url: env::var("GATEWAY_URL").ok().filter(|s| !s.trim().is_empty()),
                shard_count,
                max_concurrency: parse_var("MAX_CONCURRENCY")?,
                hello_timeout_ms: parse_var("HELLO_TIMEOUT_MS")?
                    .unwrap_or_else(default_hello_timeout_ms),
                compress: parse_var("GATEWAY_COMPRESS")?.unwrap_or(false),
                ready_timeout_ms: parse_var("READY_TIMEOUT_MS")?
                    .unwrap_or_else(default_ready_timeout_ms),
                heartbeat_ack_tolerance: parse_var("HEARTBEAT_ACK_TOLERANCE")?.unwrap_or(0),
                reconnect_base_ms: parse_var("RECONNECT_BASE_MS")?
                    .unwrap_or_else(default_reconnect_base_ms),
                reconnect_cap_ms: parse_var("RECONNECT_CAP_MS")?
                    .unwrap_or_else(default_reconnect_cap_ms),
                identify_window_ms: parse_var("IDENTIFY_WINDOW_MS")?
                    .unwrap_or_else(default_identify_window_ms),
                large_threshold: parse_var("LARGE_THRESHOLD")?
                    .unwrap_or_else(default_large_threshold),
                command_limit: default_command_limit(),
                command_period_secs: default_command_period_secs(),
                close_code_overrides,
            },
            rest: RestConfig {
                api_base_url: env::var("API_BASE_URL").unwrap_or_else(|_| default_api_base_url()),
                max_attempts: parse_var("REST_MAX_ATTEMPTS")?.unwrap_or_else(default_max_attempts),
                global_rate: parse_var("REST_GLOBAL_RATE")?.unwrap_or_else(default_global_rate),
                retry_base_ms: parse_var("REST_RETRY_BASE_MS")?
                    .unwrap_or_else(default_retry_base_ms),
                retry_cap_ms: parse_var("REST_RETRY_CAP_MS")?.unwrap_or_else(default_retry_cap_ms),
                user_agent: env::var("USER_AGENT").unwrap_or_else(|_| default_user_agent()),
            },
            cache: CacheConfig {
                private_channel_capacity: parse_var("PRIVATE_CHANNEL_CAPACITY")?
                    .unwrap_or_else(default_private_channel_capacity),
            },
            shutdown_grace_ms: parse_var("SHUTDOWN_GRACE_MS")?
                .unwrap_or_else(default_shutdown_grace_ms),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot work at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingVar("BOT_TOKEN"));
        }
        if self.gateway.shard_count == Some(0) {
            return Err(ConfigError::InvalidValue("SHARD_COUNT", "0".to_string()));
        }
        if self.gateway.max_concurrency == Some(0) {
            return Err(ConfigError::InvalidValue("MAX_CONCURRENCY", "0".to_string()));
        }
        if self.gateway.reconnect_cap_ms < self.gateway.reconnect_base_ms {
            return Err(ConfigError::InvalidValue(
                "RECONNECT_CAP_MS",
                self.gateway.reconnect_cap_ms.to_string(),
            ));
        }
        if self.rest.max_attempts == 0 {
            return Err(ConfigError::InvalidValue("REST_MAX_ATTEMPTS", "0".to_string()));
        }
        if self.rest.global_rate == 0 {
            return Err(ConfigError::InvalidValue("REST_GLOBAL_RATE", "0".to_string()));
        }
        if self.cache.private_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "PRIVATE_CHANNEL_CAPACITY",
                "0".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// Keep the token out of logs
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("gateway", &self.gateway)
            .field("rest", &self.rest)
            .field("cache", &self.cache)
            .field("shutdown_grace_ms", &self.shutdown_grace_ms)
            .finish()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
