//! Subscriber setup for the client
//!
//! `RUST_LOG` overrides the configured level and directives when set.
//! Shards, the REST pipeline and the event dispatcher log with structured
//! fields (`shard_id`, `bucket`, `event`), so JSON output is usable as-is.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

/// How the global subscriber is built
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Base level when `RUST_LOG` is unset
    pub level: Level,
    /// Extra filter directives appended after the level (e.g. `tokio_tungstenite=warn`)
    pub directives: Vec<String>,
    /// One JSON object per line
    pub json: bool,
    /// Log span open and close
    pub span_events: bool,
    /// Source location on every line
    pub file_line: bool,
    pub thread_names: bool,
    pub thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            directives: vec!["tokio_tungstenite=warn".to_string(), "tungstenite=warn".to_string()],
            json: false,
            span_events: false,
            file_line: true,
            thread_names: false,
            thread_ids: false,
        }
    }
}

impl TracingConfig {
    /// Debug level, span events and thread names
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            span_events: true,
            thread_names: true,
            ..Self::default()
        }
    }

    /// JSON lines at info, no source locations
    #[must_use]
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            json: true,
            file_line: false,
            ..Self::default()
        }
    }

    /// Pick a preset from `LOG_FORMAT` (`json` selects production)
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(format) if format.eq_ignore_ascii_case("json") => Self::production(),
            _ => Self::default(),
        }
    }

    /// Build the filter: `RUST_LOG` wins, otherwise level plus directives
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let mut filter = EnvFilter::new(self.level.to_string());
            for directive in &self.directives {
                if let Ok(directive) = directive.parse() {
                    filter = filter.add_directive(directive);
                }
            }
            filter
        })
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the subscriber described by `config`
fn install(config: &TracingConfig) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(config.env_filter());

    if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(config.file_line)
                    .with_line_number(config.file_line)
                    .with_thread_names(config.thread_names)
                    .with_thread_ids(config.thread_ids)
                    .with_span_events(config.span_events()),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_file(config.file_line)
                    .with_line_number(config.file_line)
                    .with_thread_names(config.thread_names)
                    .with_thread_ids(config.thread_ids)
                    .with_span_events(config.span_events()),
            )
            .try_init()
    }
}

/// Install the default subscriber
///
/// # Panics
/// If a global subscriber is already installed.
pub fn init_tracing() {
    init_tracing_with_config(TracingConfig::default());
}

/// # Panics
/// If a global subscriber is already installed.
pub fn init_tracing_with_config(config: TracingConfig) {
    if let Err(err) = install(&config) {
        panic!("failed to initialize tracing: {err}");
    }
}

/// Install the subscriber picked by [`TracingConfig::from_env`]
///
/// Safe to call more than once; later calls return an error instead of panicking.
pub fn try_init_tracing() -> Result<(), TracingError> {
    try_init_tracing_with_config(TracingConfig::from_env())
}

pub fn try_init_tracing_with_config(config: TracingConfig) -> Result<(), TracingError> {
    install(&config).map_err(|_| TracingError::AlreadyInitialized)
}

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,
}
