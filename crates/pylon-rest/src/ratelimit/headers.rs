//! Rate limit header and 429 body parsing

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Rate limit information carried by every REST response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// Bucket hash shared by routes with the same limit
    pub bucket: Option<String>,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Time until the bucket refills
    pub reset_after: Option<Duration>,
    /// Set when a 429 applies to every route
    pub global: bool,
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    /// Parse from lower-cased header names
    #[must_use]
    pub fn parse(headers: &HashMap<String, String>) -> Self {
        Self {
            bucket: headers.get("x-ratelimit-bucket").cloned(),
            limit: parse_header(headers, "x-ratelimit-limit"),
            remaining: parse_header(headers, "x-ratelimit-remaining"),
            reset_after: parse_seconds(headers, "x-ratelimit-reset-after"),
            global: headers
                .get("x-ratelimit-global")
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
            retry_after: parse_seconds(headers, "retry-after"),
        }
    }

    /// Check if any bucket information was present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.limit.is_none() && self.remaining.is_none() && self.reset_after.is_none()
    }
}

/// JSON body of a 429 response
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateLimitBody {
    /// Seconds to wait, fractional
    pub retry_after: f64,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl RateLimitBody {
    #[must_use]
    pub fn retry_after(&self) -> Duration {
        seconds(self.retry_after).unwrap_or_default()
    }
}

fn parse_header<T: std::str::FromStr>(headers: &HashMap<String, String>, name: &str) -> Option<T> {
    headers.get(name).and_then(|v| v.trim().parse().ok())
}

fn parse_seconds(headers: &HashMap<String, String>, name: &str) -> Option<Duration> {
    parse_header::<f64>(headers, name).and_then(seconds)
}

fn seconds(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value).ok()
}
