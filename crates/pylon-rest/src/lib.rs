//! # pylon-rest
//!
//! REST request pipeline with per-route rate limit buckets, a global
//! limiter, retry with backoff, and graceful draining on shutdown.

pub mod dispatcher;
pub mod endpoints;
pub mod error;
pub mod ratelimit;
pub mod route;
pub mod transport;

pub use dispatcher::RequestDispatcher;
pub use endpoints::{GatewayBot, SessionStartLimit};
pub use error::{RestError, RestResult};
pub use ratelimit::{BucketState, BucketStore, GlobalLimiter, RateLimitBucket, RateLimitHeaders};
pub use reqwest::Method;
pub use route::Route;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
