//! Rate limiting - per-route buckets and the global limiter

mod bucket;
mod global;
mod headers;

pub use bucket::{BucketState, BucketStore, RateLimitBucket};
pub use global::GlobalLimiter;
pub use headers::{RateLimitBody, RateLimitHeaders};
