//! Rate-limit-aware request dispatcher
//!
//! Every request goes through three gates before it is sent:
//!
//! 1. its route bucket, locked for the lifetime of the request so calls
//!    on one bucket are serialized in arrival order;
//! 2. a preemptive wait when the bucket is known to be exhausted;
//! 3. the global limiter.
//!
//! A 429 is honoured and retried once without counting as an attempt; a
//! second consecutive 429 surfaces as `RestError::RateLimited`. Server
//! errors and transport failures are retried with exponential backoff up
//! to `max_attempts`.
//!
//! Once cancelled, every wait point above gives up with
//! `RestError::Closed` and nothing more is sent.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use pylon_common::{ClientConfig, ExponentialBackoff, RestConfig};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{RestError, RestResult};
use crate::ratelimit::{BucketStore, GlobalLimiter, RateLimitBody, RateLimitHeaders};
use crate::route::Route;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

/// Everything but the RFC 3986 unreserved characters is escaped
const REASON_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub struct RequestDispatcher {
    transport: Arc<dyn HttpTransport>,
    buckets: BucketStore,
    global: GlobalLimiter,
    config: RestConfig,
    token: String,
    closed: AtomicBool,
    cancel: CancellationToken,
    inflight: watch::Sender<usize>,
}

impl RequestDispatcher {
    /// Create a dispatcher sending over HTTPS
    pub fn new(config: &ClientConfig) -> RestResult<Self> {
        let transport = ReqwestTransport::new(&config.rest.user_agent)?;
        Ok(Self::with_transport(
            Arc::new(transport),
            config.token.clone(),
            config.rest.clone(),
        ))
    }

    /// Create a dispatcher over a custom transport
    pub fn with_transport(
        transport: Arc<dyn HttpTransport>,
        token: impl Into<String>,
        config: RestConfig,
    ) -> Self {
        let (inflight, _) = watch::channel(0);
        Self {
            transport,
            buckets: BucketStore::new(),
            global: GlobalLimiter::new(config.global_rate),
            config,
            token: token.into(),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            inflight,
        }
    }

    /// Send a request and decode the JSON response
    ///
    /// An empty response body decodes to `Value::Null`.
    #[instrument(skip(self, route, body), fields(route = %route))]
    pub async fn request(&self, route: &Route, body: Option<Value>) -> RestResult<Value> {
        let _inflight = InflightGuard::enter(&self.inflight);
        if self.is_closed() {
            return Err(RestError::Closed);
        }

        let key = route.bucket_key();
        let bucket = self.buckets.get_or_create(&key);
        let mut state = self.or_cancelled(bucket.lock()).await?;
        if self.is_closed() {
            return Err(RestError::Closed);
        }

        let mut backoff = ExponentialBackoff::new(self.config.retry_base(), self.config.retry_cap());
        let mut attempts = 0u32;
        let mut limited = false;

        loop {
            if let Some(wait) = state.wait_time(Instant::now()) {
                debug!(bucket = %key, wait_ms = wait.as_millis() as u64, "Bucket exhausted, waiting for reset");
                self.or_cancelled(tokio::time::sleep(wait)).await?;
            }
            self.or_cancelled(self.global.acquire()).await?;

            attempts += 1;
            let request = self.build_request(route, body.as_ref());
            let result = self.or_cancelled(self.transport.send(request)).await?;

            let response = match result {
                Ok(response) => response,
                Err(e) if e.is_retryable() => {
                    self.backoff_or_give_up(&mut backoff, attempts, &e).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let headers = RateLimitHeaders::parse(&response.headers);
            state.update(&headers, Instant::now());

            if response.status == 429 {
                attempts -= 1;
                let (retry_after, global) = rate_limit_of(&response, &headers);
                if global {
                    self.global.block_for(retry_after);
                } else {
                    state.exhaust_for(retry_after, Instant::now());
                }

                if limited {
                    warn!(bucket = %key, retry_after_ms = retry_after.as_millis() as u64, global, "Rate limited twice in a row");
                    return Err(RestError::RateLimited {
                        bucket: key,
                        retry_after,
                        global,
                    });
                }
                warn!(bucket = %key, retry_after_ms = retry_after.as_millis() as u64, global, "Rate limited, retrying");
                limited = true;
                continue;
            }
            limited = false;

            if response.is_success() {
                return decode(&response);
            }

            let err = RestError::Http {
                status: response.status,
                body: response.text(),
            };
            if !err.is_retryable() {
                return Err(err);
            }
            self.backoff_or_give_up(&mut backoff, attempts, &err).await?;
        }
    }

    async fn backoff_or_give_up(
        &self,
        backoff: &mut ExponentialBackoff,
        attempts: u32,
        err: &RestError,
    ) -> RestResult<()> {
        if attempts >= self.config.max_attempts {
            return Err(RestError::Exhausted {
                attempts,
                last: err.to_string(),
            });
        }
        let delay = backoff.next_delay();
        warn!(attempt = attempts, delay_ms = delay.as_millis() as u64, error = %err, "Request failed, retrying");
        self.or_cancelled(tokio::time::sleep(delay)).await
    }

    /// Run `fut` unless the dispatcher is cancelled first
    async fn or_cancelled<F: Future>(&self, fut: F) -> RestResult<F::Output> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(RestError::Closed),
            out = fut => Ok(out),
        }
    }

    fn build_request(&self, route: &Route, body: Option<&Value>) -> HttpRequest {
        let mut headers = vec![("authorization".to_string(), format!("Bot {}", self.token))];
        if let Some(reason) = route.reason() {
            headers.push(("x-audit-log-reason".to_string(), utf8_percent_encode(reason, REASON_ENCODE_SET).to_string()));
        }

        HttpRequest {
            method: route.method().clone(),
            url: format!("{}{}", self.config.api_base_url.trim_end_matches('/'), route.path()),
            headers,
            body: body.cloned(),
        }
    }

    /// Stop accepting new requests
    ///
    /// Requests already admitted keep running; see [`Self::drain`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Request dispatcher closed");
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close and abort every admitted request with `RestError::Closed`
    pub fn cancel(&self) {
        self.close();
        if !self.cancel.is_cancelled() {
            debug!(inflight = self.inflight(), "Cancelling in-flight requests");
            self.cancel.cancel();
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for in-flight requests to finish
    ///
    /// Returns `false` if some were still running after `grace`; those are
    /// then cancelled and nothing more reaches the transport.
    pub async fn drain(&self, grace: Duration) -> bool {
        let mut rx = self.inflight.subscribe();
        let done = matches!(
            tokio::time::timeout(grace, rx.wait_for(|n| *n == 0)).await,
            Ok(Ok(_))
        );
        if !done {
            self.cancel();
        }
        done
    }

    /// Number of requests currently admitted
    pub fn inflight(&self) -> usize {
        *self.inflight.borrow()
    }

    #[inline]
    pub fn buckets(&self) -> &BucketStore {
        &self.buckets
    }

    #[inline]
    pub fn global(&self) -> &GlobalLimiter {
        &self.global
    }

    /// Forget idle buckets whose reset has passed
    pub fn prune_buckets(&self) -> usize {
        self.buckets.prune_expired(Instant::now())
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("api_base_url", &self.config.api_base_url)
            .field("buckets", &self.buckets.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Counts a request as in flight until dropped
struct InflightGuard<'a> {
    counter: &'a watch::Sender<usize>,
}

impl<'a> InflightGuard<'a> {
    fn enter(counter: &'a watch::Sender<usize>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self { counter }
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.counter.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Retry delay and scope of a 429, preferring the JSON body over headers
fn rate_limit_of(response: &HttpResponse, headers: &RateLimitHeaders) -> (Duration, bool) {
    match serde_json::from_slice::<RateLimitBody>(&response.body) {
        Ok(body) => (body.retry_after(), body.global || headers.global),
        Err(_) => (
            headers
                .retry_after
                .or(headers.reset_after)
                .unwrap_or(Duration::from_secs(1)),
            headers.global,
        ),
    }
}

fn decode(response: &HttpResponse) -> RestResult<Value> {
    if response.body.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&response.body)?)
}
