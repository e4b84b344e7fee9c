//! Retrying HTTP client shared by every outbound call.
//!
//! - Per-attempt timeout (never cumulative over retries).
//! - Exponential backoff with jitter; jitter is mockable so tests pin it.
//! - Retries on a configurable status list plus transport errors.
//! - Every request and every backoff sleep races the caller's cancellation
//!   token and the process-wide shutdown token.
//! - After [`begin_shutdown`], new requests fail with a stable sentinel
//!   before any network I/O.
//!
//! Non-retryable HTTP statuses are not errors here: the response is returned
//! and the caller inspects the status, the same way a bare `reqwest` call
//! would behave without `error_for_status`.

use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Stable sentinel; callers branch on this exact message.
pub const SHUTDOWN_SENTINEL: &str = "http client is shutting down";

/// Statuses retried by default.
pub const DEFAULT_RETRY_STATUSES: [u16; 8] = [408, 409, 425, 429, 500, 502, 503, 504];

static SHUTDOWN: Mutex<Option<CancellationToken>> = Mutex::new(None);

fn shutdown_token() -> CancellationToken {
    let mut guard = SHUTDOWN.lock().expect("shutdown token poisoned");
    guard.get_or_insert_with(CancellationToken::new).clone()
}

/// Cancels the process-wide token: in-flight calls abort at their next I/O
/// step and subsequent calls fail fast.
pub fn begin_shutdown() {
    shutdown_token().cancel();
}

pub fn is_shutting_down() -> bool {
    shutdown_token().is_cancelled()
}

/// Replaces the process-wide token with a fresh one. Test hook.
pub fn reset_shutdown_for_tests() {
    let mut guard = SHUTDOWN.lock().expect("shutdown token poisoned");
    *guard = Some(CancellationToken::new());
}

pub type HttpResult<T> = Result<T, HttpClientError>;

#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("{SHUTDOWN_SENTINEL}")]
    ShuttingDown,

    #[error("request cancelled")]
    Cancelled,

    /// Transport failure (DNS/connect/reset/per-attempt timeout) that
    /// survived every retry.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Retry/backoff knobs for one call site.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Extra attempts after the first (total attempts = retries + 1).
    pub retries: u32,
    /// Base backoff; attempt `n` sleeps `backoff_ms * 2^n + jitter`.
    pub backoff_ms: u64,
    pub retry_on_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retries: 2,
            backoff_ms: 400,
            retry_on_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn no_retries(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            retries: 0,
            backoff_ms: 0,
            retry_on_statuses: Vec::new(),
        }
    }

    fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retry_on_statuses.contains(&status.as_u16())
    }
}

/// Jitter source for backoff sleeps. Tests pin [`JitterSource::Fixed`].
#[derive(Debug, Clone, Copy)]
pub enum JitterSource {
    Random,
    Fixed(u64),
}

impl JitterSource {
    fn sample(&self, upper_ms: u64) -> u64 {
        match self {
            JitterSource::Fixed(ms) => (*ms).min(upper_ms),
            JitterSource::Random => {
                if upper_ms == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..upper_ms)
                }
            }
        }
    }
}

/// Options for a single request. The body is owned bytes so the attempt loop
/// can resend it.
#[derive(Debug, Default)]
pub struct RequestOptions {
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub cancel: Option<CancellationToken>,
}

/// Backoff for attempt `n`: `backoff_ms * 2^n + jitter ∈ [0, 0.2 * backoff_ms)`.
pub fn backoff_delay_ms(attempt: u32, backoff_ms: u64, jitter: JitterSource) -> u64 {
    let base = backoff_ms.saturating_mul(1u64 << attempt.min(16));
    base.saturating_add(jitter.sample(backoff_ms / 5))
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    jitter: JitterSource,
}

impl HttpClient {
    pub fn new(user_agent: &str) -> HttpResult<Self> {
        Self::with_jitter(user_agent, JitterSource::Random)
    }

    pub fn with_jitter(user_agent: &str, jitter: JitterSource) -> HttpResult<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
        Ok(Self { inner, jitter })
    }

    /// Executes one request under the retry policy.
    ///
    /// Returns the final response (success or non-retryable status) or the
    /// error that survived every retry. Shutdown and caller cancellation win
    /// over everything, including backoff sleeps.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        opts: RequestOptions,
        policy: &RetryPolicy,
    ) -> HttpResult<reqwest::Response> {
        let shutdown = shutdown_token();
        let caller = opts.cancel.clone();

        let mut last_transport: Option<String> = None;
        for attempt in 0..=policy.retries {
            if shutdown.is_cancelled() {
                return Err(HttpClientError::ShuttingDown);
            }
            if caller.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(HttpClientError::Cancelled);
            }

            if attempt > 0 {
                let delay = backoff_delay_ms(attempt - 1, policy.backoff_ms, self.jitter);
                debug!(url, attempt, delay_ms = delay, "http retry backoff");
                tokio::select! {
                    _ = shutdown.cancelled() => return Err(HttpClientError::ShuttingDown),
                    _ = cancelled_or_pending(&caller) => return Err(HttpClientError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                }
            }

            let mut req = self
                .inner
                .request(method.clone(), url)
                .headers(opts.headers.clone())
                .timeout(Duration::from_millis(policy.timeout_ms));
            if let Some(body) = &opts.body {
                req = req.body(body.clone());
            }

            let outcome = tokio::select! {
                _ = shutdown.cancelled() => return Err(HttpClientError::ShuttingDown),
                _ = cancelled_or_pending(&caller) => return Err(HttpClientError::Cancelled),
                res = req.send() => res,
            };

            match outcome {
                Ok(resp) => {
                    let status = resp.status();
                    if policy.is_retryable_status(status) && attempt < policy.retries {
                        warn!(url, status = status.as_u16(), attempt, "retryable status");
                        last_transport = Some(format!("status {}", status.as_u16()));
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "transport error");
                    last_transport = Some(e.to_string());
                    if attempt < policy.retries {
                        continue;
                    }
                }
            }
        }

        Err(HttpClientError::Transport(
            last_transport.unwrap_or_else(|| "exhausted retries".into()),
        ))
    }
}

async fn cancelled_or_pending(token: &Option<CancellationToken>) {
    match token {
        Some(t) => t.cancelled().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt_with_pinned_jitter() {
        let j = JitterSource::Fixed(7);
        assert_eq!(backoff_delay_ms(0, 400, j), 407);
        assert_eq!(backoff_delay_ms(1, 400, j), 807);
        assert_eq!(backoff_delay_ms(2, 400, j), 1_607);
    }

    #[test]
    fn jitter_is_bounded_by_a_fifth_of_base() {
        // Fixed jitter above the bound is clamped, matching the random range.
        assert_eq!(backoff_delay_ms(0, 100, JitterSource::Fixed(500)), 120);
        for _ in 0..50 {
            let d = backoff_delay_ms(0, 100, JitterSource::Random);
            assert!((100..120).contains(&d));
        }
    }

    // Both halves live in one test: the shutdown token is process-wide, so
    // concurrent tests toggling it would race each other.
    #[tokio::test]
    async fn cancellation_and_shutdown_fail_before_any_io() {
        reset_shutdown_for_tests();

        // Caller cancellation wins while the process is healthy.
        let client =
            HttpClient::with_jitter("mr-agent-test/0.1", JitterSource::Fixed(0)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .request(
                Method::GET,
                "http://127.0.0.1:9/never",
                RequestOptions {
                    cancel: Some(cancel),
                    ..Default::default()
                },
                &RetryPolicy::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HttpClientError::Cancelled));

        // After shutdown, requests fail with the stable sentinel.
        begin_shutdown();
        let err = client
            .request(
                Method::GET,
                "http://127.0.0.1:9/never",
                RequestOptions::default(),
                &RetryPolicy::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), SHUTDOWN_SENTINEL);
        reset_shutdown_for_tests();
    }
}
