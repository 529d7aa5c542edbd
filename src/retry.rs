//! Retry executor for upstream Google calls.
//!
//! Wraps every outbound call with classification-based retry and
//! exponential backoff. Rate-limit and network failures are retried;
//! quota, auth, and everything else surface immediately. Process-wide
//! call metrics are accumulated in atomics and reset explicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryPolicyConfig;
use crate::error::{AppError, ErrorKind};

/// Classified upstream failure.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("authorization failed: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("resource gone: {0}")]
    Gone(String),
    #[error("upstream returned status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("invalid upstream response: {0}")]
    Invalid(String),
}

impl UpstreamError {
    /// Whether the retry loop should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::RateLimited { .. } | UpstreamError::Network(_)
        )
    }

    /// Whether the failure indicates a stale or revoked credential.
    pub fn is_auth(&self) -> bool {
        matches!(self, UpstreamError::Auth(_))
    }

    /// Whether the failure indicates an invalidated sync cursor.
    pub fn is_gone(&self) -> bool {
        matches!(self, UpstreamError::Gone(_))
    }

    fn metric_label(&self) -> &'static str {
        match self {
            UpstreamError::RateLimited { .. } => "rate_limited",
            UpstreamError::QuotaExceeded(_) => "quota_exceeded",
            UpstreamError::Auth(_) => "auth",
            UpstreamError::Network(_) => "network",
            UpstreamError::Gone(_) => "gone",
            UpstreamError::Http { .. } => "http",
            UpstreamError::Invalid(_) => "invalid",
        }
    }
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::RateLimited { retry_after } => {
                let app = AppError::new(
                    ErrorKind::UpstreamRateLimited,
                    "Google API rate limit exceeded",
                );
                match retry_after {
                    Some(seconds) => app.with_retry_after(seconds),
                    None => app,
                }
            }
            UpstreamError::QuotaExceeded(detail) => {
                AppError::new(ErrorKind::UpstreamQuotaExceeded, detail)
            }
            UpstreamError::Auth(detail) => AppError::new(ErrorKind::UpstreamAuth, detail),
            UpstreamError::Network(detail) => AppError::new(ErrorKind::UpstreamNetwork, detail),
            UpstreamError::Gone(detail) => AppError::not_found(detail),
            UpstreamError::Http { status, body } => AppError::new(
                ErrorKind::UpstreamNetwork,
                format!("Google API returned status {}: {}", status, body),
            ),
            UpstreamError::Invalid(detail) => AppError::internal(detail),
        }
    }
}

/// Body predicates Google uses for per-user rate limiting.
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "userratelimitexceeded",
    "ratelimitexceeded",
    "too many requests",
];

/// Body predicates for non-recoverable daily quota exhaustion.
const QUOTA_PATTERNS: &[&str] = &[
    "dailylimitexceeded",
    "daily limit",
    "billing",
    "quotaexceeded",
];

/// Classify an upstream HTTP response that did not succeed.
pub fn classify_http(status: u16, retry_after: Option<u64>, body: &str) -> UpstreamError {
    let body_lower = body.to_lowercase();

    match status {
        429 => UpstreamError::RateLimited { retry_after },
        401 => UpstreamError::Auth("invalid or expired access token".to_string()),
        403 => {
            if RATE_LIMIT_PATTERNS.iter().any(|p| body_lower.contains(p)) {
                UpstreamError::RateLimited { retry_after }
            } else if QUOTA_PATTERNS.iter().any(|p| body_lower.contains(p)) {
                UpstreamError::QuotaExceeded(format!("daily quota exhausted: {}", truncate(body)))
            } else {
                UpstreamError::Http {
                    status,
                    body: truncate(body),
                }
            }
        }
        410 => UpstreamError::Gone(truncate(body)),
        _ if body_lower.contains("invalid_grant") || body_lower.contains("unauthorized") => {
            UpstreamError::Auth(truncate(body))
        }
        _ => UpstreamError::Http {
            status,
            body: truncate(body),
        },
    }
}

/// Classify a reqwest transport failure.
pub fn classify_transport(err: &reqwest::Error) -> UpstreamError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        UpstreamError::Network(err.to_string())
    } else if err.is_decode() {
        UpstreamError::Invalid(err.to_string())
    } else {
        UpstreamError::Network(err.to_string())
    }
}

fn truncate(body: &str) -> String {
    if body.len() > 200 {
        format!("{}...", &body[..200])
    } else {
        body.to_string()
    }
}

/// Retry policy resolved from configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryPolicyConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            multiplier: cfg.multiplier,
        }
    }

    /// Backoff delay before retrying `attempts_completed + 1`.
    fn backoff_delay(&self, attempts_completed: u32) -> Duration {
        let exp = self.base_delay.as_millis() as f64 * self.multiplier.powi(attempts_completed as i32);
        let capped = exp.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryPolicyConfig::default())
    }
}

/// Process-wide counters for upstream traffic.
#[derive(Debug, Default)]
pub struct UpstreamMetrics {
    calls: AtomicU64,
    rate_limit_hits: AtomicU64,
    quota_hits: AtomicU64,
    network_errors: AtomicU64,
    auth_errors: AtomicU64,
    total_response_time_ms: AtomicU64,
    last_call_unix_ms: AtomicU64,
}

/// Point-in-time view of [`UpstreamMetrics`].
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub rate_limit_hits: u64,
    pub quota_hits: u64,
    pub network_errors: u64,
    pub auth_errors: u64,
    pub avg_response_time_ms: u64,
    pub last_call_unix_ms: u64,
}

impl UpstreamMetrics {
    pub const fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
            quota_hits: AtomicU64::new(0),
            network_errors: AtomicU64::new(0),
            auth_errors: AtomicU64::new(0),
            total_response_time_ms: AtomicU64::new(0),
            last_call_unix_ms: AtomicU64::new(0),
        }
    }

    fn record(&self, outcome: Result<(), &UpstreamError>, elapsed: Duration) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.last_call_unix_ms.store(now_ms, Ordering::Relaxed);

        if let Err(err) = outcome {
            match err {
                UpstreamError::RateLimited { .. } => {
                    self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                }
                UpstreamError::QuotaExceeded(_) => {
                    self.quota_hits.fetch_add(1, Ordering::Relaxed);
                }
                UpstreamError::Network(_) => {
                    self.network_errors.fetch_add(1, Ordering::Relaxed);
                }
                UpstreamError::Auth(_) => {
                    self.auth_errors.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let calls = self.calls.load(Ordering::Relaxed);
        let total_ms = self.total_response_time_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            calls,
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            quota_hits: self.quota_hits.load(Ordering::Relaxed),
            network_errors: self.network_errors.load(Ordering::Relaxed),
            auth_errors: self.auth_errors.load(Ordering::Relaxed),
            avg_response_time_ms: if calls > 0 { total_ms / calls } else { 0 },
            last_call_unix_ms: self.last_call_unix_ms.load(Ordering::Relaxed),
        }
    }

    /// Explicit reset; never implicit at process start.
    pub fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.rate_limit_hits.store(0, Ordering::Relaxed);
        self.quota_hits.store(0, Ordering::Relaxed);
        self.network_errors.store(0, Ordering::Relaxed);
        self.auth_errors.store(0, Ordering::Relaxed);
        self.total_response_time_ms.store(0, Ordering::Relaxed);
        self.last_call_unix_ms.store(0, Ordering::Relaxed);
    }
}

/// Process-wide upstream metrics instance.
pub static UPSTREAM_METRICS: UpstreamMetrics = UpstreamMetrics::new();

/// Execute `operation` under the retry policy.
///
/// The operation is a factory producing one future per attempt. Sleeps are
/// cancellable; when `cancel` fires or the deadline would be exceeded by
/// the next backoff, the last classified error is surfaced instead of
/// waiting out the budget.
pub async fn execute<T, F, Fut>(
    op_name: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    deadline: Option<tokio::time::Instant>,
    mut operation: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut attempt: u32 = 0;

    loop {
        let started = tokio::time::Instant::now();
        let result = operation().await;
        let elapsed = started.elapsed();

        match result {
            Ok(value) => {
                UPSTREAM_METRICS.record(Ok(()), elapsed);
                counter!("upstream_calls_total", &[("op", op_name.to_string())]).increment(1);
                return Ok(value);
            }
            Err(err) => {
                UPSTREAM_METRICS.record(Err(&err), elapsed);
                counter!(
                    "upstream_call_errors_total",
                    &[
                        ("op", op_name.to_string()),
                        ("kind", err.metric_label().to_string()),
                    ]
                )
                .increment(1);

                attempt += 1;
                if !err.is_retryable() || attempt >= policy.max_attempts {
                    return Err(err);
                }

                let mut delay = policy.backoff_delay(attempt - 1);
                if let UpstreamError::RateLimited {
                    retry_after: Some(seconds),
                } = &err
                {
                    delay = delay.max(Duration::from_secs(*seconds));
                }

                if let Some(deadline) = deadline
                    && tokio::time::Instant::now() + delay >= deadline
                {
                    warn!(op = op_name, "deadline elapsed, surfacing last error");
                    return Err(err);
                }

                debug!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying upstream call"
                );

                tokio::select! {
                    _ = cancel.cancelled() => {
                        warn!(op = op_name, "cancelled during retry backoff");
                        return Err(err);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
