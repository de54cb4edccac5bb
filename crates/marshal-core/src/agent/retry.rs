//! Resilience wrapper for upstream calls.
//!
//! Classifies failures and retries transient ones with exponential backoff
//! and jitter. Cancellation and auth/validation failures are never retried,
//! and unclassified errors fail fast so programming errors are not masked
//! as transient. After retries exhaust, an optional fallback hook may
//! supply a substitute model for exactly one more attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::context::DelegationContext;
use super::events::{AgentEvent, StatusCode};
use crate::ai::error::UpstreamError;

/// Statuses retried after a backoff delay.
const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Statuses that signal a permanent (auth/validation) failure.
const PERMANENT_STATUSES: &[u16] = &[400, 401, 403, 404, 422];

/// Textual markers of transient failure for errors without a status.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "network",
    "overloaded",
    "capacity",
    "rate limit",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Cancelled,
    Permanent,
    Transient,
    /// Neither clearly transient nor clearly permanent. Treated as
    /// non-retryable.
    Unclassified,
}

pub fn classify(err: &UpstreamError) -> ErrorClass {
    if err.is_cancelled() {
        return ErrorClass::Cancelled;
    }
    if let Some(status) = err.status() {
        if RETRYABLE_STATUSES.contains(&status) {
            return ErrorClass::Transient;
        }
        if PERMANENT_STATUSES.contains(&status) {
            return ErrorClass::Permanent;
        }
        return ErrorClass::Unclassified;
    }
    let message = err.message().to_ascii_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| message.contains(m)) {
        return ErrorClass::Transient;
    }
    ErrorClass::Unclassified
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter drawn uniformly in `[0, jitter_factor * delay]`.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    /// Capped exponential delay before jitter: `min(base * 2^attempt, cap)`,
    /// floored at the upstream's retry-after hint when present.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(20));
        let mut delay = Duration::from_millis(exp_ms.min(self.max_delay.as_millis() as u64));
        if let Some(hint) = retry_after {
            delay = delay.max(hint);
        }
        delay
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let max_jitter_ms = (delay.as_millis() as f64 * self.jitter_factor) as u64;
        if max_jitter_ms == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..=max_jitter_ms);
        delay + Duration::from_millis(jitter)
    }
}

/// Fallback hook: given the final error, optionally supply a substitute
/// model identifier for exactly one more attempt.
pub type FallbackFn = dyn Fn(&UpstreamError) -> Option<String> + Send + Sync;

/// Run `op` with classification-driven retry. `op` receives an optional
/// model override, set only on the fallback attempt.
///
/// Backoff sleeps race against `cancel`; an abort during a pending retry
/// returns `UpstreamError::Cancelled` immediately.
pub async fn with_resilience<T, F, Fut>(
    mut op: F,
    config: &RetryConfig,
    fallback: Option<&FallbackFn>,
    cancel: &CancellationToken,
) -> Result<T, UpstreamError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if cancel.is_cancelled() {
            return Err(UpstreamError::Cancelled);
        }

        match op(None).await {
            Ok(value) => return Ok(value),
            Err(err) => match classify(&err) {
                ErrorClass::Cancelled => return Err(UpstreamError::Cancelled),
                ErrorClass::Permanent | ErrorClass::Unclassified => return Err(err),
                ErrorClass::Transient => {
                    if attempt == config.max_retries {
                        last_err = Some(err);
                        break;
                    }
                    let delay = config.jittered(config.delay_for_attempt(attempt, err.retry_after()));
                    debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient upstream error, retrying after backoff"
                    );
                    DelegationContext::emit_current(AgentEvent::Status {
                        code: StatusCode::Retrying,
                    });
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    last_err = Some(err);
                }
            },
        }
    }

    let err = last_err.unwrap_or_else(|| UpstreamError::from_message("retries exhausted"));

    // One substitute-model attempt, no further retries on it.
    if let Some(hook) = fallback {
        if let Some(substitute) = hook(&err) {
            warn!(model = %substitute, "retries exhausted, attempting fallback model");
            DelegationContext::emit_current(AgentEvent::Status {
                code: StatusCode::Fallback,
            });
            return match op(Some(substitute)).await {
                Ok(value) => Ok(value),
                Err(fallback_err) if fallback_err.is_cancelled() => Err(UpstreamError::Cancelled),
                Err(fallback_err) => Err(fallback_err),
            };
        }
    }

    Err(err)
}
