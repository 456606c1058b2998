//! # Retry Policies
//!
//! Retry logic for backend calls, with jittered exponential backoff and
//! error-category awareness. Only errors for which
//! [`AuthError::is_retryable`] holds are retried; a definitive `401` fails
//! on the first attempt.
//!
//! ## Predefined Policies
//!
//! | Policy | Attempts | Delays | Use Case |
//! |--------|----------|--------|----------|
//! | [`RetryPolicy::identity()`] | 3 | 1s, 2s (±30%, cap 5s) | Identity checks |
//! | [`RetryPolicy::none()`] | 1 | none | Token refresh, health probes |
//!
//! ## Usage
//!
//! ```rust
//! use auth_orchestrator::retry::{RetryPolicy, with_retry};
//! use auth_orchestrator::AuthError;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::time::Duration;
//!
//! let attempts = AtomicUsize::new(0);
//! let rt = tokio::runtime::Builder::new_current_thread()
//!     .enable_time()
//!     .build()
//!     .unwrap();
//!
//! let policy = RetryPolicy::custom(3, Duration::from_millis(1), Duration::from_millis(5));
//! let result = rt.block_on(async {
//!     with_retry(&policy, || {
//!         let attempt = attempts.fetch_add(1, Ordering::SeqCst);
//!         async move {
//!             if attempt == 0 {
//!                 Err(AuthError::Http { status: 503 })
//!             } else {
//!                 Ok::<_, AuthError>(42)
//!             }
//!         }
//!     })
//!     .await
//! });
//!
//! assert_eq!(result.unwrap(), 42);
//! ```

use std::time::Duration;

use crate::backoff::jittered;
use crate::config::IdentityConfig;
use crate::error::{AuthError, AuthResult};

/// Jitter applied to identity retry delays (±30%).
const IDENTITY_JITTER: f64 = 0.3;

/// Policy controlling how failed operations are retried.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
    /// No retries, fail immediately on error.
    None,

    /// Retry with exponential backoff.
    Backoff {
        /// Maximum number of retry attempts (not counting the initial attempt).
        max_retries: u32,

        /// Initial delay before the first retry.
        base_delay: Duration,

        /// Maximum delay between retries (exponential backoff cap).
        max_delay: Duration,

        /// Uniform jitter fraction applied to each delay.
        jitter: f64,
    },
}

impl RetryPolicy {
    #[must_use]
    pub fn none() -> Self {
        Self::None
    }

    /// 3 total attempts, 1s base delay doubling to a 5s cap, ±30% jitter.
    #[must_use]
    pub fn identity() -> Self {
        Self::from_identity_config(&IdentityConfig::default())
    }

    /// Identity policy with the configured attempt count and delays.
    #[must_use]
    pub fn from_identity_config(config: &IdentityConfig) -> Self {
        if config.max_attempts <= 1 {
            return Self::None;
        }
        Self::Backoff {
            max_retries: config.max_attempts - 1,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: IDENTITY_JITTER,
        }
    }

    /// Custom backoff policy without jitter.
    ///
    /// # Examples
    ///
    /// ```
    /// use auth_orchestrator::retry::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::custom(5, Duration::from_millis(200), Duration::from_secs(30));
    /// ```
    #[must_use]
    pub fn custom(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self::Backoff {
            max_retries,
            base_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    /// Total attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryPolicy::None => 1,
            RetryPolicy::Backoff { max_retries, .. } => max_retries.saturating_add(1),
        }
    }
}

/// Execute an async operation with retry logic.
///
/// Non-retryable errors are returned immediately regardless of the policy.
/// On exhaustion, returns [`AuthError::RetriesExhausted`] wrapping the last
/// error encountered.
///
/// # Errors
/// Returns any error from the operation, including a wrapped
/// [`AuthError::RetriesExhausted`] when retry attempts are exhausted.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> AuthResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = AuthResult<T>>,
{
    let (max_retries, base_delay, max_delay, jitter) = match policy {
        RetryPolicy::None => return operation().await,
        RetryPolicy::Backoff {
            max_retries,
            base_delay,
            max_delay,
            jitter,
        } => (*max_retries, *base_delay, *max_delay, *jitter),
    };

    let mut delay = base_delay;
    let mut attempt = 0;
    loop {
        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !err.is_retryable() {
            return Err(err);
        }

        if attempt == max_retries {
            return Err(AuthError::RetriesExhausted {
                attempts: attempt + 1,
                last_error: Box::new(err),
            });
        }

        let sleep_for = jittered(delay, jitter).min(max_delay);
        tracing::warn!(
            attempt = attempt + 1,
            max = max_retries + 1,
            error = %err,
            delay_ms = u64::try_from(sleep_for.as_millis()).unwrap_or(u64::MAX),
            "Retrying after transient error"
        );

        tokio::time::sleep(sleep_for).await;

        delay = std::cmp::min(delay * 2, max_delay);
        attempt += 1;
    }
}
