//! Retry engine with exponential backoff and jitter.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Substrings that mark an error as transient.
///
/// Matched case-insensitively against the full error chain. Covers the
/// usual connection-level failures plus PostgreSQL's startup/shutdown and
/// connection-limit messages.
const TRANSIENT_PATTERNS: &[&str] = &[
    "econnrefused",
    "econnreset",
    "etimedout",
    "connection refused",
    "connection reset",
    "timed out",
    "socket hang up",
    "too many connections",
    "too many clients",
    "database system is starting up",
    "database system is shutting down",
    "server closed the connection unexpectedly",
    "could not connect to server",
    "ssl handshake",
    "tls handshake",
];

/// Check a rendered error message for well-known transient conditions.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Default retryability predicate: walks the error source chain and looks
/// for transient connection conditions.
pub fn default_is_retryable<E: std::error::Error>(err: &E) -> bool {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    is_transient_message(&rendered)
}

/// Backoff configuration for retried operations.
///
/// Attempt `n` (1-based) sleeps `min(max_delay, initial_delay *
/// multiplier^(n-1))` before retrying, optionally multiplied by a uniform
/// random factor in `[1.0, 1.25]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Exponential growth factor.
    pub multiplier: f64,
    /// Whether to apply the jitter factor.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay ceiling.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the exponential growth factor.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Validate the policy.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_attempts < 1 {
            return Err(CoreError::config("retry.max_attempts must be >= 1"));
        }
        if self.initial_delay > self.max_delay {
            return Err(CoreError::config(
                "retry.initial_delay must not exceed retry.max_delay",
            ));
        }
        if self.multiplier < 1.0 {
            return Err(CoreError::config("retry.multiplier must be >= 1"));
        }
        Ok(())
    }

    /// Base delay (without jitter) after the given 1-based failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    fn sleep_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(1.0..1.25);
            base.mul_f64(factor)
        } else {
            base
        }
    }

    /// Run `op` until it succeeds, the attempt budget is spent, or
    /// `is_retryable` rejects the error.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        is_retryable: P,
        mut op: F,
    ) -> Result<RetryOutcome<T>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let started = Instant::now();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    return Ok(RetryOutcome {
                        value,
                        attempts: attempt,
                        total_time: started.elapsed(),
                    });
                }
                Err(err) if attempt >= self.max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        error: err,
                    });
                }
                Err(err) if !is_retryable(&err) => {
                    return Err(RetryError::Fatal {
                        attempts: attempt,
                        error: err,
                    });
                }
                Err(err) => {
                    let delay = self.sleep_for_attempt(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// A successful retried operation, with bookkeeping.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The operation's result.
    pub value: T,
    /// How many attempts it took.
    pub attempts: u32,
    /// Wall-clock time across all attempts and sleeps.
    pub total_time: Duration,
}

/// A retried operation that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::fmt::Display> {
    /// All attempts were used up; wraps the final error.
    #[error("retry budget exhausted after {attempts} attempts: {error}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// The final error.
        error: E,
    },

    /// The retryability predicate rejected the error.
    #[error("non-retryable error after {attempts} attempts: {error}")]
    Fatal {
        /// Attempts made.
        attempts: u32,
        /// The rejected error.
        error: E,
    },
}

impl<E: std::fmt::Display> RetryError<E> {
    /// Attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Fatal { attempts, .. } => *attempts,
        }
    }

    /// Unwrap the underlying error.
    pub fn into_source(self) -> E {
        match self {
            Self::Exhausted { error, .. } | Self::Fatal { error, .. } => error,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_policy_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::new().max_attempts(0).validate().is_err());
        assert!(
            RetryPolicy::new()
                .initial_delay(Duration::from_secs(10))
                .max_delay(Duration::from_secs(1))
                .validate()
                .is_err()
        );
        assert!(RetryPolicy::new().multiplier(0.5).validate().is_err());
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::new()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(450))
            .multiplier(2.0);

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        // Capped at max_delay from here on.
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(450));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(450));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::new()
            .initial_delay(Duration::from_millis(100))
            .jitter(true);
        for _ in 0..64 {
            let d = policy.sleep_for_attempt(1);
            assert!(d >= Duration::from_millis(100));
            assert!(d < Duration::from_millis(125));
        }
    }

    #[test]
    fn test_transient_patterns() {
        assert!(is_transient_message(
            "error connecting to server: Connection refused (os error 111)"
        ));
        assert!(is_transient_message("FATAL: too many clients already"));
        assert!(is_transient_message(
            "the database system is starting up"
        ));
        assert!(!is_transient_message("syntax error at or near \"SELEC\""));
        assert!(!is_transient_message("division by zero"));
    }

    #[tokio::test]
    async fn test_run_succeeds_first_try() {
        let policy = RetryPolicy::default();
        let outcome = policy
            .run(|_: &std::io::Error| true, || async { Ok::<_, std::io::Error>(42) })
            .await
            .unwrap();
        assert_eq!(outcome.value, 42);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_run_retries_then_succeeds() {
        let policy = RetryPolicy::new()
            .max_attempts(5)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(2))
            .jitter(false);

        let calls = AtomicU32::new(0);
        let outcome = policy
            .run(
                |_: &std::io::Error| true,
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(std::io::Error::other("connection reset"))
                    } else {
                        Ok("up")
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.value, "up");
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_run_exhausts_budget() {
        let policy = RetryPolicy::new()
            .max_attempts(3)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(1))
            .jitter(false);

        let err = policy
            .run(
                |_: &std::io::Error| true,
                || async { Err::<(), _>(std::io::Error::other("connection refused")) },
            )
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 3);
        assert!(matches!(err, RetryError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn test_run_stops_on_fatal_error() {
        let policy = RetryPolicy::new().max_attempts(5);
        let calls = AtomicU32::new(0);

        let err = policy
            .run(
                |e: &std::io::Error| e.to_string().contains("transient"),
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(std::io::Error::other("syntax error"))
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RetryError::Fatal { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
