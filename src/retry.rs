//! Bounded retries with exponential backoff, for flaky networks and busy servers

use std::future::Future;
use std::time::Duration;

use crate::error::RemoteError;

/// How stubbornly remote operations are retried
#[derive(Clone, Debug)]
pub struct RetryOptions {
    /// Total number of tries, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: u32,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_factor: 2,
        }
    }
}

impl RetryOptions {
    /// A single attempt, no second chances
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// The pause after the `attempt`-th failure (1-based), jitter included
    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.saturating_pow(attempt.saturating_sub(1));
        let delay = self.initial_delay.saturating_mul(factor).min(self.max_delay);
        // Up to 25% of extra random delay, so that concurrent clients do not
        // hammer a recovering server in lockstep
        let jitter_ms = rand::random::<u64>() % (delay.as_millis() as u64 / 4 + 1);
        delay + Duration::from_millis(jitter_ms)
    }
}

/// Run `operation`, retrying while `is_transient` says the failure is worth
/// another try. The last error is returned unchanged.
pub async fn with_retry_if<T, E, F, Fut, P>(
    options: &RetryOptions,
    is_transient: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = options.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_attempts || is_transient(&err) == false {
                    return Err(err);
                }
                let delay = options.delay_after(attempt);
                log::debug!(
                    "Attempt {}/{} failed ({}), retrying in {:?}",
                    attempt, max_attempts, err, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// [`with_retry_if`] with the default transient predicate of [`RemoteError`]
pub async fn with_retry<T, F, Fut>(options: &RetryOptions, operation: F) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    with_retry_if(options, RemoteError::is_transient, operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use url::Url;

    fn fast_options() -> RetryOptions {
        RetryOptions {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            ..RetryOptions::default()
        }
    }

    fn http_503() -> RemoteError {
        RemoteError::Http {
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            url: Url::parse("https://dav.example.com/ab/").unwrap(),
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let attempts = Cell::new(0_u32);
        let result = with_retry(&fast_options(), || {
            attempts.set(attempts.get() + 1);
            let n = attempts.get();
            async move {
                if n < 3 { Err(http_503()) } else { Ok(42) }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test]
    async fn the_last_error_is_returned_unchanged() {
        let attempts = Cell::new(0_u32);
        let result: Result<(), RemoteError> = with_retry(&fast_options(), || {
            attempts.set(attempts.get() + 1);
            let n = attempts.get();
            async move { Err(RemoteError::Other(format!("timed out (try {})", n))) }
        })
        .await;

        assert_eq!(attempts.get(), 3);
        assert_eq!(result.unwrap_err().to_string(), "timed out (try 3)");
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let attempts = Cell::new(0_u32);
        let result: Result<(), RemoteError> = with_retry(&fast_options(), || {
            attempts.set(attempts.get() + 1);
            async { Err(RemoteError::Other("no parseable UID".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test]
    async fn the_predicate_can_be_overridden() {
        let attempts = Cell::new(0_u32);
        let result: Result<(), RemoteError> = with_retry_if(&fast_options(), |_| false, || {
            attempts.set(attempts.get() + 1);
            async { Err(http_503()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test]
    async fn no_retry_means_a_single_attempt() {
        let attempts = Cell::new(0_u32);
        let options = RetryOptions { initial_delay: Duration::from_millis(1), ..RetryOptions::no_retry() };
        let result: Result<(), RemoteError> = with_retry(&options, || {
            attempts.set(attempts.get() + 1);
            async { Err(http_503()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn delays_grow_but_stay_capped() {
        let options = RetryOptions::default();
        let first = options.delay_after(1);
        assert!(first >= options.initial_delay);

        let late = options.delay_after(10);
        // cap plus at most 25% jitter
        assert!(late <= options.max_delay + options.max_delay / 4);
    }
}
