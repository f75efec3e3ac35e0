//! Transport-level retry for the trigger request.
//!
//! Retries connect failures, timeouts and the configured status codes with
//! exponential backoff. Anything else is returned to the caller as-is.
//!
//! The trigger is a non-idempotent POST. A timeout or a forcelisted status
//! does not prove the worker ignored the request, so a retry can start the
//! worker twice for one iteration. Set `retry_policy.total = 0` to send
//! exactly one request per iteration.

use std::future::Future;

use tracing::{debug, warn};

use crate::config::RetryPolicyConfig;

/// Determines if a reqwest error is retryable.
fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

/// Execute a request with retry logic.
///
/// `make_request` is called once per attempt. On a retryable status the
/// response of the final attempt is returned, so the caller still sees the status.
pub async fn with_retry<F, Fut>(
    policy: &RetryPolicyConfig,
    target: &str,
    make_request: F,
) -> Result<reqwest::Response, reqwest::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let max_attempts = policy.total.saturating_add(1);
    let mut attempt = 0;

    loop {
        let last_attempt = attempt + 1 >= max_attempts;

        match make_request().await {
            Ok(response) => {
                let status = response.status();

                if policy.should_retry_status(status.as_u16()) && !last_attempt {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        target_url = target,
                        status = %status,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retryable status code, will retry after delay"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                if attempt > 0 {
                    debug!(
                        target_url = target,
                        status = %status,
                        attempt = attempt + 1,
                        "Request completed after retry"
                    );
                }

                return Ok(response);
            }
            Err(error) => {
                if is_retryable_error(&error) && !last_attempt {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        target_url = target,
                        error = %error,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retryable error, will retry after delay"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                if attempt > 0 {
                    warn!(
                        target_url = target,
                        error = %error,
                        attempts = attempt + 1,
                        "Request failed after all retry attempts"
                    );
                }

                return Err(error);
            }
        }
    }
}
