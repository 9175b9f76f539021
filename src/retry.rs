//! Retry policy for HTTP requests against the platform
//!
//! Three kinds of trouble are told apart:
//! - **Rate limiting** (HTTP 429): always retried after the server's
//!   `Retry-After` hint (or a configured fallback) and never counted against
//!   the attempt budget.
//! - **Transient failures** (HTTP 5xx, transport errors, timeouts): retried
//!   with linear backoff (`base * attempt`) until `max_attempts` is spent.
//! - **Permanent failures** (any other non-success status): not retried.
//!
//! The policy only decides; callers perform the request and the wait so they
//! can inspect responses (content length, body) between attempts.
//!
//! # Example
//!
//! ```no_run
//! use channel_archiver::retry::{RetryPolicy, send_with_retry};
//! use channel_archiver::config::DownloadConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::from_config(&DownloadConfig::default());
//! let client = reqwest::Client::new();
//! let response = send_with_retry(&policy, "example", || client.get("https://example.com")).await?;
//! println!("status {}", response.status());
//! # Ok(())
//! # }
//! ```

use crate::config::DownloadConfig;
use rand::Rng;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;

/// Upper bound applied to server-provided rate-limit hints
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(15 * 60);

/// What to do after one attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// The response is final; hand it to the caller
    Proceed,
    /// Sleep, then try again
    Wait {
        /// How long to sleep
        delay: Duration,
        /// Whether the next try counts as a new attempt
        consumes_attempt: bool,
    },
    /// Stop retrying
    GiveUp,
}

/// Retry parameters for one kind of request
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Attempts allowed for transient failures
    pub max_attempts: u32,
    /// Linear backoff unit
    pub backoff_base: Duration,
    /// Wait after a 429 that carries no hint
    pub rate_limit_fallback: Duration,
    /// Randomise backoff delays
    pub jitter: bool,
}

impl RetryPolicy {
    /// Derive the policy from download settings
    pub fn from_config(config: &DownloadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base,
            rate_limit_fallback: config.rate_limit_fallback(),
            jitter: config.jitter,
        }
    }

    /// Decide how to continue after receiving `status` on the 1-based `attempt`
    pub fn on_status(&self, status: StatusCode, headers: &HeaderMap, attempt: u32) -> RetryDecision {
        if status == StatusCode::TOO_MANY_REQUESTS {
            let delay = retry_after_hint(headers).unwrap_or(self.rate_limit_fallback);
            return RetryDecision::Wait {
                delay,
                consumes_attempt: false,
            };
        }
        if status.is_server_error() {
            return self.transient(attempt);
        }
        if status.is_success() {
            return RetryDecision::Proceed;
        }
        RetryDecision::GiveUp
    }

    /// Decide how to continue after a transport error on the 1-based `attempt`
    pub fn on_transport_error(&self, attempt: u32) -> RetryDecision {
        self.transient(attempt)
    }

    fn transient(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        let delay = backoff_delay(self.backoff_base, attempt);
        RetryDecision::Wait {
            delay: if self.jitter { add_jitter(delay) } else { delay },
            consumes_attempt: true,
        }
    }
}

/// Linear backoff: the wait after failed attempt `attempt` (1-based)
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt.max(1))
}

/// Parse a `Retry-After` value given in (possibly fractional) seconds
///
/// HTTP-date values, negative and non-finite numbers are rejected.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs).min(MAX_RATE_LIMIT_WAIT))
}

/// Rate-limit hint carried by a response, if any
pub fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

/// Rate-limit hint from a JSON body such as `{"retry_after": 1.5}`
async fn rate_limit_body_hint(response: reqwest::Response) -> Option<Duration> {
    let body: serde_json::Value = response.json().await.ok()?;
    let secs = body.get("retry_after")?.as_f64()?;
    parse_retry_after(&secs.to_string())
}

/// Why [`send_with_retry`] stopped without a usable response
#[derive(Debug, thiserror::Error)]
pub enum RequestFailure {
    /// Transient server errors outlasted the attempt budget
    #[error("server kept failing with {status} after {attempts} attempts")]
    Status {
        /// Last status received
        status: StatusCode,
        /// Attempts spent
        attempts: u32,
    },
    /// Transport errors outlasted the attempt budget
    #[error("request failed after {attempts} attempts: {source}")]
    Transport {
        /// Last transport error
        #[source]
        source: reqwest::Error,
        /// Attempts spent
        attempts: u32,
    },
}

/// Send a request, applying `policy` to rate limits and transient failures
///
/// Returns the first response that is not retried: a success, or a
/// permanent failure status for the caller to interpret.
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    label: &str,
    mut request: F,
) -> std::result::Result<reqwest::Response, RequestFailure>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut attempt = 1;
    loop {
        let decision = match request().send().await {
            Ok(response) => {
                let status = response.status();
                match policy.on_status(status, response.headers(), attempt) {
                    RetryDecision::Proceed => return Ok(response),
                    RetryDecision::GiveUp if status.is_server_error() => {
                        tracing::warn!(request = label, %status, attempts = attempt, "giving up after server errors");
                        return Err(RequestFailure::Status {
                            status,
                            attempts: attempt,
                        });
                    }
                    RetryDecision::GiveUp => return Ok(response),
                    wait => {
                        tracing::warn!(request = label, %status, attempt, "request not successful, retrying");
                        if status == StatusCode::TOO_MANY_REQUESTS
                            && retry_after_hint(response.headers()).is_none()
                        {
                            rate_limit_body_hint(response)
                                .await
                                .map_or(wait, |delay| RetryDecision::Wait {
                                    delay,
                                    consumes_attempt: false,
                                })
                        } else {
                            wait
                        }
                    }
                }
            }
            Err(e) => match policy.on_transport_error(attempt) {
                RetryDecision::GiveUp => {
                    tracing::warn!(request = label, error = %e, attempts = attempt, "giving up after transport errors");
                    return Err(RequestFailure::Transport {
                        source: e,
                        attempts: attempt,
                    });
                }
                wait => {
                    tracing::warn!(request = label, error = %e, attempt, "transport error, retrying");
                    wait
                }
            },
        };

        if let RetryDecision::Wait {
            delay,
            consumes_attempt,
        } = decision
        {
            tokio::time::sleep(delay).await;
            if consumes_attempt {
                attempt += 1;
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
