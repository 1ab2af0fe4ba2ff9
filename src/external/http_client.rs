use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

const USER_AGENT: &str = "tickercast";

/// Timeout and retry settings for upstream market-data calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Extra attempts after the first one
    pub retries: u32,
    /// Base delay, doubled after every failed attempt
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(20_000),
            retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.backoff.checked_mul(factor).unwrap_or(Duration::MAX)
    }
}

/// HTTP client that retries transient failures with exponential backoff.
///
/// Only timeouts, connection failures (refused, reset, DNS) and 5xx
/// responses are retried. Any other status is handed back to the caller
/// untouched, including after the last attempt.
#[derive(Clone)]
pub struct RetryingHttpClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl RetryingHttpClient {
    pub fn new(policy: RetryPolicy) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(policy.timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, policy })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response, reqwest::Error> {
        self.send_with_retry(|client| client.get(url).query(query)).await
    }

    /// Send the request built by `build`, rebuilding it for every attempt
    pub async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, reqwest::Error>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let last_attempt = attempt >= self.policy.retries;
            match build(&self.client).send().await {
                Ok(resp) if resp.status().is_server_error() && !last_attempt => {
                    warn!(
                        "Upstream {} returned {} (attempt {}/{}), retrying",
                        resp.url(),
                        resp.status(),
                        attempt + 1,
                        self.policy.retries + 1
                    );
                }
                Ok(resp) => return Ok(resp),
                Err(e) if is_transient(&e) && !last_attempt => {
                    warn!(
                        "Upstream request failed (attempt {}/{}): {}, retrying",
                        attempt + 1,
                        self.policy.retries + 1,
                        e
                    );
                }
                Err(e) => return Err(e),
            }

            sleep(self.policy.backoff_for(attempt)).await;
            attempt += 1;
        }
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }

    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::TimedOut
            ) {
                return true;
            }
        }
        source = cause.source();
    }
    false
}
