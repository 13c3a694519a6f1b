//! Bounded, retrying JSON-over-HTTP client for weather APIs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info_span, warn, Instrument};

use crate::StorageError;

/// 429 and 5xx are worth another try; anything else is the caller's fault.
fn transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Doubling delay before retry number `retry` (0-based), capped at `max_delay`.
    pub fn delay(&self, retry: usize) -> Duration {
        let doublings = u32::try_from(retry).unwrap_or(u32::MAX).min(31);
        self.base_delay
            .saturating_mul(1 << doublings)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(15),
            user_agent: None,
            global_concurrency: 4,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("weather request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{url} answered http {status}")]
    HttpStatus { status: u16, url: String },
    #[error("{url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed payload: {0}")]
    Payload(String),
    #[error("fetch limiter closed")]
    Closed,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        match self {
            FetchError::Timeout { .. } => true,
            FetchError::Request(err) => err.is_timeout(),
            _ => false,
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            backoff: config.backoff,
            timeout: config.timeout,
        })
    }

    /// GET `url` with `query` and decode the JSON body, retrying transient failures.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;

        let span = info_span!("http_fetch", url);
        self.get_with_retries(url, query).instrument(span).await
    }

    async fn get_with_retries<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let mut retry = 0;
        loop {
            let (err, transient) = match self.attempt(url, query).await {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };
            if !transient || retry >= self.backoff.max_retries {
                return Err(err);
            }
            warn!(error = %err, retry, "weather request failed, retrying");
            tokio::time::sleep(self.backoff.delay(retry)).await;
            retry += 1;
        }
    }

    /// One round trip. The flag says whether the failure may clear up on retry.
    async fn attempt<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, (FetchError, bool)> {
        let resp = match self.client.get(url).query(query).send().await {
            Ok(resp) => resp,
            Err(err) => {
                let transient = transient_error(&err);
                let err = if err.is_timeout() {
                    FetchError::Timeout {
                        url: url.to_string(),
                        timeout_secs: self.timeout.as_secs(),
                    }
                } else {
                    FetchError::Request(err)
                };
                return Err((err, transient));
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let err = FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            };
            return Err((err, transient_status(status)));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|err| (FetchError::Request(err), false))?;
        serde_json::from_slice(&body).map_err(|source| {
            let err = FetchError::Decode {
                url: url.to_string(),
                source,
            };
            (err, false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_until_the_cap() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };

        let delays: Vec<_> = (0..4).map(|retry| policy.delay(retry)).collect();
        assert_eq!(
            delays,
            [500, 1000, 2000, 3000].map(Duration::from_millis).to_vec()
        );
        assert_eq!(policy.delay(usize::MAX), Duration::from_secs(3));
    }

    #[test]
    fn only_throttling_and_server_errors_are_transient() {
        assert!(transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!transient_status(StatusCode::BAD_REQUEST));
        assert!(!transient_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn timeout_errors_are_recognised() {
        let err = FetchError::Timeout {
            url: "https://api.open-meteo.com/v1/forecast".to_string(),
            timeout_secs: 15,
        };
        assert!(err.is_timeout());
        assert!(!FetchError::Closed.is_timeout());
    }
}
