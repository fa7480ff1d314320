// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared HTTP transport for the REST clients.
//!
//! Wraps one connection-pooling `reqwest::Client` with the request
//! discipline both APIs need: rate-limit acquisition before every attempt,
//! bearer auth, bounded retries with exponential backoff and jitter on
//! transient statuses and network errors, `Retry-After` support, and a
//! single token refresh on 401.

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::rate_limit::RateLimiter;
use crate::tokens::TokenProvider;

/// HTTP transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
}

/// Retry bounds for one logical request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff for `attempt` (1-based): `base * 2^(attempt-1)` capped at
    /// `max_delay`, plus up to 20% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let expo = (self.base_delay.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32))
            .min(self.max_delay.as_secs_f64());
        let jitter = fastrand::f64() * 0.2 * expo;
        Duration::from_secs_f64(expo + jitter)
    }
}

const RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Authenticated, rate-limited, retrying HTTP entry point.
pub struct HttpTransport {
    client: reqwest::Client,
    tokens: TokenProvider,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(
        client: reqwest::Client,
        tokens: TokenProvider,
        limiter: RateLimiter,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            tokens,
            limiter,
            retry,
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, TransportError> {
        self.request_json(Method::GET, url, None).await
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, TransportError> {
        self.request_json(Method::POST, url, Some(body)).await
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, TransportError> {
        let mut refreshed_once = false;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.limiter.acquire().await;
            let token = self.tokens.ensure_token().await;

            let mut request = self.client.request(method.clone(), url).bearer_auth(token);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if RETRYABLE_STATUSES.contains(&status.as_u16()) {
                        if attempt >= self.retry.max_attempts {
                            return Err(TransportError::Status {
                                status: status.as_u16(),
                                url: url.to_string(),
                            });
                        }
                        let delay = retry_after(&response)
                            .unwrap_or_else(|| self.retry.backoff(attempt));
                        tracing::debug!(
                            "Retryable status {} from {} (attempt {}), waiting {:?}",
                            status,
                            url,
                            attempt,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if status == StatusCode::UNAUTHORIZED && !refreshed_once {
                        refreshed_once = true;
                        tracing::debug!("401 from {}, refreshing token", url);
                        self.tokens.invalidate().await;
                        continue;
                    }

                    if !status.is_success() {
                        return Err(TransportError::Status {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }

                    return response.json::<T>().await.map_err(TransportError::Http);
                }
                Err(err) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(TransportError::Http(err));
                    }
                    let delay = self.retry.backoff(attempt);
                    tracing::debug!(
                        "Request to {} failed (attempt {}): {}, waiting {:?}",
                        url,
                        attempt,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<f64>()
        .ok()
        .map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        for attempt in 1..=8u32 {
            let expected = (0.3 * 2f64.powi(attempt as i32 - 1)).min(5.0);
            let delay = policy.backoff(attempt).as_secs_f64();
            assert!(delay >= expected, "attempt {attempt}: {delay} < {expected}");
            assert!(
                delay <= expected * 1.2 + 1e-9,
                "attempt {attempt}: {delay} > {}",
                expected * 1.2
            );
        }
    }

    #[test]
    fn test_backoff_sequence_base_values() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(5),
        };
        // jitter is additive, so the floor of each attempt is deterministic
        assert!(policy.backoff(1) >= Duration::from_millis(300));
        assert!(policy.backoff(5) >= Duration::from_millis(4800));
        assert!(policy.backoff(6) >= Duration::from_secs(5));
        assert!(policy.backoff(6) <= Duration::from_secs(6));
    }
}
