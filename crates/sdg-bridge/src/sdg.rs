// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Upstream (SDG) device-data client.
//!
//! Pulls raw samples per logger. The API wants UTC minute-precision
//! `from_date`/`to_date` strings in the request body.

use std::sync::Arc;

use async_trait::async_trait;

use crate::api::{ApiError, RawSample, UpstreamApi};
use crate::config::ApiCredentials;
use crate::rate_limit::{RateLimiter, RateLimiterConfig};
use crate::time::{ts_to_str, Clock};
use crate::tokens::{TokenConfig, TokenProvider};
use crate::transport::{HttpTransport, RetryPolicy};

pub struct SdgClient {
    transport: HttpTransport,
    base_url: String,
    clock: Arc<dyn Clock>,
}

impl SdgClient {
    pub fn new(creds: &ApiCredentials, http: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        let tokens = TokenProvider::new(
            TokenConfig::new(
                &creds.username_key,
                &creds.username,
                &creds.password,
                &format!("{}/users", creds.base_url),
            ),
            http.clone(),
            Arc::clone(&clock),
        );
        Self {
            transport: HttpTransport::new(
                http,
                tokens,
                RateLimiter::new(RateLimiterConfig::default()),
                RetryPolicy::default(),
            ),
            base_url: creds.base_url.clone(),
            clock,
        }
    }
}

#[async_trait]
impl UpstreamApi for SdgClient {
    async fn fetch_samples(&self, lookup_id: u64, since: u64) -> Result<Vec<RawSample>, ApiError> {
        let url = format!("{}/devices/{}/data", self.base_url, lookup_id);
        let body = serde_json::json!({
            "from_date": ts_to_str(since),
            "to_date": ts_to_str(self.clock.now()),
        });
        let samples: Vec<RawSample> = self.transport.post_json(&url, &body).await?;
        Ok(samples)
    }
}
