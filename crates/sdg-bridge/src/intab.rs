// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Platform (intabcloud) client.
//!
//! The platform owns the logger registry and per-logger channel metadata.
//! Channel creation fills in the platform's display defaults; the unit is
//! resolved from the tag.

use std::sync::Arc;

use async_trait::async_trait;

use crate::api::{ApiError, ChannelRecord, DeviceRecord, PlatformApi};
use crate::config::ApiCredentials;
use crate::device::resolve_unit;
use crate::rate_limit::{RateLimiter, RateLimiterConfig};
use crate::time::Clock;
use crate::tokens::{TokenConfig, TokenProvider};
use crate::transport::{HttpTransport, RetryPolicy};

pub struct IntabClient {
    transport: HttpTransport,
    base_url: String,
}

impl IntabClient {
    pub fn new(creds: &ApiCredentials, http: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        let tokens = TokenProvider::new(
            TokenConfig::new(
                &creds.username_key,
                &creds.username,
                &creds.password,
                &format!("{}/login", creds.base_url),
            ),
            http.clone(),
            clock,
        );
        Self {
            transport: HttpTransport::new(
                http,
                tokens,
                RateLimiter::new(RateLimiterConfig::default()),
                RetryPolicy::default(),
            ),
            base_url: creds.base_url.clone(),
        }
    }
}

#[async_trait]
impl PlatformApi for IntabClient {
    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, ApiError> {
        let url = format!("{}/loggers", self.base_url);
        Ok(self.transport.get_json(&url).await?)
    }

    async fn list_channels(&self, device_id: u64) -> Result<Vec<ChannelRecord>, ApiError> {
        let url = format!("{}/loggers/{}/channels", self.base_url, device_id);
        Ok(self.transport.get_json(&url).await?)
    }

    async fn create_channel(&self, device_id: u64, tag: &str) -> Result<ChannelRecord, ApiError> {
        let url = format!("{}/loggers/{}/channels", self.base_url, device_id);
        let body = serde_json::json!({
            "tag": tag,
            "name": tag,
            "unit": resolve_unit(tag),
            "high_from": 0,
            "high_to": 0,
            "low_from": 0,
            "low_to": 0,
            "color": "#000000",
            "decimal_count": 1,
        });
        Ok(self.transport.post_json(&url, &body).await?)
    }
}
