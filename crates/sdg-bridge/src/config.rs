// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.
//!
//! The service is configured exclusively through environment variables; the
//! defaults here describe a local development setup.

use std::time::Duration;

use crate::nats::NatsConfig;

/// Credentials and base URL for one REST API.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    /// JSON key the login endpoint expects the username under.
    pub username_key: String,
    pub username: String,
    pub password: String,
    pub base_url: String,
}

/// Full bridge configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    pub log_level: String,

    /// Upstream device-data API (samples are pulled from here).
    pub sdg: ApiCredentials,
    /// Platform API (logger registry and channel metadata).
    pub intab: ApiCredentials,
    pub nats: NatsConfig,

    /// Output queue bound between fetch workers and the publisher.
    pub out_queue_max: usize,
    /// Work channel bound between the scheduler and the worker pool.
    pub work_queue_depth: usize,
    pub worker_count: usize,
    pub discovery_interval: Duration,
    /// Fallback scheduler sleep when the heap is empty.
    pub scheduler_tick: Duration,
    /// Publisher flush threshold (batch count).
    pub flush_max_batches: usize,
    /// Publisher flush threshold (age of the oldest buffered batch).
    pub flush_max_age: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "sdg-bridge".to_string(),
            log_level: "info".to_string(),
            sdg: ApiCredentials {
                username_key: "username".to_string(),
                username: "service".to_string(),
                password: "service".to_string(),
                base_url: "https://api2.smalldatagarden.fi".to_string(),
            },
            intab: ApiCredentials {
                username_key: "email".to_string(),
                username: "service".to_string(),
                password: "service".to_string(),
                base_url: "http://localhost:8080/api/v1".to_string(),
            },
            nats: NatsConfig::default(),
            out_queue_max: 50_000,
            work_queue_depth: 32,
            worker_count: 10,
            discovery_interval: Duration::from_secs(600),
            scheduler_tick: Duration::from_secs(1),
            flush_max_batches: 200,
            flush_max_age: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.service_name = env_or("SERVICE_NAME", &config.service_name);
        config.log_level = env_or("LOG_LEVEL", &config.log_level);

        config.sdg.username_key = env_or("SDG_API_USERNAME_KEY", &config.sdg.username_key);
        config.sdg.username = env_or("SDG_API_USERNAME", &config.sdg.username);
        config.sdg.password = env_or("SDG_API_PASSWORD", &config.sdg.password);
        config.sdg.base_url = env_or("SDG_API_BASE_URL", &config.sdg.base_url);

        config.intab.username_key = env_or("INTAB_API_USERNAME_KEY", &config.intab.username_key);
        config.intab.username = env_or("INTAB_API_USERNAME", &config.intab.username);
        config.intab.password = env_or("INTAB_API_PASSWORD", &config.intab.password);
        config.intab.base_url = env_or("INTAB_API_BASE_URL", &config.intab.base_url);

        config.nats.username = env_or("NATS_USERNAME", &config.nats.username);
        config.nats.password = env_or("NATS_PASSWORD", &config.nats.password);
        config.nats.server1 = env_or("NATS_SERVER1", &config.nats.server1);
        config.nats.port = env_or("NATS_PORT", "4222").parse().unwrap_or(4222);
        config.nats.stream_name = env_or("NATS_STREAM_NAME", &config.nats.stream_name);
        config.nats.subject = env_or("NATS_SUBJECT", &config.nats.subject);

        config
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
