// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! NATS JetStream bus.
//!
//! Batches are published one message each onto a durable stream, with the
//! batch's `transmission_id` as the `Nats-Msg-Id` header so JetStream can
//! dedupe redeliveries. The stream is created on connect if missing, and
//! its subject list is widened if an existing stream does not yet cover the
//! configured subject.

use std::time::Duration;

use async_nats::jetstream;
use async_nats::jetstream::stream::{RetentionPolicy, StorageType};
use async_trait::async_trait;

use crate::api::{BusError, TelemetryBus};
use crate::batch::{encode_frame, LoggerBatch};

const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// NATS connection and stream settings.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub username: String,
    pub password: String,
    pub server1: String,
    pub port: u16,
    pub stream_name: String,
    pub subject: String,

    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub ping_interval: Duration,
    /// Stream retention age.
    pub max_age: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            username: "nats".to_string(),
            password: "nats".to_string(),
            server1: "nats".to_string(),
            port: 4222,
            stream_name: "SAMPLES".to_string(),
            subject: "telemetry.v1".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(20),
            max_age: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl NatsConfig {
    fn server_url(&self) -> String {
        format!("nats://{}:{}", self.server1, self.port)
    }
}

/// JetStream publisher.
pub struct NatsBus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    subject: String,
}

impl NatsBus {
    /// Connect, then idempotently ensure the stream exists and covers the
    /// configured subject.
    pub async fn connect(cfg: &NatsConfig) -> Result<Self, BusError> {
        let client = async_nats::ConnectOptions::new()
            .user_and_password(cfg.username.clone(), cfg.password.clone())
            .connection_timeout(cfg.connect_timeout)
            .request_timeout(Some(cfg.request_timeout))
            .ping_interval(cfg.ping_interval)
            .event_callback(|event| async move {
                tracing::warn!("NATS client event: {}", event);
            })
            .connect(cfg.server_url())
            .await
            .map_err(|e| BusError::Nats(e.to_string()))?;

        let jetstream = jetstream::new(client.clone());
        let bus = Self {
            client,
            jetstream,
            subject: cfg.subject.clone(),
        };
        bus.ensure_stream(cfg).await?;
        Ok(bus)
    }

    async fn ensure_stream(&self, cfg: &NatsConfig) -> Result<(), BusError> {
        match self.jetstream.get_stream(&cfg.stream_name).await {
            Ok(mut stream) => {
                let info = stream
                    .info()
                    .await
                    .map_err(|e| BusError::Nats(e.to_string()))?;
                if !info.config.subjects.iter().any(|s| *s == cfg.subject) {
                    let mut config = info.config.clone();
                    config.subjects.push(cfg.subject.clone());
                    config.subjects.sort();
                    self.jetstream
                        .update_stream(&config)
                        .await
                        .map_err(|e| BusError::Nats(e.to_string()))?;
                    tracing::info!(
                        "Updated stream {} to include subject {}",
                        cfg.stream_name,
                        cfg.subject
                    );
                }
            }
            Err(_) => {
                self.jetstream
                    .create_stream(jetstream::stream::Config {
                        name: cfg.stream_name.clone(),
                        subjects: vec![cfg.subject.clone()],
                        retention: RetentionPolicy::Limits,
                        storage: StorageType::File,
                        max_age: cfg.max_age,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| BusError::Nats(e.to_string()))?;
                tracing::info!(
                    "Created JetStream stream {} with subject {}",
                    cfg.stream_name,
                    cfg.subject
                );
            }
        }
        Ok(())
    }

    /// Drain and close the connection.
    pub async fn close(&self) -> Result<(), BusError> {
        self.client
            .drain()
            .await
            .map_err(|e| BusError::Nats(e.to_string()))
    }
}

#[async_trait]
impl TelemetryBus for NatsBus {
    async fn publish_batch(&self, batches: &[LoggerBatch]) -> Result<(), BusError> {
        for batch in batches {
            let payload = encode_frame(batch)?;

            let mut headers = async_nats::HeaderMap::new();
            headers.insert(MSG_ID_HEADER, batch.transmission_id.as_str());

            let ack = self
                .jetstream
                .publish_with_headers(self.subject.clone(), headers, payload.into())
                .await
                .map_err(|e| BusError::Nats(e.to_string()))?
                .await
                .map_err(|e| BusError::Nats(e.to_string()))?;

            tracing::debug!(
                "Published batch stream={} seq={} id={} samples={}",
                ack.stream,
                ack.sequence,
                batch.transmission_id,
                batch.samples.len()
            );
        }
        Ok(())
    }
}
