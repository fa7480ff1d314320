// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! External interface contracts.
//!
//! The bridge talks to three collaborators through narrow traits: the
//! upstream device-data API it polls, the platform API that owns the logger
//! registry and channel metadata, and the message bus it publishes batches
//! to. Mock implementations live here too so the polling core can be
//! exercised without any network.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::LoggerBatch;
use crate::transport::TransportError;

/// Errors surfaced by the upstream/platform API clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("response schema error: {0}")]
    Schema(String),
}

/// Errors surfaced by the bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("bus error: {0}")]
    Nats(String),
}

/// One raw upstream sample.
///
/// The upstream returns a map per sample: a `Time` string, the measurement
/// values keyed by channel tag, and two optional housekeeping fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSample {
    #[serde(rename = "Time")]
    pub time: String,

    #[serde(
        rename = "Battery Voltage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub battery_voltage: Option<f64>,

    #[serde(
        rename = "signalStrength",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub signal_strength: Option<f64>,

    /// Per-tag measurement values (and anything else the upstream sends).
    #[serde(flatten)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl RawSample {
    /// Numeric value for a channel tag, if present.
    pub fn value(&self, tag: &str) -> Option<f64> {
        self.values.get(tag).and_then(serde_json::Value::as_f64)
    }
}

/// Platform channel record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: u64,
    pub tag: String,
}

/// Platform logger record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: u64,
    /// Upstream lookup ID (the logger serial/IMEI).
    pub lookup_id: u64,
    /// Model tag, e.g. `IOTSU_N3_RHTEMP`.
    pub tag: String,
    pub last_seen: u64,
    #[serde(default)]
    pub channels: Vec<ChannelRecord>,
}

/// Upstream device-data API: the service being polled.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Fetch all samples for `lookup_id` recorded after `since` (epoch
    /// seconds).
    async fn fetch_samples(&self, lookup_id: u64, since: u64) -> Result<Vec<RawSample>, ApiError>;
}

/// Platform API: owns the logger registry and channel metadata.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, ApiError>;

    async fn list_channels(&self, device_id: u64) -> Result<Vec<ChannelRecord>, ApiError>;

    /// Create a channel for `(device_id, tag)`. The platform must echo the
    /// tag back; callers validate the echo.
    async fn create_channel(&self, device_id: u64, tag: &str) -> Result<ChannelRecord, ApiError>;
}

/// Downstream message bus.
#[async_trait]
pub trait TelemetryBus: Send + Sync {
    /// Serialize and publish each batch, with per-batch dedupe IDs.
    async fn publish_batch(&self, batches: &[LoggerBatch]) -> Result<(), BusError>;
}

#[async_trait]
impl<T: UpstreamApi + ?Sized> UpstreamApi for Arc<T> {
    async fn fetch_samples(&self, lookup_id: u64, since: u64) -> Result<Vec<RawSample>, ApiError> {
        (**self).fetch_samples(lookup_id, since).await
    }
}

#[async_trait]
impl<T: PlatformApi + ?Sized> PlatformApi for Arc<T> {
    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, ApiError> {
        (**self).list_devices().await
    }

    async fn list_channels(&self, device_id: u64) -> Result<Vec<ChannelRecord>, ApiError> {
        (**self).list_channels(device_id).await
    }

    async fn create_channel(&self, device_id: u64, tag: &str) -> Result<ChannelRecord, ApiError> {
        (**self).create_channel(device_id, tag).await
    }
}

#[async_trait]
impl<T: TelemetryBus + ?Sized> TelemetryBus for Arc<T> {
    async fn publish_batch(&self, batches: &[LoggerBatch]) -> Result<(), BusError> {
        (**self).publish_batch(batches).await
    }
}

// ---------------------------------------------------------------------------
// Mock implementations (for tests and offline runs)
// ---------------------------------------------------------------------------

/// Scripted upstream: returns queued responses in order, then empty lists.
#[derive(Default)]
pub struct MockUpstream {
    responses: parking_lot::Mutex<std::collections::VecDeque<Result<Vec<RawSample>, ApiError>>>,
    calls: parking_lot::Mutex<Vec<(u64, u64)>>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next `fetch_samples` result.
    pub fn push_response(&self, response: Result<Vec<RawSample>, ApiError>) {
        self.responses.lock().push_back(response);
    }

    /// `(lookup_id, since)` pairs observed so far.
    pub fn calls(&self) -> Vec<(u64, u64)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl UpstreamApi for MockUpstream {
    async fn fetch_samples(&self, lookup_id: u64, since: u64) -> Result<Vec<RawSample>, ApiError> {
        self.calls.lock().push((lookup_id, since));
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// In-memory platform: a fixed device list plus a channel store that hands
/// out fresh IDs on creation.
#[derive(Default)]
pub struct MockPlatform {
    devices: parking_lot::Mutex<Vec<DeviceRecord>>,
    channels: parking_lot::Mutex<std::collections::HashMap<u64, Vec<ChannelRecord>>>,
    next_channel_id: std::sync::atomic::AtomicU64,
    /// When set, `create_channel` echoes this tag instead of the requested
    /// one (to exercise mismatch handling).
    create_tag_override: parking_lot::Mutex<Option<String>>,
    created: parking_lot::Mutex<Vec<(u64, String)>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            next_channel_id: std::sync::atomic::AtomicU64::new(1000),
            ..Self::default()
        }
    }

    pub fn add_device(&self, record: DeviceRecord) {
        self.channels
            .lock()
            .insert(record.id, record.channels.clone());
        self.devices.lock().push(record);
    }

    pub fn set_create_tag_override(&self, tag: Option<String>) {
        *self.create_tag_override.lock() = tag;
    }

    /// `(device_id, tag)` pairs passed to `create_channel` so far.
    pub fn created_channels(&self) -> Vec<(u64, String)> {
        self.created.lock().clone()
    }
}

#[async_trait]
impl PlatformApi for MockPlatform {
    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, ApiError> {
        Ok(self.devices.lock().clone())
    }

    async fn list_channels(&self, device_id: u64) -> Result<Vec<ChannelRecord>, ApiError> {
        Ok(self
            .channels
            .lock()
            .get(&device_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_channel(&self, device_id: u64, tag: &str) -> Result<ChannelRecord, ApiError> {
        self.created.lock().push((device_id, tag.to_string()));
        let id = self
            .next_channel_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let echoed = self
            .create_tag_override
            .lock()
            .clone()
            .unwrap_or_else(|| tag.to_string());
        let record = ChannelRecord { id, tag: echoed };
        self.channels
            .lock()
            .entry(device_id)
            .or_default()
            .push(record.clone());
        Ok(record)
    }
}

/// Collecting bus: records every published batch.
#[derive(Default)]
pub struct MockBus {
    published: parking_lot::Mutex<Vec<LoggerBatch>>,
    fail_next: std::sync::atomic::AtomicBool,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `publish_batch` call fail.
    pub fn fail_next(&self) {
        self.fail_next
            .store(true, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn published(&self) -> Vec<LoggerBatch> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl TelemetryBus for MockBus {
    async fn publish_batch(&self, batches: &[LoggerBatch]) -> Result<(), BusError> {
        if self
            .fail_next
            .swap(false, std::sync::atomic::Ordering::Relaxed)
        {
            return Err(BusError::Nats("mock publish failure".into()));
        }
        self.published.lock().extend_from_slice(batches);
        Ok(())
    }
}
