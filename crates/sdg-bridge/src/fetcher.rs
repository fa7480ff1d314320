// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fetch worker pool.
//!
//! Workers pull device IDs off the work channel and run one poll attempt
//! each: fetch samples since the logger's watermark, transform them into an
//! output batch (resolving or lazily creating platform channels along the
//! way), hand the batch to the publisher, then reschedule the logger. The
//! device lock is held for the whole attempt, so a device can never be
//! fetched by two workers at once even if it briefly appears twice in the
//! heap.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, PlatformApi, UpstreamApi};
use crate::batch::{LoggerBatch, LoggerSignal, Sample, SignalType};
use crate::device::{Device, DeviceState, Registry};
use crate::heap::{PollEntry, PollQueue};
use crate::time::{str_to_ts, Clock};

/// Why one poll attempt failed. Every variant ends in `inc_error` and
/// backoff for the device; none of them are fatal to the process.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("upstream returned no samples")]
    NoData,

    #[error("sample missing value for required tag {0:?}")]
    MissingValue(String),

    #[error("unparsable sample timestamp {0:?}")]
    BadTimestamp(String),

    #[error("channel create for tag {expected:?} returned tag {got:?}")]
    ChannelTagMismatch { expected: String, got: String },
}

/// Shared receiving end of the work channel.
pub type WorkReceiver = Arc<Mutex<mpsc::Receiver<u64>>>;

/// One worker of the fetch pool. Runs until the work channel closes or
/// `stop` fires.
#[allow(clippy::too_many_arguments)]
pub async fn run_worker<U: UpstreamApi, P: PlatformApi>(
    worker_id: usize,
    work_rx: WorkReceiver,
    registry: Arc<Registry>,
    queue: Arc<PollQueue>,
    upstream: Arc<U>,
    platform: Arc<P>,
    batch_tx: mpsc::Sender<LoggerBatch>,
    clock: Arc<dyn Clock>,
    stop: CancellationToken,
) {
    tracing::debug!("Fetch worker {} started", worker_id);

    loop {
        let device_id = {
            let mut rx = work_rx.lock().await;
            tokio::select! {
                _ = stop.cancelled() => break,
                received = rx.recv() => match received {
                    Some(id) => id,
                    None => break,
                },
            }
        };

        let Some(device) = registry.get(device_id) else {
            tracing::warn!("Dispatched unknown logger {}", device_id);
            continue;
        };

        process_device(&device, &queue, &*upstream, &*platform, &batch_tx, &*clock).await;
    }

    tracing::debug!("Fetch worker {} stopped", worker_id);
}

/// Run one poll attempt for `device` and reschedule it.
async fn process_device<U: UpstreamApi, P: PlatformApi>(
    device: &Device,
    queue: &PollQueue,
    upstream: &U,
    platform: &P,
    batch_tx: &mpsc::Sender<LoggerBatch>,
    clock: &dyn Clock,
) {
    let mut state = device.state.lock().await;
    state.schedule.in_flight = true;

    match fetch_device(device, &mut state, upstream, platform).await {
        Ok(batch) => {
            let batch_last_seen = batch.last_seen;
            let sample_count = batch.samples.len();

            // blocking send: output-queue backpressure stalls this worker,
            // not the process
            if batch_tx.send(batch).await.is_err() {
                tracing::debug!("Publisher gone, dropping batch for logger {}", device.id);
            }

            state.schedule.add_successful_tx(batch_last_seen);
            state.schedule.advance_last_seen(batch_last_seen);
            tracing::debug!(
                "Logger {}: emitted {} sample(s), last_seen={}",
                device.id,
                sample_count,
                batch_last_seen
            );
        }
        Err(err) => {
            state.schedule.inc_error();
            tracing::warn!(
                "Logger {}: fetch attempt failed ({} consecutive): {}",
                device.id,
                state.schedule.errors(),
                err
            );
        }
    }

    state.schedule.in_flight = false;
    state.schedule.update_due_at(clock.now());
    let due_at = state.schedule.due_at;
    drop(state);

    let generation = device.bump_generation();
    queue.push(PollEntry {
        due_at,
        device_id: device.id,
        generation,
    });
}

/// Fetch and transform one batch for `device`.
///
/// Only the tags declared by the device model are emitted; anything else in
/// the sample map is ignored. A declared tag with no value in any sample
/// fails the whole attempt - partial batches are never published.
async fn fetch_device<U: UpstreamApi, P: PlatformApi>(
    device: &Device,
    state: &mut DeviceState,
    upstream: &U,
    platform: &P,
) -> Result<LoggerBatch, FetchError> {
    let since = state.schedule.last_seen();
    let samples = upstream.fetch_samples(device.lookup_id, since).await?;
    if samples.is_empty() {
        return Err(FetchError::NoData);
    }

    let mut batch = LoggerBatch::new(device.id, SignalType::NbIot);
    let mut voltages = Vec::new();
    let mut batch_last_seen = 0u64;

    for sample in &samples {
        let ts = str_to_ts(&sample.time)
            .ok_or_else(|| FetchError::BadTimestamp(sample.time.clone()))?;
        batch_last_seen = batch_last_seen.max(ts);

        for tag in device.model.channel_tags() {
            let channel_id = resolve_channel(device, state, platform, tag).await?;
            let value = sample
                .value(tag)
                .ok_or_else(|| FetchError::MissingValue(tag.to_string()))?;
            batch.samples.push(Sample {
                channel_id,
                value,
                ts,
            });
        }

        if let Some(voltage) = sample.battery_voltage {
            voltages.push(voltage);
        }
        if let Some(value) = sample.signal_strength {
            batch.signals.push(LoggerSignal { ts, value });
        }
    }

    if !voltages.is_empty() {
        batch.battery = Some(voltages.iter().sum::<f64>() / voltages.len() as f64);
    }
    batch.seal(batch_last_seen);

    Ok(batch)
}

/// Resolve the platform channel ID for `tag`, creating the channel if the
/// platform does not have it yet.
///
/// The caller holds the device lock, so creation is serialized per device;
/// the platform listing is consulted first so a channel created by an
/// earlier run (or another instance) is adopted instead of duplicated.
async fn resolve_channel<P: PlatformApi>(
    device: &Device,
    state: &mut DeviceState,
    platform: &P,
    tag: &str,
) -> Result<u64, FetchError> {
    if let Some(id) = state.channel_id(tag) {
        return Ok(id);
    }

    if let Some(channel) = platform
        .list_channels(device.id)
        .await?
        .into_iter()
        .find(|c| c.tag == tag)
    {
        state.add_channel(channel.id, &channel.tag);
        return Ok(channel.id);
    }

    let created = platform.create_channel(device.id, tag).await?;
    if created.tag != tag {
        return Err(FetchError::ChannelTagMismatch {
            expected: tag.to_string(),
            got: created.tag,
        });
    }
    tracing::info!(
        "Created channel {} (tag {:?}) for logger {}",
        created.id,
        tag,
        device.id
    );
    state.add_channel(created.id, tag);
    Ok(created.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ChannelRecord, DeviceRecord, MockPlatform, MockUpstream, RawSample};
    use crate::schedule::{LOGGER_TX_DELAY, MIN_TX_INTERVAL, POSTPONE};
    use crate::time::ManualClock;
    use serde_json::json;

    fn rhtemp_device() -> Arc<Device> {
        let record = DeviceRecord {
            id: 7,
            lookup_id: 350_457_791_342_064,
            tag: "IOTSU_N3_RHTEMP".into(),
            last_seen: 1_700_000_000,
            channels: vec![
                ChannelRecord {
                    id: 101,
                    tag: "Humidity".into(),
                },
                ChannelRecord {
                    id: 102,
                    tag: "Temperature".into(),
                },
            ],
        };
        Arc::new(Device::from_record(&record, 1_700_000_000).expect("device"))
    }

    fn aq05_device() -> Arc<Device> {
        let record = DeviceRecord {
            id: 9,
            lookup_id: 42,
            tag: "IOTSU_N3_AQ05".into(),
            last_seen: 1_700_000_000,
            channels: vec![],
        };
        Arc::new(Device::from_record(&record, 1_700_000_000).expect("device"))
    }

    fn raw(value: serde_json::Value) -> RawSample {
        serde_json::from_value(value).expect("raw sample")
    }

    // two samples at 1_700_000_900 and 1_700_001_800 with both RHTEMP tags
    fn healthy_samples() -> Vec<RawSample> {
        vec![
            raw(json!({
                "Time": "2023-11-14 22:28:20",
                "Humidity": 45.2,
                "Temperature": 21.3
            })),
            raw(json!({
                "Time": "2023-11-14 22:43:20",
                "Humidity": 44.9,
                "Temperature": 21.1
            })),
        ]
    }

    #[tokio::test]
    async fn test_cold_start_healthy_device() {
        let device = rhtemp_device();
        let upstream = MockUpstream::new();
        upstream.push_response(Ok(healthy_samples()));
        let platform = MockPlatform::new();

        let mut state = device.state.lock().await;
        let batch = fetch_device(&device, &mut state, &upstream, &platform)
            .await
            .expect("batch");

        assert_eq!(batch.logger_id, 7);
        assert_eq!(batch.samples.len(), 4);
        assert_eq!(batch.last_seen, 1_700_001_800);
        assert_eq!(batch.transmission_id, "7-1700001800");
        assert_eq!(batch.battery, None);
        assert!(batch.signals.is_empty());

        // watermark was used as the fetch window start
        assert_eq!(upstream.calls(), vec![(350_457_791_342_064, 1_700_000_000)]);

        // channel IDs come from the device's known channels
        let mut ids: Vec<u64> = batch.samples.iter().map(|s| s.channel_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids, vec![101, 102]);
        assert!(platform.created_channels().is_empty());
    }

    #[tokio::test]
    async fn test_full_attempt_reschedules_after_success() {
        let device = rhtemp_device();
        let registry = Registry::new();
        registry.insert(Arc::clone(&device));
        let queue = PollQueue::new();
        let upstream = MockUpstream::new();
        upstream.push_response(Ok(healthy_samples()));
        let platform = MockPlatform::new();
        let clock = ManualClock::new(1_700_002_000);
        let (batch_tx, mut batch_rx) = mpsc::channel(8);

        process_device(&device, &queue, &upstream, &platform, &batch_tx, &clock).await;

        let batch = batch_rx.recv().await.expect("published batch");
        assert_eq!(batch.last_seen, 1_700_001_800);

        let state = device.state.lock().await;
        assert_eq!(state.schedule.last_seen(), 1_700_001_800);
        assert_eq!(state.schedule.errors(), 0);
        assert!(!state.schedule.in_flight);
        // single history entry -> minimum interval from now
        assert_eq!(
            state.schedule.due_at,
            1_700_002_000 + MIN_TX_INTERVAL + LOGGER_TX_DELAY
        );
        drop(state);

        // exactly one live heap entry, at the new generation
        assert_eq!(device.generation(), 1);
        let entry = queue.pop_due(&registry).expect("entry");
        assert_eq!(entry.generation, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_undeclared_tag_is_ignored() {
        let device = rhtemp_device();
        let upstream = MockUpstream::new();
        // CO2 is not in the RHTEMP tag set: ignored, not an error
        upstream.push_response(Ok(vec![raw(json!({
            "Time": "2023-11-14 22:28:20",
            "Humidity": 45.2,
            "Temperature": 21.3,
            "CO2": 417.0
        }))]));
        let platform = MockPlatform::new();

        let mut state = device.state.lock().await;
        let batch = fetch_device(&device, &mut state, &upstream, &platform)
            .await
            .expect("batch");

        assert_eq!(batch.samples.len(), 2);
        assert!(batch.samples.iter().all(|s| s.channel_id != 103));
        assert!(platform.created_channels().is_empty());
        assert_eq!(state.schedule.errors(), 0);
    }

    #[tokio::test]
    async fn test_missing_required_value_fails_whole_batch() {
        let device = aq05_device();
        let registry = Registry::new();
        registry.insert(Arc::clone(&device));
        let queue = PollQueue::new();
        let upstream = MockUpstream::new();
        // AQ05 requires CO2, which is absent
        upstream.push_response(Ok(vec![raw(json!({
            "Time": "2023-11-14 22:28:20",
            "Humidity": 45.2,
            "Temperature": 21.3
        }))]));
        let platform = MockPlatform::new();
        let now = 1_700_002_000;
        let clock = ManualClock::new(now);
        let (batch_tx, mut batch_rx) = mpsc::channel(8);

        process_device(&device, &queue, &upstream, &platform, &batch_tx, &clock).await;

        let state = device.state.lock().await;
        assert_eq!(state.schedule.errors(), 1);
        assert_eq!(state.schedule.due_at, now + POSTPONE + LOGGER_TX_DELAY);
        // watermark untouched
        assert_eq!(state.schedule.last_seen(), 1_700_000_000);
        drop(state);

        // no partial batch was published
        drop(batch_tx);
        assert!(batch_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_fetch_counts_as_failure() {
        let device = rhtemp_device();
        let queue = PollQueue::new();
        let upstream = MockUpstream::new(); // no queued response -> empty list
        let platform = MockPlatform::new();
        let clock = ManualClock::new(1_700_002_000);
        let (batch_tx, _batch_rx) = mpsc::channel(8);

        process_device(&device, &queue, &upstream, &platform, &batch_tx, &clock).await;

        let state = device.state.lock().await;
        assert_eq!(state.schedule.errors(), 1);
    }

    #[tokio::test]
    async fn test_lazy_channel_creation() {
        // AQ05 logger with no channels yet: all three get created
        let device = aq05_device();
        let upstream = MockUpstream::new();
        let sample = json!({
            "Time": "2023-11-14 22:28:20",
            "CO2": 417.0,
            "Humidity": 45.2,
            "Temperature": 21.3,
            "Battery Voltage": 3.6,
            "signalStrength": -82.0
        });
        upstream.push_response(Ok(vec![raw(sample.clone()), raw(sample)]));
        let platform = MockPlatform::new();

        let mut state = device.state.lock().await;
        let batch = fetch_device(&device, &mut state, &upstream, &platform)
            .await
            .expect("batch");

        // created once per tag despite two samples needing each
        assert_eq!(platform.created_channels().len(), 3);
        assert_eq!(batch.samples.len(), 6);
        assert_eq!(batch.battery, Some(3.6));
        assert_eq!(batch.signals.len(), 2);

        // device state now resolves every model tag
        for tag in device.model.channel_tags() {
            assert!(state.channel_id(tag).is_some(), "missing channel for {tag}");
        }
    }

    #[tokio::test]
    async fn test_existing_platform_channel_is_adopted_not_recreated() {
        let device = aq05_device();
        let platform = MockPlatform::new();
        platform.add_device(DeviceRecord {
            id: 9,
            lookup_id: 42,
            tag: "IOTSU_N3_AQ05".into(),
            last_seen: 0,
            channels: vec![ChannelRecord {
                id: 777,
                tag: "CO2".into(),
            }],
        });

        let mut state = device.state.lock().await;
        let id = resolve_channel(&device, &mut state, &platform, "CO2")
            .await
            .expect("resolve");
        assert_eq!(id, 777);
        assert!(platform.created_channels().is_empty());

        // now cached on the device
        assert_eq!(state.channel_id("CO2"), Some(777));
    }

    #[tokio::test]
    async fn test_channel_create_tag_mismatch_fails_attempt() {
        let device = aq05_device();
        let upstream = MockUpstream::new();
        upstream.push_response(Ok(vec![raw(json!({
            "Time": "2023-11-14 22:28:20",
            "CO2": 417.0,
            "Humidity": 45.2,
            "Temperature": 21.3
        }))]));
        let platform = MockPlatform::new();
        platform.set_create_tag_override(Some("co2".into()));

        let mut state = device.state.lock().await;
        let err = fetch_device(&device, &mut state, &upstream, &platform)
            .await
            .expect_err("mismatch");
        assert!(matches!(err, FetchError::ChannelTagMismatch { .. }));
    }

    #[tokio::test]
    async fn test_bad_timestamp_fails_attempt() {
        let device = rhtemp_device();
        let upstream = MockUpstream::new();
        upstream.push_response(Ok(vec![raw(json!({
            "Time": "whenever",
            "Humidity": 45.2,
            "Temperature": 21.3
        }))]));
        let platform = MockPlatform::new();

        let mut state = device.state.lock().await;
        let err = fetch_device(&device, &mut state, &upstream, &platform)
            .await
            .expect_err("bad timestamp");
        assert!(matches!(err, FetchError::BadTimestamp(_)));
    }
}
