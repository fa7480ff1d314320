// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device discovery loop.
//!
//! Periodically reconciles the registry against the platform's logger list.
//! New loggers are constructed and scheduled for an immediate first poll;
//! loggers the platform stopped returning are left untouched (they simply
//! age out of the heap) and only noted in the logs.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, DeviceRecord, PlatformApi};
use crate::device::{Device, Registry};
use crate::heap::{PollEntry, PollQueue};
use crate::time::Clock;

/// Run the periodic reconciliation until `stop` fires.
///
/// The initial device list is loaded by [`merge_devices`] during bootstrap,
/// so the loop waits one interval before its first refresh.
pub async fn run<P: PlatformApi>(
    platform: Arc<P>,
    registry: Arc<Registry>,
    queue: Arc<PollQueue>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    stop: CancellationToken,
) {
    tracing::info!("Discovery loop started (interval {:?})", interval);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match platform.list_devices().await {
            Ok(records) => {
                let added = merge_devices(&records, &registry, &queue, clock.now());
                if added > 0 {
                    tracing::info!("Discovery added {} new logger(s)", added);
                }
            }
            Err(err) => {
                tracing::error!("Discovery failed: {}", err);
            }
        }
    }

    tracing::info!("Discovery loop stopped");
}

/// One-shot discovery for startup. Fails if the platform is unreachable.
pub async fn bootstrap<P: PlatformApi>(
    platform: &P,
    registry: &Registry,
    queue: &PollQueue,
    now: u64,
) -> Result<usize, ApiError> {
    let records = platform.list_devices().await?;
    Ok(merge_devices(&records, registry, queue, now))
}

/// Merge a platform device listing into the registry.
///
/// Unknown IDs become new devices due for an immediate poll; records with an
/// unrecognized model are skipped. Returns the number of devices added.
pub fn merge_devices(
    records: &[DeviceRecord],
    registry: &Registry,
    queue: &PollQueue,
    now: u64,
) -> usize {
    let mut added = 0;
    let mut fetched_ids = std::collections::HashSet::with_capacity(records.len());

    for record in records {
        fetched_ids.insert(record.id);
        if registry.contains(record.id) {
            continue;
        }

        let device = match Device::from_record(record, now) {
            Ok(device) => Arc::new(device),
            Err(err) => {
                tracing::warn!("Skipping logger {}: {}", record.id, err);
                continue;
            }
        };

        let entry = PollEntry {
            due_at: now,
            device_id: device.id,
            generation: device.generation(),
        };
        if registry.insert(device) {
            queue.push(entry);
            added += 1;
        }
    }

    let stale: Vec<u64> = registry
        .known_ids()
        .difference(&fetched_ids)
        .copied()
        .collect();
    if !stale.is_empty() {
        tracing::debug!("{} known logger(s) not in platform listing: {:?}", stale.len(), stale);
    }

    added
}
