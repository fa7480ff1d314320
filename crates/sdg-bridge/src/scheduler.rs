// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scheduler loop.
//!
//! Sole consumer of the poll heap. Pops the earliest live entry, sleeps
//! until its due time, and hands the device ID to the worker pool over the
//! bounded work channel. A full work channel blocks the dispatch, which is
//! the backpressure signal that delays further polling. The scheduler never
//! calls the network and never touches a device's schedule.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::device::Registry;
use crate::heap::PollQueue;
use crate::time::Clock;

pub async fn run(
    queue: Arc<PollQueue>,
    registry: Arc<Registry>,
    work_tx: mpsc::Sender<u64>,
    clock: Arc<dyn Clock>,
    tick: Duration,
    stop: CancellationToken,
) {
    tracing::info!("Scheduler loop started");

    loop {
        if stop.is_cancelled() {
            break;
        }

        let entry = match queue.pop_due(&registry) {
            Some(entry) => entry,
            None => {
                // nothing scheduled yet
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(tick) => {}
                }
                continue;
            }
        };

        let now = clock.now();
        if entry.due_at > now {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(entry.due_at - now)) => {}
            }
        }

        tokio::select! {
            _ = stop.cancelled() => break,
            sent = work_tx.send(entry.device_id) => {
                if sent.is_err() {
                    // worker pool is gone, nothing left to dispatch to
                    break;
                }
            }
        }
    }

    tracing::info!("Scheduler loop stopped");
}
