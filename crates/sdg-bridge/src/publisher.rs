// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publisher loop.
//!
//! Drains the output queue into size/time-bounded flushes on the bus. A
//! failed flush drops the buffered batches - there is no on-disk spool; the
//! downstream dedupes on `Nats-Msg-Id` so a later repoll fills the gap.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::TelemetryBus;
use crate::batch::LoggerBatch;

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn run<B: TelemetryBus>(
    bus: B,
    mut batch_rx: mpsc::Receiver<LoggerBatch>,
    flush_max_batches: usize,
    flush_max_age: Duration,
    stop: CancellationToken,
) {
    tracing::info!(
        "Publisher loop started (flush at {} batches / {:?})",
        flush_max_batches,
        flush_max_age
    );

    let mut buffer: Vec<LoggerBatch> = Vec::new();
    let mut last_flush = Instant::now();

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            received = tokio::time::timeout(RECV_TIMEOUT, batch_rx.recv()) => {
                match received {
                    Ok(Some(batch)) => buffer.push(batch),
                    // all senders gone: the worker pool has shut down
                    Ok(None) => break,
                    Err(_) => {}
                }
            }
        }

        if buffer.len() >= flush_max_batches || last_flush.elapsed() >= flush_max_age {
            if !buffer.is_empty() {
                flush(&bus, &mut buffer).await;
            }
            last_flush = Instant::now();
        }
    }

    if !buffer.is_empty() {
        flush(&bus, &mut buffer).await;
    }
    tracing::info!("Publisher loop stopped");
}

async fn flush<B: TelemetryBus>(bus: &B, buffer: &mut Vec<LoggerBatch>) {
    match bus.publish_batch(buffer).await {
        Ok(()) => tracing::debug!("Flushed {} batch(es)", buffer.len()),
        Err(err) => tracing::error!("Publish failed, dropping {} batch(es): {}", buffer.len(), err),
    }
    buffer.clear();
}
