// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SDG Telemetry Bridge
//!
//! One-way bridge that polls loggers on an upstream device-data REST API
//! and republishes their samples, normalized and batched, onto NATS
//! JetStream for the platform that owns the logger registry.
//!
//! # Architecture
//!
//! ```text
//! Bridge
//! +-- discovery loop    (platform listing -> registry + poll heap)
//! +-- scheduler loop    (poll heap -> work channel)
//! +-- fetch workers     (work channel -> upstream -> output queue)
//! +-- publisher loop    (output queue -> bus, size/time-bounded flushes)
//! ```
//!
//! Each logger is polled on its own adaptive cadence: the median of its
//! recent transmission deltas, clamped to sane bounds, with exponential
//! backoff on failure. The poll heap orders loggers by due time and
//! invalidates stale entries through per-device generation counters.
//!
//! # Example
//!
//! ```ignore
//! use sdg_bridge::{Bridge, Config, IntabClient, NatsBus, SdgClient, SystemClock};
//!
//! let config = Config::from_env();
//! let bus = std::sync::Arc::new(NatsBus::connect(&config.nats).await?);
//! let bridge = Bridge::new(config, sdg_client, intab_client, bus);
//! bridge.bootstrap().await?;
//! bridge.run().await?;
//! ```

pub mod api;
pub mod batch;
pub mod config;
pub mod device;
pub mod discovery;
pub mod fetcher;
pub mod heap;
pub mod intab;
pub mod nats;
pub mod publisher;
pub mod rate_limit;
pub mod schedule;
pub mod scheduler;
pub mod sdg;
pub mod time;
pub mod tokens;
pub mod transport;

pub use api::{
    ApiError, BusError, ChannelRecord, DeviceRecord, MockBus, MockPlatform, MockUpstream,
    PlatformApi, RawSample, TelemetryBus, UpstreamApi,
};
pub use batch::{LoggerBatch, LoggerSignal, Sample, SignalType};
pub use config::{ApiCredentials, Config};
pub use device::{Device, DeviceModel, Registry};
pub use heap::{PollEntry, PollQueue};
pub use intab::IntabClient;
pub use nats::{NatsBus, NatsConfig};
pub use schedule::Schedule;
pub use sdg::SdgClient;
pub use time::{Clock, ManualClock, SystemClock};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The bridge supervisor.
///
/// Owns the registry and poll heap, wires the loops together, and
/// propagates shutdown.
///
/// # Type Parameters
///
/// - `U` -- upstream device-data API client
/// - `P` -- platform API client
/// - `B` -- telemetry bus
pub struct Bridge<U: UpstreamApi, P: PlatformApi, B: TelemetryBus> {
    config: Config,
    registry: Arc<Registry>,
    queue: Arc<PollQueue>,
    upstream: Arc<U>,
    platform: Arc<P>,
    bus: Arc<B>,
    clock: Arc<dyn Clock>,
    stop: CancellationToken,
}

impl<U, P, B> Bridge<U, P, B>
where
    U: UpstreamApi + 'static,
    P: PlatformApi + 'static,
    B: TelemetryBus + 'static,
{
    /// Create a bridge over the given collaborators.
    pub fn new(config: Config, upstream: U, platform: P, bus: B) -> Self {
        Self::with_clock(config, upstream, platform, bus, Arc::new(SystemClock))
    }

    /// Create a bridge driven by an explicit clock (used by tests).
    pub fn with_clock(
        config: Config,
        upstream: U,
        platform: P,
        bus: B,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            queue: Arc::new(PollQueue::new()),
            upstream: Arc::new(upstream),
            platform: Arc::new(platform),
            bus: Arc::new(bus),
            clock,
            stop: CancellationToken::new(),
        }
    }

    /// Token that stops every loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Initial discovery pass.
    ///
    /// Unlike the periodic loop, a failure here is fatal: a bridge that
    /// cannot reach the platform at startup has nothing to do.
    pub async fn bootstrap(&self) -> Result<usize> {
        let added = discovery::bootstrap(
            &*self.platform,
            &self.registry,
            &self.queue,
            self.clock.now(),
        )
        .await?;
        tracing::info!("Bootstrap: {} logger(s) registered", added);
        Ok(added)
    }

    /// Run all loops until the cancellation token fires, then drain them.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Bridge starting");
        tracing::info!("  Workers: {}", self.config.worker_count);
        tracing::info!("  Discovery interval: {:?}", self.config.discovery_interval);
        tracing::info!("  Output queue bound: {}", self.config.out_queue_max);

        let (work_tx, work_rx) = mpsc::channel::<u64>(self.config.work_queue_depth);
        let (batch_tx, batch_rx) = mpsc::channel::<LoggerBatch>(self.config.out_queue_max);
        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));

        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        handles.push(tokio::spawn(discovery::run(
            Arc::clone(&self.platform),
            Arc::clone(&self.registry),
            Arc::clone(&self.queue),
            Arc::clone(&self.clock),
            self.config.discovery_interval,
            self.stop.clone(),
        )));

        handles.push(tokio::spawn(scheduler::run(
            Arc::clone(&self.queue),
            Arc::clone(&self.registry),
            work_tx,
            Arc::clone(&self.clock),
            self.config.scheduler_tick,
            self.stop.clone(),
        )));

        for worker_id in 0..self.config.worker_count {
            handles.push(tokio::spawn(fetcher::run_worker(
                worker_id,
                Arc::clone(&work_rx),
                Arc::clone(&self.registry),
                Arc::clone(&self.queue),
                Arc::clone(&self.upstream),
                Arc::clone(&self.platform),
                batch_tx.clone(),
                Arc::clone(&self.clock),
                self.stop.clone(),
            )));
        }
        drop(batch_tx);

        handles.push(tokio::spawn(publisher::run(
            Arc::clone(&self.bus),
            batch_rx,
            self.config.flush_max_batches,
            self.config.flush_max_age,
            self.stop.clone(),
        )));

        self.stop.cancelled().await;
        tracing::info!("Bridge stopping");

        for mut handle in handles {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    // stuck mid-I/O; the attempt is abandoned and the
                    // device will be rescheduled on the next startup
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }

        tracing::info!("Bridge stopped");
        Ok(())
    }
}
