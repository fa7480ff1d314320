// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SDG Telemetry Bridge daemon.
//!
//! A single long-running process, configured entirely through environment
//! variables (see `Config`). Exits 0 on clean shutdown and non-zero when
//! startup cannot complete (platform or bus unreachable).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use sdg_bridge::{Bridge, Clock, Config, IntabClient, NatsBus, SdgClient, SystemClock};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tracing::info!("{} starting", config.service_name);
    tracing::info!("  Upstream: {}", config.sdg.base_url);
    tracing::info!("  Platform: {}", config.intab.base_url);
    tracing::info!(
        "  Bus: {}:{} stream={} subject={}",
        config.nats.server1,
        config.nats.port,
        config.nats.stream_name,
        config.nats.subject
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("building HTTP client")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let upstream = SdgClient::new(&config.sdg, http.clone(), Arc::clone(&clock));
    let platform = IntabClient::new(&config.intab, http, Arc::clone(&clock));
    let bus = Arc::new(
        NatsBus::connect(&config.nats)
            .await
            .context("connecting to NATS")?,
    );

    let bridge = Bridge::with_clock(
        config,
        upstream,
        platform,
        Arc::clone(&bus),
        clock,
    );
    bridge
        .bootstrap()
        .await
        .context("initial platform discovery")?;

    let stop = bridge.cancellation_token();
    let runner = tokio::spawn(bridge.run());

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    tracing::info!("Shutdown requested");
    stop.cancel();

    runner.await??;

    if let Err(err) = bus.close().await {
        tracing::warn!("Error closing bus connection: {}", err);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
