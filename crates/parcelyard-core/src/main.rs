// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Parcelyard Core - Package Lifecycle Engine
//!
//! Standalone server: adapters connect over TCP and receive timed warehouse
//! events for the packages they submit.

use anyhow::Result;
use tracing::{error, info};

use parcelyard_core::config::Config;
use parcelyard_core::runtime::EngineRuntime;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("parcelyard_core=info".parse()?),
        )
        .init();

    info!("Starting Parcelyard Core");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        addr = %config.bind_addr,
        receive_delay_ms = config.engine.receive_delay.as_millis() as u64,
        ready_delay_ms = config.engine.ready_delay.as_millis() as u64,
        load_delay_ms = config.engine.load_delay.as_millis() as u64,
        failure_rate = config.engine.failure_rate,
        force_failure = config.engine.force_failure,
        "Configuration loaded"
    );

    let runtime = EngineRuntime::builder()
        .config(config.engine)
        .bind_addr(config.bind_addr)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Parcelyard Core initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    let health = runtime.engine().health();
    info!(
        packages = health.packages,
        injected_failures = health.injected_failures,
        pending_timers = health.pending_timers,
        "Final engine state"
    );

    runtime.shutdown().await?;
    info!("Shutdown complete");

    Ok(())
}
