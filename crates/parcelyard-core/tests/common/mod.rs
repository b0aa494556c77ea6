// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for parcelyard-core E2E tests.
//!
//! Provides TestContext for starting an engine on a free port and connecting
//! adapter clients to it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parcelyard_core::config::EngineConfig;
use parcelyard_core::engine::Engine;
use parcelyard_core::runtime::EngineRuntime;
use parcelyard_protocol::{
    AdapterClient, Command, Event, LoadPackage, ReceivePackage, ScanPackage, SimulateError,
};

/// Delay used for every timer in tests.
pub const STEP: Duration = Duration::from_millis(25);

/// How long to wait for an event that must arrive.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to listen before concluding nothing else is coming.
pub const QUIET_PERIOD: Duration = Duration::from_millis(250);

/// Engine config with short delays and no failure injection.
pub fn fast_config() -> EngineConfig {
    EngineConfig::default().with_delays(STEP, STEP, STEP)
}

/// Test context owning a running engine.
pub struct TestContext {
    pub runtime: EngineRuntime,
    pub addr: SocketAddr,
}

impl TestContext {
    /// Start an engine with [`fast_config`].
    pub async fn new() -> Self {
        Self::with_config(fast_config()).await
    }

    /// Start an engine on `127.0.0.1:0` with the given config.
    pub async fn with_config(config: EngineConfig) -> Self {
        let runtime = EngineRuntime::builder()
            .config(config)
            .bind_addr("127.0.0.1:0".parse().unwrap())
            .build()
            .expect("Failed to build runtime")
            .start()
            .await
            .expect("Failed to start runtime");
        let addr = runtime.local_addr();
        Self { runtime, addr }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        self.runtime.engine()
    }

    /// Connected client without an adapter identity.
    pub async fn client(&self) -> AdapterClient {
        AdapterClient::connect(self.addr)
            .await
            .expect("Failed to connect")
    }

    /// Connected and registered client.
    pub async fn adapter(&self, adapter_id: &str) -> AdapterClient {
        let mut client = self.client().await;
        let assigned = client
            .register(Some(adapter_id), vec!["receive".into(), "load".into()])
            .await
            .expect("Failed to register");
        assert_eq!(assigned, adapter_id);
        client
    }

    pub async fn shutdown(self) {
        self.runtime.shutdown().await.expect("Failed to shut down");
    }
}

// ============================================================================
// Command builders
// ============================================================================

pub fn receive(order_id: &str) -> Command {
    Command::ReceivePackage(ReceivePackage {
        order_id: Some(order_id.to_string()),
        ..Default::default()
    })
}

pub fn scan(package_id: &str, scan_point: Option<&str>) -> Command {
    Command::ScanPackage(ScanPackage {
        package_id: Some(package_id.to_string()),
        scan_point: scan_point.map(str::to_string),
    })
}

pub fn load(package_id: &str, vehicle_id: Option<&str>) -> Command {
    Command::LoadPackage(LoadPackage {
        package_id: Some(package_id.to_string()),
        vehicle_id: vehicle_id.map(str::to_string),
    })
}

pub fn simulate_error(package_id: &str, error: Option<&str>) -> Command {
    Command::SimulateError(SimulateError {
        package_id: Some(package_id.to_string()),
        error: error.map(str::to_string),
    })
}

// ============================================================================
// Event helpers
// ============================================================================

/// Next event, failing the test if none arrives in time.
pub async fn next_event(client: &mut AdapterClient) -> Event {
    client
        .try_next_event(EVENT_TIMEOUT)
        .await
        .expect("Failed to read event")
        .expect("Timed out waiting for event")
}

/// Assert nothing arrives for [`QUIET_PERIOD`].
pub async fn expect_silence(client: &mut AdapterClient) {
    if let Some(event) = client
        .try_next_event(QUIET_PERIOD)
        .await
        .expect("Failed to read event")
    {
        panic!("Expected no event, got {:?}", event);
    }
}

/// Wait until exactly `count` timers are pending.
pub async fn wait_for_pending(ctx: &TestContext, count: usize) {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while ctx.engine().scheduler().pending() != count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Timed out waiting for {} pending timers",
            count
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Next event, which must be an `error` with the given message.
pub async fn expect_error(client: &mut AdapterClient, code: &str) -> Event {
    let event = next_event(client).await;
    match &event {
        Event::Error { message, .. } => assert_eq!(message, code, "event: {:?}", event),
        other => panic!("Expected {} error, got {:?}", code, other),
    }
    event
}

/// Send `receive_package` and return the package id from the ack.
pub async fn receive_package(client: &mut AdapterClient, order_id: &str) -> String {
    client.send(&receive(order_id)).await.expect("Failed to send");
    match next_event(client).await {
        Event::Ack {
            package_id,
            order_id: acked,
            ..
        } => {
            assert_eq!(acked, order_id);
            package_id
        }
        other => panic!("Expected ack, got {:?}", other),
    }
}

/// Receive a package and wait until it is ready for loading.
pub async fn ready_package(client: &mut AdapterClient, order_id: &str) -> String {
    let package_id = receive_package(client, order_id).await;
    assert_eq!(next_event(client).await.kind(), "package_received");
    assert_eq!(next_event(client).await.kind(), "package_ready");
    package_id
}
