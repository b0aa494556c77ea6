// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Management surface for parcelyard-core.
//!
//! In-process queries and mutations for an external admin layer:
//! - Package inspection
//! - Adapter listing
//! - Failure injection toggles
//! - Status overrides
//! - Health report
//!
//! Nothing here is reachable over the adapter protocol.

use std::collections::BTreeMap;

use parcelyard_protocol::PackageStatus;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::engine::Engine;
use crate::error::Result;
use crate::package::Package;
use crate::registry::AdapterInfo;

/// Engine health snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Always true while the engine is reachable.
    pub healthy: bool,
    /// Crate version.
    pub version: String,
    /// Milliseconds since the engine was created.
    pub uptime_ms: u64,
    /// Total packages ever received.
    pub packages: usize,
    /// Package count per current status.
    pub packages_by_status: BTreeMap<PackageStatus, usize>,
    /// Registered adapters.
    pub adapters: usize,
    /// Open connections without an adapter identity.
    pub anonymous_connections: usize,
    /// Timers waiting to fire.
    pub pending_timers: usize,
    /// Forced failure mode.
    pub force_failure: bool,
    /// Random failure rate.
    pub failure_rate: f64,
    /// Failures injected since start.
    pub injected_failures: u64,
}

impl Engine {
    // ========================================================================
    // Queries
    // ========================================================================

    /// Snapshot of every package, oldest first.
    pub fn packages(&self) -> Vec<Package> {
        let mut packages: Vec<Package> = self.store().iter().cloned().collect();
        packages.sort_by(|a, b| {
            a.received_at()
                .cmp(&b.received_at())
                .then_with(|| a.package_id.cmp(&b.package_id))
        });
        packages
    }

    /// Snapshot of one package.
    pub fn package(&self, package_id: &str) -> Option<Package> {
        self.store().get(package_id).cloned()
    }

    /// Registered adapters.
    pub fn adapters(&self) -> Vec<AdapterInfo> {
        self.registry().list()
    }

    // ========================================================================
    // Failure Injection
    // ========================================================================

    /// Toggle forced failure mode.
    pub fn set_force_failure(&self, force: bool) {
        self.failure().set_forced(force);
    }

    /// Whether forced failure mode is on.
    pub fn force_failure(&self) -> bool {
        self.failure().is_forced()
    }

    /// Set the random failure rate. Must be within `[0, 1]`.
    pub fn set_failure_rate(&self, rate: f64) -> Result<()> {
        self.failure().set_rate(rate)
    }

    /// Current random failure rate.
    pub fn failure_rate(&self) -> f64 {
        self.failure().rate()
    }

    // ========================================================================
    // Overrides
    // ========================================================================

    /// Put a package into `status` regardless of the transition table.
    ///
    /// Pending timers for the package become stale. The matching status event
    /// is sent to whoever created the package.
    #[instrument(skip(self))]
    pub fn force_status(&self, package_id: &str, status: PackageStatus) -> Result<Package> {
        let (snapshot, event, origin) = {
            let mut store = self.store();
            let package = store.get_mut(package_id)?;
            let from = package.status;
            let at = package.force_status(status);
            info!(from = %from, to = %status, generation = package.generation, "Status forced");
            (
                package.clone(),
                package.status_event(status, at),
                package.origin.clone(),
            )
        };

        let delivery = self.registry().deliver(&origin, event);
        debug!(?delivery, "Forced status announced");
        Ok(snapshot)
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Current health snapshot.
    pub fn health(&self) -> HealthReport {
        let (packages, packages_by_status) = {
            let store = self.store();
            (store.len(), store.count_by_status())
        };
        let adapters = self.registry().len();

        HealthReport {
            healthy: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_ms: self.uptime().as_millis() as u64,
            packages,
            packages_by_status,
            adapters,
            anonymous_connections: self.open_connections().saturating_sub(adapters),
            pending_timers: self.scheduler().pending(),
            force_failure: self.failure().is_forced(),
            failure_rate: self.failure().rate(),
            injected_failures: self.failure().injected_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use parcelyard_protocol::Event;
    use std::sync::Arc;

    fn engine() -> Arc<Engine> {
        Engine::new(EngineConfig::default()).unwrap()
    }

    fn receive(engine: &Arc<Engine>, conn: &crate::registry::Connection, order: &str) -> String {
        engine.handle_line(
            conn,
            &format!(r#"{{"type":"receive_package","orderId":"{}"}}"#, order),
        );
        engine.packages().last().unwrap().package_id.clone()
    }

    #[tokio::test]
    async fn test_packages_and_lookup() {
        let engine = engine();
        let (conn, _rx) = engine.open_connection(None);
        let first = receive(&engine, &conn, "o1");

        assert_eq!(engine.packages().len(), 1);
        assert_eq!(engine.package(&first).unwrap().order_id, "o1");
        assert!(engine.package("PKG-missing").is_none());
    }

    #[test]
    fn test_failure_toggles() {
        let engine = engine();
        assert!(!engine.force_failure());

        engine.set_force_failure(true);
        assert!(engine.force_failure());

        engine.set_failure_rate(0.25).unwrap();
        assert_eq!(engine.failure_rate(), 0.25);
        assert!(engine.set_failure_rate(3.0).is_err());
        assert_eq!(engine.failure_rate(), 0.25);
    }

    #[tokio::test]
    async fn test_force_status_announces_to_origin() {
        let engine = engine();
        let (conn, mut rx) = engine.open_connection(None);
        let package_id = receive(&engine, &conn, "o1");
        rx.try_recv().unwrap();

        let package = engine
            .force_status(&package_id, PackageStatus::Loaded)
            .unwrap();
        assert_eq!(package.status, PackageStatus::Loaded);
        assert_eq!(package.generation, 1);

        match rx.try_recv().unwrap() {
            Event::PackageLoaded { vehicle_id, .. } => {
                assert_eq!(Some(vehicle_id), package.vehicle_id)
            }
            other => panic!("Unexpected event: {:?}", other),
        }

        let err = engine
            .force_status("PKG-missing", PackageStatus::Error)
            .unwrap_err();
        assert_eq!(err.error_code(), "not_found");
    }

    #[tokio::test]
    async fn test_health_report() {
        let engine = engine();
        let (adapter, mut rx) = engine.open_connection(None);
        let (_anon, _anon_rx) = engine.open_connection(None);
        engine.handle_line(&adapter, r#"{"type":"register_adapter","adapterId":"dock"}"#);
        rx.try_recv().unwrap();
        receive(&engine, &adapter, "o1");

        let report = engine.health();
        assert!(report.healthy);
        assert_eq!(report.packages, 1);
        assert_eq!(
            report.packages_by_status.get(&PackageStatus::Received),
            Some(&1)
        );
        assert_eq!(report.adapters, 1);
        assert_eq!(report.anonymous_connections, 1);
        assert_eq!(report.pending_timers, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["packagesByStatus"]["received"], 1);
        assert_eq!(json["pendingTimers"], 1);
    }
}
