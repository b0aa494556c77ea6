// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Package entity and lifecycle state machine.
//!
//! ```text
//!   receive ──► RECEIVED ──ready──► READY_FOR_LOADING ──load──► LOADED
//!                  │                       │                      ▲
//!                  └────────── scan ──► SCANNED ──────load────────┘
//!
//!   any ──fail──► ERROR   (absorbing; scans are still recorded)
//! ```
//!
//! Transitions go through [`Package::allows`]; anything it rejects surfaces
//! as [`EngineError::InvalidTransition`]. A scan moves the status but not the
//! main-progression stage, so a scanned package never re-enters
//! `ready_for_loading` once it was staged or loaded.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parcelyard_protocol::{Event, PackageStatus};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::registry::Origin;

/// Prefix of every package identity.
pub const PACKAGE_ID_PREFIX: &str = "PKG-";

/// Prefix of generated vehicle identities.
pub const VEHICLE_ID_PREFIX: &str = "VEH-";

/// Scan point reported when the adapter names none.
pub const DEFAULT_SCAN_POINT: &str = "default";

/// Generate a fresh package identity.
pub fn new_package_id() -> String {
    format!("{}{}", PACKAGE_ID_PREFIX, Uuid::new_v4().simple())
}

/// Generate a vehicle identity for loads that name none.
pub fn new_vehicle_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}{}", VEHICLE_ID_PREFIX, id[..8].to_uppercase())
}

/// A step a package can be asked to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Warehouse confirms receipt; status unchanged.
    Confirm,
    /// Staged for loading.
    Ready,
    /// Scan checkpoint.
    Scan,
    /// Loaded onto a vehicle.
    Load,
    /// Diverted to error.
    Fail,
}

impl Transition {
    /// Verb used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Confirm => "confirm receipt",
            Transition::Ready => "become ready",
            Transition::Scan => "scan",
            Transition::Load => "load",
            Transition::Fail => "fail",
        }
    }
}

/// The transition table. `None` means the step is rejected from `current`.
pub fn next_status(current: PackageStatus, transition: Transition) -> Option<PackageStatus> {
    use PackageStatus::*;

    match (current, transition) {
        (_, Transition::Fail) => Some(Error),
        // Scans are always recorded, but never lift a package out of error.
        (status, Transition::Scan) if status.is_terminal() => Some(status),
        (_, Transition::Scan) => Some(Scanned),
        (status, _) if status.is_terminal() => None,
        (status, Transition::Confirm) => Some(status),
        (Received | Scanned, Transition::Ready) => Some(ReadyForLoading),
        (_, Transition::Ready) => None,
        (_, Transition::Load) => Some(Loaded),
    }
}

/// Opaque order payload carried alongside the package.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagePayload {
    /// Item list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
    /// Pickup location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup: Option<Value>,
    /// Delivery location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<Value>,
    /// Contact information.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Value>,
    /// Adapter-defined callback metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_meta: Option<Value>,
}

/// Authoritative state of one package.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    /// Server-issued identity.
    pub package_id: String,
    /// External order identity.
    pub order_id: String,
    /// Optional adapter-side reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_order_ref: Option<String>,
    /// Pass-through payload.
    #[serde(flatten)]
    pub payload: PackagePayload,
    /// Current status.
    pub status: PackageStatus,
    /// One timestamp per status ever entered.
    pub timestamps: BTreeMap<PackageStatus, DateTime<Utc>>,
    /// Last scan checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_point: Option<String>,
    /// Vehicle assigned by a successful load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    /// Message of the last error transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Bumped by overrides and error transitions; pending timers from an older
    /// generation are stale.
    pub generation: u64,
    /// Furthest main-progression status reached; scans leave it alone.
    #[serde(skip)]
    pub(crate) stage: PackageStatus,
    /// Who created the package.
    #[serde(skip)]
    pub(crate) origin: Origin,
}

impl Package {
    /// New package in `received`, stamped now.
    pub fn new(
        package_id: String,
        order_id: String,
        client_order_ref: Option<String>,
        payload: PackagePayload,
        origin: Origin,
    ) -> Self {
        let mut package = Self {
            package_id,
            order_id,
            client_order_ref,
            payload,
            status: PackageStatus::Received,
            timestamps: BTreeMap::new(),
            scan_point: None,
            vehicle_id: None,
            last_error: None,
            generation: 0,
            stage: PackageStatus::Received,
            origin,
        };
        package.stamp(PackageStatus::Received);
        package
    }

    /// When the package was received.
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.timestamps.get(&PackageStatus::Received).copied()
    }

    /// Latest timestamp recorded for any status.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.timestamps.values().max().copied()
    }

    /// Record entry into `status`. Never earlier than anything already recorded.
    fn stamp(&mut self, status: PackageStatus) -> DateTime<Utc> {
        let now = Utc::now();
        let at = self.last_updated().map_or(now, |latest| latest.max(now));
        self.timestamps.insert(status, at);
        at
    }

    /// Status `transition` would lead to, or `None` if it is rejected.
    ///
    /// `ready` is only accepted while the main progression is still at `received`.
    pub fn allows(&self, transition: Transition) -> Option<PackageStatus> {
        if transition == Transition::Ready && self.stage != PackageStatus::Received {
            return None;
        }
        next_status(self.status, transition)
    }

    /// Apply a step through the transition table.
    ///
    /// Returns the timestamp associated with the step.
    pub fn apply(&mut self, transition: Transition) -> Result<DateTime<Utc>> {
        let next = self.allows(transition).ok_or_else(|| {
            EngineError::InvalidTransition {
                package_id: self.package_id.clone(),
                from: self.status,
                transition: transition.name(),
            }
        })?;

        let at = match transition {
            Transition::Confirm => self
                .received_at()
                .unwrap_or_else(|| self.stamp(PackageStatus::Received)),
            Transition::Scan => self.stamp(PackageStatus::Scanned),
            Transition::Fail => {
                self.generation += 1;
                self.stamp(PackageStatus::Error)
            }
            Transition::Ready | Transition::Load => {
                self.stage = next;
                self.stamp(next)
            }
        };
        self.status = next;
        Ok(at)
    }

    /// Record a scan checkpoint.
    pub fn scan(&mut self, scan_point: Option<String>) -> Result<DateTime<Utc>> {
        let at = self.apply(Transition::Scan)?;
        self.scan_point = Some(scan_point.unwrap_or_else(|| DEFAULT_SCAN_POINT.to_string()));
        Ok(at)
    }

    /// Load onto `vehicle_id`.
    pub fn load(&mut self, vehicle_id: String) -> Result<DateTime<Utc>> {
        let at = self.apply(Transition::Load)?;
        self.vehicle_id = Some(vehicle_id);
        Ok(at)
    }

    /// Divert to `error` with the given message.
    pub fn fail(&mut self, message: impl Into<String>) -> DateTime<Utc> {
        self.last_error = Some(message.into());
        // Fail is accepted from every status.
        self.apply(Transition::Fail)
            .unwrap_or_else(|_| self.stamp(PackageStatus::Error))
    }

    /// Put the package into `status` regardless of the table.
    ///
    /// Counts as an override: pending timers become stale.
    pub fn force_status(&mut self, status: PackageStatus) -> DateTime<Utc> {
        self.generation += 1;
        self.status = status;
        if !matches!(status, PackageStatus::Scanned | PackageStatus::Error) {
            self.stage = status;
        }
        match status {
            PackageStatus::Loaded if self.vehicle_id.is_none() => {
                self.vehicle_id = Some(new_vehicle_id());
            }
            PackageStatus::Scanned if self.scan_point.is_none() => {
                self.scan_point = Some(DEFAULT_SCAN_POINT.to_string());
            }
            PackageStatus::Error if self.last_error.is_none() => {
                self.last_error = Some("forced_error".to_string());
            }
            _ => {}
        }
        self.stamp(status)
    }

    /// Event announcing that the package is in `status` as of `timestamp`.
    pub fn status_event(&self, status: PackageStatus, timestamp: DateTime<Utc>) -> Event {
        let package_id = self.package_id.clone();
        let order_id = self.order_id.clone();
        match status {
            PackageStatus::Received => Event::PackageReceived {
                package_id,
                order_id,
                status,
                timestamp,
            },
            PackageStatus::ReadyForLoading => Event::PackageReady {
                package_id,
                order_id,
                status,
                timestamp,
            },
            PackageStatus::Scanned => Event::PackageScanned {
                package_id,
                order_id,
                scan_point: self
                    .scan_point
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SCAN_POINT.to_string()),
                timestamp,
            },
            PackageStatus::Loaded => Event::PackageLoaded {
                package_id,
                order_id,
                vehicle_id: self.vehicle_id.clone().unwrap_or_default(),
                status,
                timestamp,
            },
            PackageStatus::Error => self.error_event(),
        }
    }

    /// `error` event describing the last failure.
    pub fn error_event(&self) -> Event {
        Event::error(self.last_error.clone().unwrap_or_else(|| "error".to_string()))
            .with_package(Some(self.package_id.clone()), Some(self.order_id.clone()))
    }
}

/// In-memory package table. Packages are never removed.
#[derive(Debug, Default)]
pub struct PackageStore {
    packages: HashMap<String, Package>,
}

impl PackageStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new package.
    pub fn insert(&mut self, package: Package) {
        self.packages.insert(package.package_id.clone(), package);
    }

    /// Look up a package.
    pub fn get(&self, package_id: &str) -> Option<&Package> {
        self.packages.get(package_id)
    }

    /// Look up a package for mutation, or fail with `not_found`.
    pub fn get_mut(&mut self, package_id: &str) -> Result<&mut Package> {
        self.packages
            .get_mut(package_id)
            .ok_or_else(|| EngineError::PackageNotFound {
                package_id: package_id.to_string(),
            })
    }

    /// Number of packages ever received.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether no package was ever received.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Iterate over all packages.
    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    /// Package count per current status.
    pub fn count_by_status(&self) -> BTreeMap<PackageStatus, usize> {
        let mut counts = BTreeMap::new();
        for package in self.packages.values() {
            *counts.entry(package.status).or_insert(0) += 1;
        }
        counts
    }
}
