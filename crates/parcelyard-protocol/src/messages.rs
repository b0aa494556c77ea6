// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command and event types carried over the wire.
//!
//! Every message is a JSON object with a `type` discriminator. Field names
//! are camelCase on the wire.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Package lifecycle status as reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    /// Accepted by the warehouse.
    Received,
    /// Picked and staged for loading.
    ReadyForLoading,
    /// Passed a scan checkpoint.
    Scanned,
    /// Loaded onto a vehicle.
    Loaded,
    /// Failed. Absorbing.
    Error,
}

impl PackageStatus {
    /// All statuses, in nominal lifecycle order.
    pub const ALL: [PackageStatus; 5] = [
        PackageStatus::Received,
        PackageStatus::ReadyForLoading,
        PackageStatus::Scanned,
        PackageStatus::Loaded,
        PackageStatus::Error,
    ];

    /// Wire representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageStatus::Received => "received",
            PackageStatus::ReadyForLoading => "ready_for_loading",
            PackageStatus::Scanned => "scanned",
            PackageStatus::Loaded => "loaded",
            PackageStatus::Error => "error",
        }
    }

    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, PackageStatus::Error)
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PackageStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown package status: {}", s))
    }
}

// ============================================================================
// Commands (adapter → engine)
// ============================================================================

/// Inbound command, discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Bind an adapter identity to the connection.
    RegisterAdapter(RegisterAdapter),
    /// Create a package for an order.
    ReceivePackage(ReceivePackage),
    /// Record a scan checkpoint.
    ScanPackage(ScanPackage),
    /// Load a package onto a vehicle.
    LoadPackage(LoadPackage),
    /// Force a package into the error state.
    SimulateError(SimulateError),
}

impl Command {
    /// Every `type` value this protocol understands.
    pub const TYPES: [&'static str; 5] = [
        "register_adapter",
        "receive_package",
        "scan_package",
        "load_package",
        "simulate_error",
    ];

    /// Decode one trimmed line into a command.
    ///
    /// Distinguishes unparseable JSON, objects without a `type`, unknown
    /// types and known types with malformed fields.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingType)?
            .to_string();

        if !Self::TYPES.contains(&kind.as_str()) {
            return Err(DecodeError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|e| DecodeError::InvalidMessage {
            kind,
            reason: e.to_string(),
        })
    }

    /// The `type` discriminator of this command.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::RegisterAdapter(_) => "register_adapter",
            Command::ReceivePackage(_) => "receive_package",
            Command::ScanPackage(_) => "scan_package",
            Command::LoadPackage(_) => "load_package",
            Command::SimulateError(_) => "simulate_error",
        }
    }
}

/// Errors produced while decoding an inbound line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("message has no string 'type' field")]
    MissingType,

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("malformed '{kind}' message: {reason}")]
    InvalidMessage { kind: String, reason: String },
}

/// `register_adapter` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAdapter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_id: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// `receive_package` payload. Everything besides `orderId` is passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivePackage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_order_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_meta: Option<Value>,
    /// Correlation id echoed back in the `ack`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl ReceivePackage {
    /// Minimal request for the given order.
    pub fn for_order(order_id: impl Into<String>) -> Self {
        Self {
            order_id: Some(order_id.into()),
            ..Default::default()
        }
    }
}

/// `scan_package` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanPackage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_point: Option<String>,
}

/// `load_package` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadPackage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
}

/// `simulate_error` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Events (engine → adapter)
// ============================================================================

/// Outbound event, discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Event {
    RegisterAck {
        adapter_id: String,
        status: String,
        timestamp: DateTime<Utc>,
    },
    Ack {
        message_id: String,
        status: PackageStatus,
        package_id: String,
        order_id: String,
    },
    PackageReceived {
        package_id: String,
        order_id: String,
        status: PackageStatus,
        timestamp: DateTime<Utc>,
    },
    PackageReady {
        package_id: String,
        order_id: String,
        status: PackageStatus,
        timestamp: DateTime<Utc>,
    },
    PackageScanned {
        package_id: String,
        order_id: String,
        scan_point: String,
        timestamp: DateTime<Utc>,
    },
    PackageLoaded {
        package_id: String,
        order_id: String,
        vehicle_id: String,
        status: PackageStatus,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        package_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl Event {
    /// Bare error event with only a message.
    pub fn error(message: impl Into<String>) -> Self {
        Event::Error {
            message: message.into(),
            package_id: None,
            order_id: None,
            details: None,
        }
    }

    /// Attach package context to an error event. Other events are returned unchanged.
    pub fn with_package(mut self, package: Option<String>, order: Option<String>) -> Self {
        if let Event::Error {
            package_id,
            order_id,
            ..
        } = &mut self
        {
            if package.is_some() {
                *package_id = package;
            }
            if order.is_some() {
                *order_id = order;
            }
        }
        self
    }

    /// Attach details to an error event. Other events are returned unchanged.
    pub fn with_details(mut self, text: impl Into<String>) -> Self {
        if let Event::Error { details, .. } = &mut self {
            *details = Some(text.into());
        }
        self
    }

    /// The `type` discriminator of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::RegisterAck { .. } => "register_ack",
            Event::Ack { .. } => "ack",
            Event::PackageReceived { .. } => "package_received",
            Event::PackageReady { .. } => "package_ready",
            Event::PackageScanned { .. } => "package_scanned",
            Event::PackageLoaded { .. } => "package_loaded",
            Event::Error { .. } => "error",
        }
    }

    /// Package this event refers to, if any.
    pub fn package_id(&self) -> Option<&str> {
        match self {
            Event::RegisterAck { .. } => None,
            Event::Ack { package_id, .. }
            | Event::PackageReceived { package_id, .. }
            | Event::PackageReady { package_id, .. }
            | Event::PackageScanned { package_id, .. }
            | Event::PackageLoaded { package_id, .. } => Some(package_id),
            Event::Error { package_id, .. } => package_id.as_deref(),
        }
    }
}
