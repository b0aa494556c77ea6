// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Parcelyard Protocol - newline-delimited JSON communication layer
//!
//! This crate provides the wire protocol spoken between warehouse adapters
//! and the parcelyard engine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   parcelyard-protocol                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Messages: inbound Commands / outbound Events (`type` tag)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: JSON (serde_json), one object per line      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: persistent TCP stream                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Commands (adapter → engine)
//!
//! | Type | Fields |
//! |------|--------|
//! | `register_adapter` | `adapterId?`, `capabilities?` |
//! | `receive_package` | `orderId`, `clientOrderRef?`, `items?`, `pickup?`, `delivery?`, `contact?`, `callbackMeta?`, `messageId?` |
//! | `scan_package` | `packageId`, `scanPoint?` |
//! | `load_package` | `packageId`, `vehicleId?` |
//! | `simulate_error` | `packageId`, `error?` |
//!
//! # Events (engine → adapter)
//!
//! `register_ack`, `ack`, `package_received`, `package_ready`,
//! `package_scanned`, `package_loaded` and `error`.
//!
//! # Usage
//!
//! ```ignore
//! use parcelyard_protocol::{AdapterClient, Command, ReceivePackage};
//!
//! let mut client = AdapterClient::connect("127.0.0.1:7400".parse()?).await?;
//! client.register(Some("dock-7"), vec!["scan".into()]).await?;
//!
//! client
//!     .send(&Command::ReceivePackage(ReceivePackage::for_order("o1")))
//!     .await?;
//! let ack = client.next_event().await?;
//! ```

pub mod client;
pub mod frame;
pub mod messages;

// Re-export main types
pub use client::{AdapterClient, AdapterClientConfig, ClientError};
pub use frame::{FrameError, FramedReader, LineFramer, MAX_LINE_LENGTH, encode_line};
pub use messages::{
    Command, DecodeError, Event, LoadPackage, PackageStatus, ReceivePackage, RegisterAdapter,
    ScanPackage, SimulateError,
};
