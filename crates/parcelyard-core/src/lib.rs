// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Parcelyard Core - Package Lifecycle Engine
//!
//! This crate simulates a warehouse system for integration testing. Adapters
//! connect over TCP, register an identity and drive packages through their
//! lifecycle; the engine answers with timed status events, just like the real
//! warehouse would, and can inject failures on demand.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────┐   line-delimited JSON   ┌─────────────────────────────┐
//! │   Adapter clients     │◄───────────────────────►│       parcelyard-core       │
//! │ (parcelyard-protocol) │        Port 7400        │                             │
//! └───────────────────────┘                         │  server ─► engine ─► handlers│
//!                                                   │              │               │
//!                                                   │              ▼               │
//!                                                   │  scheduler (one task/timer)  │
//!                                                   │  failure injector            │
//!                                                   │  adapter registry            │
//!                                                   └─────────────────────────────┘
//!                                                                  ▲
//!                                                                  │ in-process
//!                                                   ┌─────────────────────────────┐
//!                                                   │  admin layer (management)   │
//!                                                   └─────────────────────────────┘
//! ```
//!
//! # Adapter Protocol (Port 7400)
//!
//! | Command | Reply | Delayed events |
//! |---------|-------|----------------|
//! | `register_adapter` | `register_ack` | - |
//! | `receive_package` | `ack` | `package_received`, then `package_ready` |
//! | `scan_package` | `package_scanned` | - |
//! | `load_package` | - | `package_loaded` or `error` |
//! | `simulate_error` | `error` (also broadcast to other adapters) | - |
//!
//! Any problem with a line or command is answered with an `error` event on
//! the same connection; the connection stays open.
//!
//! # Package Status State Machine
//!
//! ```text
//!     receive ──► RECEIVED ──ready──► READY_FOR_LOADING ──load──► LOADED
//!                    │                                             ▲
//!                    └──scan──► SCANNED ─────────load──────────────┘
//!
//!     any ──fail──► ERROR
//! ```
//!
//! Every delayed step captures the package generation when it is scheduled.
//! `simulate_error`, forced status changes and injected failures bump the
//! generation, turning older timers into no-ops.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `PARCELYARD_PORT` | No | `7400` | Adapter TCP port |
//! | `PARCELYARD_RECEIVE_DELAY_MS` | No | `1000` | Delay before `package_received` |
//! | `PARCELYARD_READY_DELAY_MS` | No | `2000` | Further delay before `package_ready` |
//! | `PARCELYARD_LOAD_DELAY_MS` | No | `1500` | Delay before a load completes |
//! | `PARCELYARD_FAILURE_RATE` | No | `0` | Random failure rate in `[0, 1]` |
//! | `PARCELYARD_FORCE_FAILURE` | No | `false` | Fail every state-advancing step |
//! | `PARCELYARD_FAILURE_SEED` | No | - | Seed for reproducible failure sampling |
//!
//! # Modules
//!
//! - [`config`]: Server configuration from environment variables
//! - [`engine`]: Shared engine context and frame intake
//! - [`error`]: Error types with wire error code mapping
//! - [`handlers`]: Adapter command handlers
//! - [`management`]: In-process admin surface
//! - [`runtime`]: Embeddable runtime
//! - [`server`]: TCP server

#![deny(missing_docs)]

/// Server configuration loaded from environment variables.
pub mod config;

/// Engine context owning packages, adapters, timers and failure injection.
pub mod engine;

/// Error types with wire error code mapping.
pub mod error;

/// Random and forced failure injection.
pub mod failure;

/// Adapter command handlers.
pub mod handlers;

/// Management queries and overrides (packages, adapters, failure toggles, health).
pub mod management;

/// Package entity, transition table and store.
pub mod package;

/// Adapter identities and connection delivery.
pub mod registry;

/// Embeddable runtime for running the engine inside another tokio application.
pub mod runtime;

/// Timed transitions.
pub mod scheduler;

/// TCP server for adapter connections.
pub mod server;

pub use config::{Config, EngineConfig};
pub use engine::Engine;
pub use error::EngineError;
pub use management::HealthReport;
pub use package::Package;
pub use runtime::EngineRuntime;
