// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine context.
//!
//! [`Engine`] owns every piece of mutable state: packages, adapters, pending
//! timers and the failure injector. It is shared as `Arc<Engine>`; nothing
//! lives in process globals, so independent engines can run side by side.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use parcelyard_protocol::{Command, FrameError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::failure::FailureInjector;
use crate::handlers;
use crate::package::PackageStore;
use crate::registry::{AdapterRegistry, Connection, ConnectionId, Inbox, Origin};
use crate::scheduler::Scheduler;

/// Shared engine state.
pub struct Engine {
    config: EngineConfig,
    packages: Mutex<PackageStore>,
    registry: AdapterRegistry,
    failure: FailureInjector,
    scheduler: Scheduler,
    next_connection: AtomicU64,
    open_connections: AtomicUsize,
    started_at: Instant,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("adapters", &self.registry.len())
            .field("pending_timers", &self.scheduler.pending())
            .finish()
    }
}

impl Engine {
    /// Create an engine.
    ///
    /// Fails if the configured failure rate is outside `[0, 1]`.
    pub fn new(config: EngineConfig) -> Result<Arc<Self>> {
        let failure = FailureInjector::new(
            config.force_failure,
            config.failure_rate,
            config.failure_seed,
        )?;

        info!(
            receive_delay_ms = config.receive_delay.as_millis() as u64,
            ready_delay_ms = config.ready_delay.as_millis() as u64,
            load_delay_ms = config.load_delay.as_millis() as u64,
            failure_rate = config.failure_rate,
            force_failure = config.force_failure,
            "Engine created"
        );

        Ok(Arc::new(Self {
            config,
            packages: Mutex::new(PackageStore::new()),
            registry: AdapterRegistry::new(),
            failure,
            scheduler: Scheduler::new(),
            next_connection: AtomicU64::new(1),
            open_connections: AtomicUsize::new(0),
            started_at: Instant::now(),
        }))
    }

    /// Timing and failure settings the engine was created with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Adapter registry.
    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Failure injector.
    pub fn failure(&self) -> &FailureInjector {
        &self.failure
    }

    /// Timer scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Lock the package store. Never hold the guard across an `.await`.
    pub(crate) fn store(&self) -> MutexGuard<'_, PackageStore> {
        self.packages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Time since the engine was created.
    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Connections currently open.
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Allocate a connection and its outbound queue.
    ///
    /// The caller drains the returned [`Inbox`] onto the transport and must
    /// call [`close_connection`](Self::close_connection) when the peer goes away.
    pub fn open_connection(&self, peer: Option<SocketAddr>) -> (Connection, Inbox) {
        let id = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        let (outbox, inbox) = mpsc::unbounded_channel();
        self.open_connections.fetch_add(1, Ordering::Relaxed);
        debug!(connection = %id, peer = ?peer, "Connection opened");
        (Connection::new(id, peer, outbox), inbox)
    }

    /// Drop the adapter registration of a closed connection. Packages are untouched.
    pub fn close_connection(&self, connection: &Connection) {
        self.open_connections.fetch_sub(1, Ordering::Relaxed);
        match self.registry.unregister_connection(connection.id) {
            Some(adapter_id) => {
                info!(connection = %connection.id, adapter_id = %adapter_id, "Adapter disconnected")
            }
            None => debug!(connection = %connection.id, "Connection closed"),
        }
    }

    /// Reply target for commands arriving on `connection`.
    pub fn origin_for(&self, connection: &Connection) -> Origin {
        Origin::new(self.registry.adapter_for(connection.id), connection.clone())
    }

    // ========================================================================
    // Frame intake
    // ========================================================================

    /// Decode and process one trimmed line received on `connection`.
    ///
    /// Decode failures are answered with an `error` event; the connection stays usable.
    pub fn handle_line(self: &Arc<Self>, connection: &Connection, line: &str) {
        match Command::decode(line) {
            Ok(command) => handlers::dispatch(self, connection, command),
            Err(err) => self.reject_frame(connection, err.into()),
        }
    }

    /// Report a recoverable framing error (oversized line, bad UTF-8).
    pub fn handle_frame_error(&self, connection: &Connection, err: FrameError) {
        self.reject_frame(connection, err.into());
    }

    fn reject_frame(&self, connection: &Connection, err: EngineError) {
        warn!(
            connection = %connection.id,
            code = err.error_code(),
            error = %err,
            "Rejected inbound frame"
        );
        connection.send(err.to_event());
    }
}
