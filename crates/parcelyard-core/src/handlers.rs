// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command handlers for parcelyard-core.
//!
//! Each handler validates its command, mutates the package store or adapter
//! registry and returns an [`Outcome`]: an optional synchronous reply plus an
//! optional delayed transition. [`dispatch`] sends the reply before handing
//! the transition to the scheduler, so a reply always precedes the events it
//! causes.

use std::sync::Arc;

use chrono::Utc;
use parcelyard_protocol::{
    Command, Event, LoadPackage, PackageStatus, ReceivePackage, RegisterAdapter, ScanPackage,
    SimulateError,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::package::{Package, PackagePayload, Transition, new_package_id, new_vehicle_id};
use crate::registry::{Connection, Origin};
use crate::scheduler::{ScheduledTransition, TimerKind};

/// Message used when `simulate_error` carries no text.
pub const DEFAULT_SIMULATED_ERROR: &str = "simulated_error";

/// What a handler wants done after it returns.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Sent immediately to the originating connection.
    pub reply: Option<Event>,
    /// Scheduled after the reply is queued.
    pub follow_up: Option<ScheduledTransition>,
}

impl Outcome {
    fn reply(event: Event) -> Self {
        Self {
            reply: Some(event),
            follow_up: None,
        }
    }
}

/// Route one decoded command and send its reply or error.
#[instrument(skip_all, fields(connection = %connection.id, kind = command.kind()))]
pub fn dispatch(engine: &Arc<Engine>, connection: &Connection, command: Command) {
    let origin = engine.origin_for(connection);
    if origin.is_anonymous() && !matches!(command, Command::RegisterAdapter(_)) {
        info!(anonymous = true, "Command from unregistered connection");
    }

    let result = match command {
        Command::RegisterAdapter(req) => Ok(handle_register_adapter(engine, connection, req)),
        Command::ReceivePackage(req) => handle_receive_package(engine, &origin, req),
        Command::ScanPackage(req) => handle_scan_package(engine, req),
        Command::LoadPackage(req) => handle_load_package(engine, &origin, req),
        Command::SimulateError(req) => handle_simulate_error(engine, connection, req),
    };

    match result {
        Ok(outcome) => {
            if let Some(reply) = outcome.reply {
                connection.send(reply);
            }
            if let Some(timer) = outcome.follow_up {
                engine.scheduler().schedule(engine, timer);
            }
        }
        Err(err) => {
            warn!(code = err.error_code(), error = %err, "Command rejected");
            connection.send(err.to_event());
        }
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(EngineError::MissingField { field })
}

// ============================================================================
// Adapter Registration
// ============================================================================

/// Bind an adapter identity to the connection.
pub fn handle_register_adapter(
    engine: &Engine,
    connection: &Connection,
    request: RegisterAdapter,
) -> Outcome {
    let adapter_id =
        engine
            .registry()
            .register(connection, request.adapter_id, request.capabilities.clone());

    info!(
        adapter_id = %adapter_id,
        capabilities = ?request.capabilities,
        "Adapter registered"
    );

    Outcome::reply(Event::RegisterAck {
        adapter_id,
        status: "registered".to_string(),
        timestamp: Utc::now(),
    })
}

// ============================================================================
// Receive
// ============================================================================

/// Create a package and schedule its receipt confirmation.
///
/// # Errors
///
/// - `validation_error` if `orderId` is absent
/// - `injected_failure` if failure injection rejects the package (nothing is created)
pub fn handle_receive_package(
    engine: &Engine,
    origin: &Origin,
    request: ReceivePackage,
) -> Result<Outcome> {
    let order_id = required(request.order_id, "orderId")?;

    if engine.failure().should_fail() {
        return Err(EngineError::InjectedFailure {
            operation: "receive",
            package_id: None,
            order_id: Some(order_id),
        });
    }

    let package_id = new_package_id();
    let package = Package::new(
        package_id.clone(),
        order_id.clone(),
        request.client_order_ref,
        PackagePayload {
            items: request.items,
            pickup: request.pickup,
            delivery: request.delivery,
            contact: request.contact,
            callback_meta: request.callback_meta,
        },
        origin.clone(),
    );
    let generation = package.generation;
    engine.store().insert(package);

    info!(package_id = %package_id, order_id = %order_id, "Package received");

    Ok(Outcome {
        reply: Some(Event::Ack {
            message_id: request
                .message_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            status: PackageStatus::Received,
            package_id: package_id.clone(),
            order_id,
        }),
        follow_up: Some(ScheduledTransition {
            package_id,
            generation,
            kind: TimerKind::ConfirmReceived,
            origin: origin.clone(),
        }),
    })
}

// ============================================================================
// Scan
// ============================================================================

/// Record a scan checkpoint and confirm it synchronously.
pub fn handle_scan_package(engine: &Engine, request: ScanPackage) -> Result<Outcome> {
    let package_id = required(request.package_id, "packageId")?;

    let mut store = engine.store();
    let package = store.get_mut(&package_id)?;
    let at = package.scan(request.scan_point)?;

    debug!(
        package_id = %package_id,
        scan_point = ?package.scan_point,
        status = %package.status,
        "Package scanned"
    );

    Ok(Outcome::reply(package.status_event(PackageStatus::Scanned, at)))
}

// ============================================================================
// Load
// ============================================================================

/// Schedule a load. Nothing is observable until the load delay has elapsed.
///
/// # Errors
///
/// - `validation_error` if `packageId` is absent
/// - `not_found` if the package is unknown (no timer is created)
/// - `invalid_transition` if the package is already in `error`
pub fn handle_load_package(
    engine: &Engine,
    origin: &Origin,
    request: LoadPackage,
) -> Result<Outcome> {
    let package_id = required(request.package_id, "packageId")?;

    let generation = {
        let mut store = engine.store();
        let package = store.get_mut(&package_id)?;
        if package.allows(Transition::Load).is_none() {
            return Err(EngineError::InvalidTransition {
                package_id,
                from: package.status,
                transition: Transition::Load.name(),
            });
        }
        package.generation
    };

    let vehicle_id = request
        .vehicle_id
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(new_vehicle_id);

    info!(package_id = %package_id, vehicle_id = %vehicle_id, "Load scheduled");

    Ok(Outcome {
        reply: None,
        follow_up: Some(ScheduledTransition {
            package_id,
            generation,
            kind: TimerKind::Load { vehicle_id },
            origin: origin.clone(),
        }),
    })
}

// ============================================================================
// Simulated Errors
// ============================================================================

/// Force a package into `error` and tell every adapter.
///
/// The originating connection gets the reply; every other registered adapter
/// gets the same event by broadcast.
pub fn handle_simulate_error(
    engine: &Engine,
    connection: &Connection,
    request: SimulateError,
) -> Result<Outcome> {
    let package_id = required(request.package_id, "packageId")?;
    let message = request
        .error
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SIMULATED_ERROR.to_string());

    let event = {
        let mut store = engine.store();
        let package = store.get_mut(&package_id)?;
        package.fail(message.clone());
        package.error_event()
    };

    let notified = engine.registry().broadcast(&event, Some(connection.id));
    warn!(
        package_id = %package_id,
        error = %message,
        notified,
        "Simulated error"
    );

    Ok(Outcome::reply(event))
}
