// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Timed transition scheduler.
//!
//! Every delayed effect runs as its own tokio task: sleep for the configured
//! delay, then fire. Firing re-reads the package under the store lock and
//! becomes a no-op if the package generation moved on while the timer slept.
//! Timers are never aborted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parcelyard_protocol::{Event, PackageStatus};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::package::Transition;
use crate::registry::{Delivery, Origin};

/// What a timer does when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// Confirm receipt, then schedule [`TimerKind::Ready`].
    ConfirmReceived,
    /// Stage the package for loading.
    Ready,
    /// Load onto the given vehicle.
    Load {
        /// Vehicle resolved when the load was requested.
        vehicle_id: String,
    },
}

impl TimerKind {
    /// Delay before this timer fires.
    pub fn delay(&self, config: &EngineConfig) -> Duration {
        match self {
            TimerKind::ConfirmReceived => config.receive_delay,
            TimerKind::Ready => config.ready_delay,
            TimerKind::Load { .. } => config.load_delay,
        }
    }

    /// State machine step applied on firing.
    pub fn transition(&self) -> Transition {
        match self {
            TimerKind::ConfirmReceived => Transition::Confirm,
            TimerKind::Ready => Transition::Ready,
            TimerKind::Load { .. } => Transition::Load,
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            TimerKind::ConfirmReceived => "confirm",
            TimerKind::Ready => "ready",
            TimerKind::Load { .. } => "load",
        }
    }
}

/// A delayed effect bound to one package.
#[derive(Debug, Clone)]
pub struct ScheduledTransition {
    /// Target package.
    pub package_id: String,
    /// Package generation captured at scheduling time.
    pub generation: u64,
    /// Effect to apply.
    pub kind: TimerKind,
    /// Where the resulting event goes.
    pub origin: Origin,
}

/// Spawns timer tasks and counts them.
#[derive(Debug, Default)]
pub struct Scheduler {
    pending: Arc<AtomicUsize>,
    fired: AtomicU64,
    stale: AtomicU64,
}

/// Decrements the pending counter when the timer task ends, even on panic.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Result of firing one timer.
#[derive(Debug, Clone, PartialEq)]
pub enum FireOutcome {
    /// The package no longer exists.
    Missing,
    /// The package generation changed while the timer slept.
    Stale,
    /// The transition table rejected the step (superseded progress).
    Superseded(PackageStatus),
    /// An event was emitted.
    Emitted(Event),
}

impl Scheduler {
    /// New scheduler with no pending timers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Timers spawned and not yet fired.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Timers that fired and emitted an event.
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Timers that fired after their package generation moved on.
    pub fn stale(&self) -> u64 {
        self.stale.load(Ordering::Relaxed)
    }

    /// Spawn `timer` on the current tokio runtime.
    pub fn schedule(&self, engine: &Arc<Engine>, timer: ScheduledTransition) {
        let delay = timer.kind.delay(engine.config());
        debug!(
            package_id = %timer.package_id,
            kind = timer.kind.operation(),
            generation = timer.generation,
            delay_ms = delay.as_millis() as u64,
            "Timer scheduled"
        );

        self.pending.fetch_add(1, Ordering::Relaxed);
        let guard = PendingGuard(self.pending.clone());
        let engine = engine.clone();
        tokio::spawn(async move {
            let _guard = guard;
            tokio::time::sleep(delay).await;
            fire(&engine, timer);
        });
    }
}

/// Fire `timer` now.
///
/// The resulting event, if any, is delivered to the timer's origin. A
/// successful receipt confirmation schedules the ready timer.
pub fn fire(engine: &Arc<Engine>, timer: ScheduledTransition) -> FireOutcome {
    let ScheduledTransition {
        package_id,
        generation,
        kind,
        origin,
    } = timer;

    let (event, follow_up) = {
        let mut store = engine.store();
        let package = match store.get_mut(&package_id) {
            Ok(package) => package,
            Err(_) => {
                warn!(
                    package_id = %package_id,
                    kind = kind.operation(),
                    "Timer fired for unknown package"
                );
                return FireOutcome::Missing;
            }
        };

        if package.generation != generation {
            engine.scheduler().stale.fetch_add(1, Ordering::Relaxed);
            debug!(
                package_id = %package_id,
                kind = kind.operation(),
                scheduled = generation,
                current = package.generation,
                "Stale timer ignored"
            );
            return FireOutcome::Stale;
        }

        let transition = kind.transition();
        if package.allows(transition).is_none() {
            debug!(
                package_id = %package_id,
                status = %package.status,
                transition = transition.name(),
                "Timer superseded"
            );
            return FireOutcome::Superseded(package.status);
        }

        if engine.failure().should_fail() {
            let err = EngineError::InjectedFailure {
                operation: kind.operation(),
                package_id: Some(package_id.clone()),
                order_id: Some(package.order_id.clone()),
            };
            package.fail(err.error_code());
            warn!(package_id = %package_id, kind = kind.operation(), "Injected failure");
            (err.to_event(), None)
        } else {
            // The table accepted the step above, so these only fail on a bug.
            let applied = match &kind {
                TimerKind::Load { vehicle_id } => package.load(vehicle_id.clone()),
                _ => package.apply(transition),
            };
            match applied {
                Ok(at) => {
                    let status = match transition {
                        Transition::Confirm => PackageStatus::Received,
                        _ => package.status,
                    };
                    info!(package_id = %package_id, status = %status, "Package advanced");
                    let follow_up = (kind == TimerKind::ConfirmReceived).then(|| {
                        ScheduledTransition {
                            package_id: package_id.clone(),
                            generation: package.generation,
                            kind: TimerKind::Ready,
                            origin: origin.clone(),
                        }
                    });
                    (package.status_event(status, at), follow_up)
                }
                Err(err) => {
                    warn!(package_id = %package_id, error = %err, "Timer transition rejected");
                    return FireOutcome::Superseded(package.status);
                }
            }
        }
    };

    engine.scheduler().fired.fetch_add(1, Ordering::Relaxed);
    if engine.registry().deliver(&origin, event.clone()) != Delivery::Delivered {
        debug!(package_id = %package_id, kind = event.kind(), "Event dropped, origin gone");
    }
    if let Some(next) = follow_up {
        engine.scheduler().schedule(engine, next);
    }
    FireOutcome::Emitted(event)
}
