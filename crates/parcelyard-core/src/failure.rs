// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Failure injection.
//!
//! Consulted before every state-advancing step (receive acceptance, the ready
//! transition, the load transition). Each check is an independent trial.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::error::{EngineError, Result};

/// Forced-failure toggle plus a random failure rate.
#[derive(Debug)]
pub struct FailureInjector {
    force: AtomicBool,
    /// `f64` bits of the rate.
    rate: AtomicU64,
    rng: Mutex<StdRng>,
    injected: AtomicU64,
}

impl FailureInjector {
    /// Create an injector. `seed` makes the sampling sequence reproducible.
    ///
    /// Returns a validation error if `rate` is outside `[0, 1]`.
    pub fn new(force: bool, rate: f64, seed: Option<u64>) -> Result<Self> {
        validate_rate(rate)?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            force: AtomicBool::new(force),
            rate: AtomicU64::new(rate.to_bits()),
            rng: Mutex::new(rng),
            injected: AtomicU64::new(0),
        })
    }

    /// Whether forced failure mode is on.
    pub fn is_forced(&self) -> bool {
        self.force.load(Ordering::Relaxed)
    }

    /// Turn forced failure mode on or off.
    pub fn set_forced(&self, force: bool) {
        info!(force, "Forced failure mode changed");
        self.force.store(force, Ordering::Relaxed);
    }

    /// Current random failure rate.
    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Relaxed))
    }

    /// Set the random failure rate.
    pub fn set_rate(&self, rate: f64) -> Result<()> {
        validate_rate(rate)?;
        info!(rate, "Failure rate changed");
        self.rate.store(rate.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Number of failures injected so far.
    pub fn injected_count(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }

    /// Decide whether the next step fails.
    pub fn should_fail(&self) -> bool {
        let fail = if self.is_forced() {
            true
        } else {
            let rate = self.rate();
            rate > 0.0 && self.draw() < rate
        };

        if fail {
            self.injected.fetch_add(1, Ordering::Relaxed);
            debug!("Failure injected");
        }
        fail
    }

    /// Uniform sample in `[0, 1)`.
    fn draw(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.r#gen::<f64>()
    }
}

fn validate_rate(rate: f64) -> Result<()> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(EngineError::InvalidValue {
            field: "failureRate",
            message: format!("{} is not within [0, 1]", rate),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_never_fails() {
        let injector = FailureInjector::new(false, 0.0, Some(0)).unwrap();
        assert!((0..1_000).all(|_| !injector.should_fail()));
        assert_eq!(injector.injected_count(), 0);
    }

    #[test]
    fn test_forced_always_fails() {
        let injector = FailureInjector::new(true, 0.0, Some(1)).unwrap();
        assert!((0..1_000).all(|_| injector.should_fail()));
        assert_eq!(injector.injected_count(), 1_000);

        injector.set_forced(false);
        assert!(!injector.should_fail());
    }

    #[test]
    fn test_rate_one_always_fails() {
        let injector = FailureInjector::new(false, 1.0, Some(7)).unwrap();
        assert!((0..1_000).all(|_| injector.should_fail()));
    }

    #[test]
    fn test_rate_is_sampled_independently() {
        let injector = FailureInjector::new(false, 0.3, Some(42)).unwrap();
        let failures = (0..10_000).filter(|_| injector.should_fail()).count();
        // Loose bounds; the seed makes this deterministic anyway.
        assert!((2_500..3_500).contains(&failures), "got {}", failures);
    }

    #[test]
    fn test_seeded_sequences_repeat() {
        let a = FailureInjector::new(false, 0.5, Some(99)).unwrap();
        let b = FailureInjector::new(false, 0.5, Some(99)).unwrap();
        let run_a: Vec<bool> = (0..64).map(|_| a.should_fail()).collect();
        let run_b: Vec<bool> = (0..64).map(|_| b.should_fail()).collect();
        assert_eq!(run_a, run_b);
    }

    #[test]
    fn test_invalid_rates_rejected() {
        assert!(FailureInjector::new(false, 1.01, None).is_err());
        assert!(FailureInjector::new(false, -0.1, None).is_err());

        let injector = FailureInjector::new(false, 0.0, Some(0)).unwrap();
        let err = injector.set_rate(f64::NAN).unwrap_err();
        assert_eq!(err.error_code(), "validation_error");
        assert_eq!(injector.rate(), 0.0);

        injector.set_rate(0.5).unwrap();
        assert_eq!(injector.rate(), 0.5);
    }
}
