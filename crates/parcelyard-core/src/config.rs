// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Default TCP port adapters connect to.
pub const DEFAULT_PORT: u16 = 7400;

/// Parcelyard server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address adapters connect to
    pub bind_addr: SocketAddr,
    /// Timing and failure-injection settings for the engine
    pub engine: EngineConfig,
}

/// Engine timing and failure-injection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Delay between accepting a package and the `package_received` confirmation
    pub receive_delay: Duration,
    /// Additional delay between the confirmation and `package_ready`
    pub ready_delay: Duration,
    /// Delay between a load command and its outcome
    pub load_delay: Duration,
    /// Probability in `[0, 1]` that a state-advancing step fails
    pub failure_rate: f64,
    /// Make every state-advancing step fail
    pub force_failure: bool,
    /// Seed for the failure sampler; random when unset
    pub failure_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            receive_delay: Duration::from_millis(1_000),
            ready_delay: Duration::from_millis(2_000),
            load_delay: Duration::from_millis(1_500),
            failure_rate: 0.0,
            force_failure: false,
            failure_seed: None,
        }
    }
}

impl EngineConfig {
    /// Same settings with all three delays replaced.
    pub fn with_delays(mut self, receive: Duration, ready: Duration, load: Duration) -> Self {
        self.receive_delay = receive;
        self.ready_delay = ready;
        self.load_delay = load;
        self
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `PARCELYARD_PORT`: TCP server port (default: 7400)
    /// - `PARCELYARD_RECEIVE_DELAY_MS`: receive confirmation delay (default: 1000)
    /// - `PARCELYARD_READY_DELAY_MS`: extra delay before ready (default: 2000)
    /// - `PARCELYARD_LOAD_DELAY_MS`: load outcome delay (default: 1500)
    /// - `PARCELYARD_FAILURE_RATE`: random failure rate in [0, 1] (default: 0)
    /// - `PARCELYARD_FORCE_FAILURE`: forced failure mode (default: false)
    /// - `PARCELYARD_FAILURE_SEED`: failure sampler seed (default: unset)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = EngineConfig::default();

        let port: u16 = parse_var(
            "PARCELYARD_PORT",
            DEFAULT_PORT,
            "must be a valid port number",
        )?;

        let receive_delay = parse_millis("PARCELYARD_RECEIVE_DELAY_MS", defaults.receive_delay)?;
        let ready_delay = parse_millis("PARCELYARD_READY_DELAY_MS", defaults.ready_delay)?;
        let load_delay = parse_millis("PARCELYARD_LOAD_DELAY_MS", defaults.load_delay)?;

        let failure_rate: f64 = parse_var(
            "PARCELYARD_FAILURE_RATE",
            defaults.failure_rate,
            "must be a number between 0 and 1",
        )?;
        if !(0.0..=1.0).contains(&failure_rate) {
            return Err(ConfigError::Invalid(
                "PARCELYARD_FAILURE_RATE",
                "must be a number between 0 and 1",
            ));
        }

        let force_failure = match std::env::var("PARCELYARD_FORCE_FAILURE") {
            Ok(value) => parse_bool(&value).ok_or(ConfigError::Invalid(
                "PARCELYARD_FORCE_FAILURE",
                "must be true or false",
            ))?,
            Err(_) => defaults.force_failure,
        };

        let failure_seed = match std::env::var("PARCELYARD_FAILURE_SEED") {
            Ok(value) => Some(value.parse().map_err(|_| {
                ConfigError::Invalid("PARCELYARD_FAILURE_SEED", "must be an unsigned integer")
            })?),
            Err(_) => None,
        };

        Ok(Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            engine: EngineConfig {
                receive_delay,
                ready_delay,
                load_delay,
                failure_rate,
                force_failure,
                failure_seed,
            },
        })
    }
}

fn parse_var<T: FromStr + ToString>(
    name: &'static str,
    default: T,
    hint: &'static str,
) -> Result<T, ConfigError> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(name, hint))
}

fn parse_millis(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let millis: u64 = parse_var(
        name,
        default.as_millis() as u64,
        "must be a non-negative number of milliseconds",
    )?;
    Ok(Duration::from_millis(millis))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
