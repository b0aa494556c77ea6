// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for parcelyard-core.
//!
//! This module provides [`EngineRuntime`] which allows embedding the engine
//! into an existing tokio application instead of running it as a standalone server.
//!
//! # Example
//!
//! ```rust,ignore
//! use parcelyard_core::config::EngineConfig;
//! use parcelyard_core::runtime::EngineRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = EngineRuntime::builder()
//!         .config(EngineConfig::default())
//!         .bind_addr("127.0.0.1:7400".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... drive adapters against runtime.local_addr() ...
//!     runtime.engine().set_force_failure(true);
//!
//!     // Graceful shutdown
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{DEFAULT_PORT, EngineConfig};
use crate::engine::Engine;
use crate::server::run_server;

/// Builder for creating an [`EngineRuntime`].
#[derive(Debug)]
pub struct EngineRuntimeBuilder {
    config: EngineConfig,
    engine: Option<Arc<Engine>>,
    bind_addr: SocketAddr,
}

impl Default for EngineRuntimeBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            engine: None,
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
        }
    }
}

impl EngineRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timing and failure configuration.
    ///
    /// Ignored if an existing engine is supplied with [`engine`](Self::engine).
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Serve an existing engine instead of creating one.
    pub fn engine(mut self, engine: Arc<Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the bind address for the adapter server.
    ///
    /// Default: `0.0.0.0:7400`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if the engine configuration is invalid.
    pub fn build(self) -> Result<EngineRuntimeConfig> {
        let engine = match self.engine {
            Some(engine) => engine,
            None => Engine::new(self.config)?,
        };

        Ok(EngineRuntimeConfig {
            engine,
            bind_addr: self.bind_addr,
        })
    }
}

/// Configuration for an [`EngineRuntime`].
#[derive(Debug)]
pub struct EngineRuntimeConfig {
    engine: Arc<Engine>,
    bind_addr: SocketAddr,
}

impl EngineRuntimeConfig {
    /// Bind the listener and spawn the server task.
    pub async fn start(self) -> Result<EngineRuntime> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let server_handle = tokio::spawn(run_server(listener, self.engine.clone(), shutdown_rx));

        info!(addr = %local_addr, "EngineRuntime started");

        Ok(EngineRuntime {
            server_handle,
            shutdown_tx,
            engine: self.engine,
            local_addr,
        })
    }
}

/// A running engine that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct EngineRuntime {
    server_handle: JoinHandle<Result<()>>,
    shutdown_tx: watch::Sender<bool>,
    engine: Arc<Engine>,
    local_addr: SocketAddr,
}

impl EngineRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EngineRuntimeBuilder {
        EngineRuntimeBuilder::new()
    }

    /// Address the server is actually listening on (port resolved if 0 was requested).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared engine, for management calls.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops accepting, closes open connections and waits for the server task.
    /// Pending timers are not awaited.
    pub async fn shutdown(self) -> Result<()> {
        info!("EngineRuntime shutting down...");

        let _ = self.shutdown_tx.send(true);

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("EngineRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("EngineRuntime server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("EngineRuntime server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_builder_default() {
        let builder = EngineRuntimeBuilder::default();
        assert!(builder.engine.is_none());
        assert_eq!(builder.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(builder.config, EngineConfig::default());
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let config = EngineConfig::default().with_delays(
            Duration::from_millis(1),
            Duration::from_millis(2),
            Duration::from_millis(3),
        );
        let builder = EngineRuntimeBuilder::new()
            .config(config.clone())
            .bind_addr(addr);
        assert_eq!(builder.bind_addr.port(), 9001);
        assert_eq!(builder.config, config);
    }

    #[test]
    fn test_builder_uses_supplied_engine() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let config = EngineRuntime::builder().engine(engine.clone()).build().unwrap();
        assert!(Arc::ptr_eq(&config.engine, &engine));
    }

    #[test]
    fn test_builder_build_invalid_config() {
        let result = EngineRuntimeBuilder::new()
            .config(EngineConfig {
                failure_rate: 1.5,
                ..Default::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_runtime_start_and_shutdown() {
        let runtime = EngineRuntime::builder()
            .bind_addr("127.0.0.1:0".parse().unwrap())
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        assert!(runtime.is_running());
        assert_ne!(runtime.local_addr().port(), 0);
        assert_eq!(runtime.engine().packages().len(), 0);

        runtime.shutdown().await.unwrap();
    }
}
