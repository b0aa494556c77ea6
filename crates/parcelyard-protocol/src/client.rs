// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TCP adapter client for connecting to a parcelyard engine.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info, instrument};

use crate::frame::{FrameError, FramedReader, TERMINATOR, write_line};
use crate::messages::{Command, Event, RegisterAdapter};

/// Errors that can occur in the adapter client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("unexpected event: {0}")]
    UnexpectedEvent(String),
}

/// Configuration for the adapter client
#[derive(Debug, Clone)]
pub struct AdapterClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// How long [`AdapterClient::next_event`] waits, in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for AdapterClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 7400)),
            connect_timeout_ms: 10_000,
            read_timeout_ms: 30_000,
        }
    }
}

/// Persistent adapter connection: commands out, events in.
pub struct AdapterClient {
    reader: FramedReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    config: AdapterClientConfig,
}

impl AdapterClient {
    /// Connect with default timeouts.
    pub async fn connect(server_addr: SocketAddr) -> Result<Self, ClientError> {
        Self::connect_with(AdapterClientConfig {
            server_addr,
            ..Default::default()
        })
        .await
    }

    /// Connect using the given configuration.
    #[instrument(skip(config), fields(addr = %config.server_addr))]
    pub async fn connect_with(config: AdapterClientConfig) -> Result<Self, ClientError> {
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(config.server_addr))
            .await
            .map_err(|_| ClientError::Timeout(config.connect_timeout_ms))??;
        stream.set_nodelay(true)?;

        info!("connected to parcelyard engine");

        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: FramedReader::new(read_half),
            writer,
            config,
        })
    }

    /// Local address of this connection.
    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.writer.local_addr()?)
    }

    /// Send one command.
    pub async fn send(&mut self, command: &Command) -> Result<(), ClientError> {
        debug!(kind = command.kind(), "sending command");
        write_line(&mut self.writer, command).await?;
        Ok(())
    }

    /// Send a raw line verbatim; a terminator is appended.
    pub async fn send_raw(&mut self, line: &str) -> Result<(), ClientError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(&[TERMINATOR]).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Wait for the next event using the configured read timeout.
    pub async fn next_event(&mut self) -> Result<Event, ClientError> {
        let timeout = Duration::from_millis(self.config.read_timeout_ms);
        self.try_next_event(timeout)
            .await?
            .ok_or(ClientError::Timeout(self.config.read_timeout_ms))
    }

    /// Wait up to `timeout` for an event; `Ok(None)` if nothing arrived.
    pub async fn try_next_event(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Event>, ClientError> {
        match tokio::time::timeout(timeout, self.reader.next_line()).await {
            Err(_) => Ok(None),
            Ok(line) => {
                let line = line?.ok_or(ClientError::ConnectionClosed)?;
                Ok(Some(serde_json::from_str(&line)?))
            }
        }
    }

    /// Register this connection and return the identity assigned by the engine.
    pub async fn register(
        &mut self,
        adapter_id: Option<&str>,
        capabilities: Vec<String>,
    ) -> Result<String, ClientError> {
        self.send(&Command::RegisterAdapter(RegisterAdapter {
            adapter_id: adapter_id.map(str::to_string),
            capabilities,
        }))
        .await?;

        match self.next_event().await? {
            Event::RegisterAck { adapter_id, .. } => Ok(adapter_id),
            other => Err(ClientError::UnexpectedEvent(format!("{:?}", other))),
        }
    }

    /// Close the write side, signalling EOF to the engine.
    pub async fn shutdown(mut self) -> Result<(), ClientError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
