// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TCP server for parcelyard-core.
//!
//! Accepts adapter connections and feeds their lines to the engine. Each
//! connection gets a reader loop and a writer task draining its outbound queue,
//! so timer events from other tasks never interleave mid-line.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use parcelyard_protocol::FramedReader;
use parcelyard_protocol::frame::write_line;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::engine::Engine;
use crate::registry::Inbox;

/// Accept connections until `shutdown_rx` flips to `true`.
pub async fn run_server(
    listener: TcpListener,
    engine: Arc<Engine>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "Adapter server listening");

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Adapter server received shutdown signal");
                    break;
                }
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let engine = engine.clone();
                        let shutdown = shutdown_rx.clone();
                        tokio::spawn(handle_connection(stream, peer, engine, shutdown));
                    }
                    Err(e) => {
                        // Transient (e.g. fd exhaustion); keep accepting.
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }
        }
    }

    info!("Adapter server stopped");
    Ok(())
}

/// Serve one adapter connection until the peer disconnects or the server shuts down.
#[instrument(skip(stream, engine, shutdown), fields(peer = %peer))]
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    engine: Arc<Engine>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    let (read_half, write_half) = stream.into_split();
    let (connection, inbox) = engine.open_connection(Some(peer));
    let (closing_tx, closing_rx) = watch::channel(false);
    let writer = tokio::spawn(write_events(write_half, inbox, closing_rx));

    info!(connection = %connection.id, "Adapter connection accepted");

    let mut reader = FramedReader::new(read_half);
    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(connection = %connection.id, "Closing connection for shutdown");
                    break;
                }
            }

            line = reader.next_line() => match line {
                Ok(Some(line)) => engine.handle_line(&connection, &line),
                Ok(None) => break,
                Err(e) if e.is_recoverable() => engine.handle_frame_error(&connection, e),
                Err(e) => {
                    warn!(connection = %connection.id, error = %e, "Connection read failed");
                    break;
                }
            },
        }
    }

    engine.close_connection(&connection);
    let _ = closing_tx.send(true);
    if let Err(e) = writer.await {
        error!(error = %e, "Connection writer task panicked");
    }

    info!(connection = %connection.id, "Adapter connection closed");
}

/// Write queued events until the connection closes.
///
/// Packages keep handles to their origin connection, so the queue never
/// reports closed on its own; `closing` ends the loop after a final drain.
async fn write_events(
    mut writer: OwnedWriteHalf,
    mut inbox: Inbox,
    mut closing: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            biased;

            event = inbox.recv() => match event {
                Some(event) => event,
                None => break,
            },

            _ = closing.changed() => {
                while let Ok(event) = inbox.try_recv() {
                    if write_line(&mut writer, &event).await.is_err() {
                        return;
                    }
                }
                break;
            }
        };

        if let Err(e) = write_line(&mut writer, &event).await {
            debug!(error = %e, kind = event.kind(), "Write failed, dropping connection output");
            return;
        }
    }

    let _ = writer.shutdown().await;
}
