// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Adapter registry.
//!
//! Maps adapter identities to live connections. Each connection owns an
//! unbounded outbox drained by its writer task, so delivery never blocks the
//! caller and a closed socket shows up as [`Delivery::Disconnected`].

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use parcelyard_protocol::Event;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Sending side of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedSender<Event>;

/// Receiving side of a connection's outbound queue.
pub type Inbox = mpsc::UnboundedReceiver<Event>;

/// Process-unique connection number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Handle to one live connection.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Connection number.
    pub id: ConnectionId,
    /// Remote address, when the connection is a socket.
    pub peer: Option<SocketAddr>,
    outbox: Outbox,
}

impl Connection {
    /// Wrap an outbox.
    pub fn new(id: ConnectionId, peer: Option<SocketAddr>, outbox: Outbox) -> Self {
        Self { id, peer, outbox }
    }

    /// Queue an event for this connection.
    pub fn send(&self, event: Event) -> Delivery {
        match self.outbox.send(event) {
            Ok(()) => Delivery::Delivered,
            Err(_) => {
                debug!(connection = %self.id, "Dropping event for closed connection");
                Delivery::Disconnected
            }
        }
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }
}

/// Where replies for a command (and its delayed effects) should go.
#[derive(Debug, Clone)]
pub struct Origin {
    /// Adapter identity bound to the connection when the command arrived.
    pub adapter_id: Option<String>,
    connection: Option<Connection>,
}

impl Origin {
    /// Origin for a command received on `connection`.
    pub fn new(adapter_id: Option<String>, connection: Connection) -> Self {
        Self {
            adapter_id,
            connection: Some(connection),
        }
    }

    /// Origin with nowhere to reply, for in-process callers.
    pub fn detached() -> Self {
        Self {
            adapter_id: None,
            connection: None,
        }
    }

    /// Connection the command arrived on.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(|c| c.id)
    }

    /// Whether the command came from an unregistered connection.
    pub fn is_anonymous(&self) -> bool {
        self.adapter_id.is_none()
    }
}

/// Outcome of a best-effort delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on a live connection.
    Delivered,
    /// No adapter is registered under the identity.
    UnknownAdapter,
    /// The target connection is closed.
    Disconnected,
}

/// Registered adapter, as exposed to the management surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterInfo {
    /// Adapter identity.
    pub adapter_id: String,
    /// Declared capability tags.
    pub capabilities: Vec<String>,
    /// Connection the identity is bound to.
    pub connection_id: ConnectionId,
    /// Remote address of that connection.
    pub peer: Option<SocketAddr>,
    /// When the identity was (last) registered.
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug)]
struct AdapterEntry {
    capabilities: Vec<String>,
    connection: Connection,
    registered_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    adapters: HashMap<String, AdapterEntry>,
    by_connection: HashMap<ConnectionId, String>,
}

/// Identity → connection map with directed and broadcast delivery.
#[derive(Debug, Default)]
pub struct AdapterRegistry {
    inner: Mutex<RegistryInner>,
}

/// Generate an adapter identity for registrations that bring none.
pub fn new_adapter_id() -> String {
    format!("adapter-{}", Uuid::new_v4())
}

impl AdapterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind an identity to `connection`, returning the resolved identity.
    ///
    /// A blank or absent identity is replaced by a generated one. An identity
    /// already bound to another connection moves to this one; an identity this
    /// connection held before is dropped.
    pub fn register(
        &self,
        connection: &Connection,
        adapter_id: Option<String>,
        capabilities: Vec<String>,
    ) -> String {
        let adapter_id = adapter_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(new_adapter_id);

        let mut inner = self.lock();

        if let Some(previous) = inner
            .by_connection
            .insert(connection.id, adapter_id.clone())
            && previous != adapter_id
        {
            debug!(
                connection = %connection.id,
                previous = %previous,
                "Connection re-registered under new identity"
            );
            inner.adapters.remove(&previous);
        }

        let entry = AdapterEntry {
            capabilities,
            connection: connection.clone(),
            registered_at: Utc::now(),
        };
        if let Some(replaced) = inner.adapters.insert(adapter_id.clone(), entry)
            && replaced.connection.id != connection.id
        {
            info!(
                adapter_id = %adapter_id,
                old_connection = %replaced.connection.id,
                new_connection = %connection.id,
                "Adapter identity moved to new connection"
            );
            inner.by_connection.remove(&replaced.connection.id);
        }

        adapter_id
    }

    /// Identity bound to a connection, if any.
    pub fn adapter_for(&self, connection: ConnectionId) -> Option<String> {
        self.lock().by_connection.get(&connection).cloned()
    }

    /// Remove whatever identity is still bound to `connection`.
    pub fn unregister_connection(&self, connection: ConnectionId) -> Option<String> {
        let mut inner = self.lock();
        let adapter_id = inner.by_connection.remove(&connection)?;
        let bound_here = inner
            .adapters
            .get(&adapter_id)
            .is_some_and(|entry| entry.connection.id == connection);
        if bound_here {
            inner.adapters.remove(&adapter_id);
        }
        Some(adapter_id)
    }

    /// Best-effort delivery to one adapter.
    pub fn send(&self, adapter_id: &str, event: Event) -> Delivery {
        let connection = match self.lock().adapters.get(adapter_id) {
            Some(entry) => entry.connection.clone(),
            None => return Delivery::UnknownAdapter,
        };
        connection.send(event)
    }

    /// Best-effort delivery to every adapter except `exclude`. Returns the number delivered.
    pub fn broadcast(&self, event: &Event, exclude: Option<ConnectionId>) -> usize {
        let targets: Vec<Connection> = self
            .lock()
            .adapters
            .values()
            .filter(|entry| Some(entry.connection.id) != exclude)
            .map(|entry| entry.connection.clone())
            .collect();

        targets
            .iter()
            .filter(|connection| connection.send(event.clone()) == Delivery::Delivered)
            .count()
    }

    /// Deliver to a command's origin.
    ///
    /// Follows the adapter identity if it is still registered (possibly on a
    /// newer connection), otherwise falls back to the original connection.
    pub fn deliver(&self, origin: &Origin, event: Event) -> Delivery {
        if let Some(adapter_id) = &origin.adapter_id
            && self.send(adapter_id, event.clone()) == Delivery::Delivered
        {
            return Delivery::Delivered;
        }
        match &origin.connection {
            Some(connection) => connection.send(event),
            None => Delivery::Disconnected,
        }
    }

    /// Number of registered adapters.
    pub fn len(&self) -> usize {
        self.lock().adapters.len()
    }

    /// Whether no adapter is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().adapters.is_empty()
    }

    /// Snapshot of registered adapters, sorted by identity.
    pub fn list(&self) -> Vec<AdapterInfo> {
        let mut adapters: Vec<AdapterInfo> = self
            .lock()
            .adapters
            .iter()
            .map(|(adapter_id, entry)| AdapterInfo {
                adapter_id: adapter_id.clone(),
                capabilities: entry.capabilities.clone(),
                connection_id: entry.connection.id,
                peer: entry.connection.peer,
                registered_at: entry.registered_at,
            })
            .collect();
        adapters.sort_by(|a, b| a.adapter_id.cmp(&b.adapter_id));
        adapters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(id: u64) -> (Connection, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection::new(ConnectionId(id), None, tx), rx)
    }

    fn ping() -> Event {
        Event::error("ping")
    }

    #[test]
    fn test_register_with_and_without_identity() {
        let registry = AdapterRegistry::new();
        let (c1, _rx1) = connection(1);
        let (c2, _rx2) = connection(2);

        assert_eq!(registry.register(&c1, Some("dock-1".into()), vec![]), "dock-1");
        let generated = registry.register(&c2, None, vec!["scan".into()]);
        assert!(generated.starts_with("adapter-"));

        let blank = registry.register(&c2, Some("   ".into()), vec![]);
        assert!(blank.starts_with("adapter-"));
        assert_ne!(blank, generated);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.adapter_for(ConnectionId(1)).as_deref(), Some("dock-1"));
    }

    #[test]
    fn test_reregistration_moves_identity() {
        let registry = AdapterRegistry::new();
        let (c1, mut rx1) = connection(1);
        let (c2, mut rx2) = connection(2);

        registry.register(&c1, Some("dock".into()), vec![]);
        registry.register(&c2, Some("dock".into()), vec![]);

        assert_eq!(registry.send("dock", ping()), Delivery::Delivered);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.adapter_for(ConnectionId(1)), None);

        // Closing the old connection must not evict the moved identity.
        assert_eq!(registry.unregister_connection(ConnectionId(1)), None);
        assert_eq!(registry.send("dock", ping()), Delivery::Delivered);
    }

    #[test]
    fn test_one_identity_per_connection() {
        let registry = AdapterRegistry::new();
        let (c1, _rx1) = connection(1);

        registry.register(&c1, Some("first".into()), vec![]);
        registry.register(&c1, Some("second".into()), vec![]);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.send("first", ping()), Delivery::UnknownAdapter);
        assert_eq!(registry.send("second", ping()), Delivery::Delivered);
    }

    #[test]
    fn test_send_outcomes() {
        let registry = AdapterRegistry::new();
        let (c1, rx1) = connection(1);
        registry.register(&c1, Some("dock".into()), vec![]);

        assert_eq!(registry.send("nobody", ping()), Delivery::UnknownAdapter);
        drop(rx1);
        assert!(c1.is_closed());
        assert_eq!(registry.send("dock", ping()), Delivery::Disconnected);
    }

    #[test]
    fn test_broadcast_excludes_origin() {
        let registry = AdapterRegistry::new();
        let (c1, mut rx1) = connection(1);
        let (c2, mut rx2) = connection(2);
        let (c3, rx3) = connection(3);
        registry.register(&c1, Some("a".into()), vec![]);
        registry.register(&c2, Some("b".into()), vec![]);
        registry.register(&c3, Some("c".into()), vec![]);
        drop(rx3);

        let delivered = registry.broadcast(&ping(), Some(ConnectionId(1)));

        assert_eq!(delivered, 1);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_deliver_follows_identity_then_connection() {
        let registry = AdapterRegistry::new();
        let (c1, mut rx1) = connection(1);
        let (c2, mut rx2) = connection(2);

        // Anonymous origin: straight to its connection.
        let anonymous = Origin::new(None, c1.clone());
        assert!(anonymous.is_anonymous());
        assert_eq!(registry.deliver(&anonymous, ping()), Delivery::Delivered);
        assert!(rx1.try_recv().is_ok());

        // Identity moved to c2 after the command arrived on c1.
        registry.register(&c1, Some("dock".into()), vec![]);
        let origin = Origin::new(Some("dock".into()), c1.clone());
        registry.register(&c2, Some("dock".into()), vec![]);
        assert_eq!(registry.deliver(&origin, ping()), Delivery::Delivered);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());

        assert_eq!(
            registry.deliver(&Origin::detached(), ping()),
            Delivery::Disconnected
        );
    }

    #[test]
    fn test_list_is_sorted() {
        let registry = AdapterRegistry::new();
        let (c1, _rx1) = connection(1);
        let (c2, _rx2) = connection(2);
        registry.register(&c1, Some("zulu".into()), vec!["load".into()]);
        registry.register(&c2, Some("alpha".into()), vec![]);

        let adapters = registry.list();
        assert_eq!(adapters[0].adapter_id, "alpha");
        assert_eq!(adapters[1].adapter_id, "zulu");
        assert_eq!(adapters[1].capabilities, vec!["load".to_string()]);
        assert_eq!(adapters[1].connection_id, ConnectionId(1));
    }
}
