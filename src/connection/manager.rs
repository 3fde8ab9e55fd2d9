//! Registry of live connections with zombie reaping and atomic
//! check-then-register.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::service::ServiceDescription;

use super::stream::{Connection, Role};

/// Owns every established connection and answers "are we already
/// connected to this peer for this service?".
///
/// Dead streams are never trusted: every query and registration first
/// reaps connections whose stream reports closed, so a stale entry cannot
/// block a legitimate reconnect. The check-and-register step runs under a
/// single lock, closing the race where two tasks both see "not connected"
/// and both insert.
#[derive(Default)]
pub struct ConnectionManager {
    connections: Mutex<Vec<Arc<Connection>>>,
}

impl ConnectionManager {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live connection to `address` for `description` exists,
    /// regardless of role. Zombies are reaped before the check.
    pub fn is_already_connected(&self, address: &str, description: &ServiceDescription) -> bool {
        let mut connections = self.connections.lock().unwrap();
        Self::reap(&mut connections);
        connections.iter().any(|c| c.is_to(address, description))
    }

    /// Insert a connection without a duplicate check.
    ///
    /// For callers that already performed their own check-then-connect
    /// sequence; everything inside this crate goes through [`register`]
    /// instead.
    ///
    /// [`register`]: ConnectionManager::register
    pub fn add(&self, connection: Connection) -> Arc<Connection> {
        let connection = Arc::new(connection);
        self.connections
            .lock()
            .unwrap()
            .push(Arc::clone(&connection));
        connection
    }

    /// Register a connection unless a live duplicate already exists.
    ///
    /// Returns the registered connection, or `None` when a duplicate won;
    /// the loser is closed before this returns. Reap, check and insert all
    /// happen under one lock.
    pub fn register(&self, connection: Connection) -> Option<Arc<Connection>> {
        let mut connections = self.connections.lock().unwrap();
        Self::reap(&mut connections);
        let duplicate = connections
            .iter()
            .any(|c| c.is_to(connection.peer().address(), connection.description()));
        if duplicate {
            debug!(peer = %connection.peer(), service = %connection.description(),
                "duplicate connection, closing newcomer");
            connection.close();
            return None;
        }
        let connection = Arc::new(connection);
        connections.push(Arc::clone(&connection));
        Some(connection)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        let mut connections = self.connections.lock().unwrap();
        Self::reap(&mut connections);
        connections.len()
    }

    /// Whether no live connection exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close and drop every connection.
    pub fn close_all(&self) {
        let mut connections = self.connections.lock().unwrap();
        debug!(count = connections.len(), "closing all connections");
        for connection in connections.drain(..) {
            connection.close();
        }
    }

    /// Close and drop every connection for `description`, optionally only
    /// those established in the given role.
    pub fn close_for_service(&self, description: &ServiceDescription, role: Option<Role>) {
        let mut connections = self.connections.lock().unwrap();
        connections.retain(|c| {
            let matches = c.description() == description
                && role.map(|r| c.role() == r).unwrap_or(true);
            if matches {
                debug!(peer = %c.peer(), role = %c.role(), "closing connection");
                c.close();
            }
            !matches
        });
    }

    fn reap(connections: &mut Vec<Arc<Connection>>) {
        connections.retain(|c| {
            let open = c.is_open();
            if !open {
                debug!(peer = %c.peer(), service = %c.description(), "reaping dead connection");
                c.close();
            }
            open
        });
    }
}
