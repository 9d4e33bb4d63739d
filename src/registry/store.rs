//! Connection registry implementation

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::peer::PeerConnection;
use crate::pipeline::Detector;
use crate::transport::PeerTransport;

use super::error::RegistryError;
use super::id::{ConnectionId, IdAllocator};

/// Table of live connections
///
/// Thread-safe via `RwLock`. Lookups take the read lock; the write lock is
/// only held to insert or remove an entry, never across a teardown.
pub struct ConnectionRegistry<T: PeerTransport, D: Detector> {
    connections: RwLock<HashMap<ConnectionId, Arc<PeerConnection<T, D>>>>,
    ids: IdAllocator,
}

impl<T: PeerTransport, D: Detector> ConnectionRegistry<T, D> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            ids: IdAllocator::new(),
        }
    }

    /// Allocate an id for a new connection
    pub fn next_id(&self) -> ConnectionId {
        self.ids.next()
    }

    /// Add a live connection
    pub async fn register(&self, connection: Arc<PeerConnection<T, D>>) -> Result<(), RegistryError> {
        let id = connection.id();
        let mut connections = self.connections.write().await;

        if connections.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        connections.insert(id, connection);

        tracing::info!(
            connection_id = %id,
            connections = connections.len(),
            "Connection registered"
        );

        Ok(())
    }

    /// Close and remove a connection
    ///
    /// Returns once the connection's pipeline has stopped; no detection result
    /// for it is delivered afterwards. Concurrent or repeated calls all wait
    /// for the same teardown and only one returns true.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let connection = self.connections.read().await.get(&id).cloned();
        let Some(connection) = connection else {
            return false;
        };

        connection.close().await;

        let removed = self.connections.write().await.remove(&id).is_some();
        if removed {
            tracing::info!(
                connection_id = %id,
                state = %connection.state(),
                lifetime_secs = connection.created_at().elapsed().as_secs(),
                "Connection unregistered"
            );
        }

        removed
    }

    /// Look up a live connection
    pub async fn get(&self, id: ConnectionId) -> Option<Arc<PeerConnection<T, D>>> {
        self.connections.read().await.get(&id).cloned()
    }

    /// Snapshot of every live connection
    pub async fn all(&self) -> Vec<Arc<PeerConnection<T, D>>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Number of live connections
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Close and remove every connection
    pub async fn shutdown(&self) {
        let connections = self.all().await;
        let count = connections.len();

        for connection in connections {
            self.unregister(connection.id()).await;
        }

        tracing::info!(connections = count, "Connection registry shut down");
    }
}

impl<T: PeerTransport, D: Detector> Default for ConnectionRegistry<T, D> {
    fn default() -> Self {
        Self::new()
    }
}
