//! Concurrent set of live connections.

use std::sync::Arc;

use dashmap::DashMap;
use everse_core::ConnectionId;

use super::connection::Connection;

/// Registry of all accepted WebSocket connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, connection: Arc<Connection>) {
        let _ = self.connections.insert(connection.id.clone(), connection);
    }

    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.remove(id).map(|(_, conn)| conn)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Point-in-time copy; later adds and removes do not affect it.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Remove and abort every connection. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| e.key().clone()).collect();
        let mut closed = 0;
        for id in ids {
            if let Some(conn) = self.remove(&id) {
                conn.abort();
                closed += 1;
            }
        }
        closed
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::tests::channel_connection;
    use crate::websocket::connection::ConnectionState;

    fn make() -> Arc<Connection> {
        Arc::new(channel_connection().0)
    }

    #[test]
    fn add_and_remove() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty());

        let a = make();
        let b = make();
        registry.add(a.clone());
        registry.add(b.clone());
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&a.id).is_some());

        assert!(registry.remove(&a.id).is_some());
        assert!(registry.remove(&a.id).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_is_detached() {
        let registry = ConnectionRegistry::new();
        let a = make();
        registry.add(a.clone());

        let snap = registry.snapshot();
        registry.remove(&a.id);
        registry.add(make());

        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id, a.id);
    }

    #[test]
    fn close_all_aborts_and_clears() {
        let registry = ConnectionRegistry::new();
        let conns: Vec<_> = (0..3).map(|_| make()).collect();
        for c in &conns {
            c.set_state(ConnectionState::Open);
            registry.add(c.clone());
        }

        assert_eq!(registry.close_all(), 3);
        assert!(registry.is_empty());
        for c in &conns {
            assert_eq!(c.state(), ConnectionState::Closed);
            assert!(c.is_aborted());
        }
        assert_eq!(registry.close_all(), 0);
    }

    #[tokio::test]
    async fn concurrent_add_remove_snapshot() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let conn = make();
                    registry.add(conn.clone());
                    let _ = registry.snapshot();
                    registry.remove(&conn.id);
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert!(registry.is_empty());
    }
}
