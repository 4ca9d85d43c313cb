//! Text fan-out to connected clients.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use super::registry::ConnectionRegistry;

/// Result of one broadcast call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Open connections in the snapshot.
    pub recipients: usize,
    pub delivered: usize,
    /// Sends that failed; those connections were pruned.
    pub failed: usize,
}

/// Sends text frames to every open connection in the registry.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Send `text` (`None` means empty) to a snapshot of the open
    /// connections and wait for every send to settle. One failing client
    /// never affects the others; it is logged, removed and aborted.
    pub async fn broadcast(&self, text: Option<&str>) -> BroadcastReport {
        let text = text.unwrap_or_default();
        let targets: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|c| c.is_open())
            .collect();

        let mut report = BroadcastReport {
            recipients: targets.len(),
            ..Default::default()
        };
        if targets.is_empty() {
            debug!("broadcast with no connected clients");
            return report;
        }

        let results = join_all(targets.iter().map(|conn| conn.send_text(text))).await;

        for (conn, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(connection_id = %conn.id, error = %e, "broadcast send failed, dropping client");
                    let _ = self.registry.remove(&conn.id);
                    conn.abort();
                    report.failed += 1;
                }
            }
        }

        debug!(
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed,
            bytes = text.len(),
            "broadcast text"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::tests::{broken_connection, channel_connection};
    use crate::websocket::connection::{Connection, ConnectionState};
    use axum::extract::ws::Message;

    fn expect_text(msg: Option<Message>, expected: &str) {
        match msg {
            Some(Message::Text(t)) => assert_eq!(t.as_str(), expected),
            other => panic!("expected text {expected:?}, got {other:?}"),
        }
    }

    fn register(registry: &ConnectionRegistry, conn: Connection, state: ConnectionState) -> Arc<Connection> {
        let conn = Arc::new(conn);
        conn.set_state(state);
        registry.add(conn.clone());
        conn
    }

    #[tokio::test]
    async fn delivers_to_every_open_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, mut rx_a) = channel_connection();
        let (b, mut rx_b) = channel_connection();
        register(&registry, a, ConnectionState::Open);
        register(&registry, b, ConnectionState::Open);

        let report = Broadcaster::new(registry.clone()).broadcast(Some("Verse 1")).await;

        assert_eq!(report, BroadcastReport { recipients: 2, delivered: 2, failed: 0 });
        expect_text(rx_a.try_next().unwrap(), "Verse 1");
        expect_text(rx_b.try_next().unwrap(), "Verse 1");
        assert!(rx_a.try_next().is_err());
    }

    #[tokio::test]
    async fn none_is_sent_as_empty_text() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, mut rx) = channel_connection();
        register(&registry, a, ConnectionState::Open);

        Broadcaster::new(registry).broadcast(None).await;
        expect_text(rx.try_next().unwrap(), "");
    }

    #[tokio::test]
    async fn no_connections_is_success() {
        let report = Broadcaster::new(Arc::new(ConnectionRegistry::new()))
            .broadcast(Some("x"))
            .await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn skips_connections_that_are_not_open() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (connecting, mut rx_connecting) = channel_connection();
        let (closing, mut rx_closing) = channel_connection();
        register(&registry, connecting, ConnectionState::Connecting);
        register(&registry, closing, ConnectionState::Closing);

        let report = Broadcaster::new(registry.clone()).broadcast(Some("x")).await;
        assert_eq!(report.recipients, 0);
        assert!(rx_connecting.try_next().is_err());
        assert!(rx_closing.try_next().is_err());
    }

    #[tokio::test]
    async fn failed_send_prunes_only_that_client() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (good, mut rx) = channel_connection();
        let good = register(&registry, good, ConnectionState::Open);
        let bad = register(&registry, broken_connection(), ConnectionState::Open);

        let report = Broadcaster::new(registry.clone()).broadcast(Some("hello")).await;

        assert_eq!(report, BroadcastReport { recipients: 2, delivered: 1, failed: 1 });
        expect_text(rx.try_next().unwrap(), "hello");
        assert!(registry.get(&good.id).is_some());
        assert!(registry.get(&bad.id).is_none());
        assert_eq!(bad.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn removed_connection_gets_nothing() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, mut rx) = channel_connection();
        let a = register(&registry, a, ConnectionState::Open);
        registry.remove(&a.id);

        Broadcaster::new(registry).broadcast(Some("late")).await;
        assert!(rx.try_next().is_err());
    }
}
