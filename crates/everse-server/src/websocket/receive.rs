//! Per-connection receive loop enforcing the read-only contract.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, Message};
use futures::{Stream, StreamExt};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::connection::{Connection, ConnectionState};
use super::registry::ConnectionRegistry;

pub const READ_ONLY_REASON: &str = "Server is read-only";

/// How a receive loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Peer sent a close frame or the stream ended.
    Closed,
    /// Peer sent a text or binary frame.
    PolicyViolation,
    TransportError,
    /// Aborted by `stop()` or a failed broadcast.
    Aborted,
}

/// Drive one connection until it terminates, then unregister it.
///
/// Pings the peer every `keep_alive`. Control frames from the peer are
/// ignored; any data frame closes the connection with 1008.
pub async fn run_receive_loop<S>(
    conn: Arc<Connection>,
    mut stream: S,
    registry: Arc<ConnectionRegistry>,
    keep_alive: Duration,
) -> ReceiveOutcome
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut ping = interval_at(Instant::now() + keep_alive, keep_alive);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            biased;
            () = conn.cancelled() => break ReceiveOutcome::Aborted,
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) => {
                    // The transport queued its close reply; it goes out on flush.
                    conn.set_state(ConnectionState::Closing);
                    if let Err(e) = conn.flush().await {
                        debug!(connection_id = %conn.id, error = %e, "close reply flush ended");
                    }
                    break ReceiveOutcome::Closed;
                }
                Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                    warn!(connection_id = %conn.id, "client sent data to read-only server, closing");
                    conn.close(close_code::POLICY, READ_ONLY_REASON).await;
                    break ReceiveOutcome::PolicyViolation;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => {
                    debug!(connection_id = %conn.id, error = %e, "transport error");
                    break ReceiveOutcome::TransportError;
                }
                None => break ReceiveOutcome::Closed,
            },
            _ = ping.tick() => {
                if let Err(e) = conn.send(Message::Ping(Vec::new().into())).await {
                    debug!(connection_id = %conn.id, error = %e, "keep-alive ping failed");
                    break ReceiveOutcome::TransportError;
                }
            }
        }
    };

    conn.set_state(ConnectionState::Closed);
    let _ = registry.remove(&conn.id);
    info!(connection_id = %conn.id, ?outcome, remaining = registry.len(), "client disconnected");
    outcome
}
