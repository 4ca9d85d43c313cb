//! One accepted WebSocket client.

use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};

use axum::extract::ws::{CloseFrame, Message};
use everse_core::ConnectionId;
use futures::{Sink, SinkExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Outgoing half of a socket.
pub type WsSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// Transport state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// A live client session. Owned by the registry; the receive loop and the
/// broadcaster hold clones of the `Arc` while they work with it.
pub struct Connection {
    pub id: ConnectionId,
    state: AtomicU8,
    sink: Mutex<WsSink>,
    cancel: CancellationToken,
}

impl Connection {
    /// `cancel` is normally a child of the server's shutdown token.
    pub fn new<S>(sink: S, cancel: CancellationToken) -> Self
    where
        S: Sink<Message, Error = axum::Error> + Send + 'static,
    {
        Self {
            id: ConnectionId::new(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            sink: Mutex::new(Box::pin(sink)),
            cancel,
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Send one frame. Fails fast once the connection has been aborted,
    /// even if a slow peer is holding up the write.
    pub async fn send(&self, msg: Message) -> Result<(), axum::Error> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(aborted()),
            result = async {
                let mut sink = self.sink.lock().await;
                sink.send(msg).await
            } => result,
        }
    }

    /// Write out frames the transport queued on its own, such as the
    /// reply to a peer's close frame.
    pub async fn flush(&self) -> Result<(), axum::Error> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(aborted()),
            result = async {
                let mut sink = self.sink.lock().await;
                sink.flush().await
            } => result,
        }
    }

    pub async fn send_text(&self, text: &str) -> Result<(), axum::Error> {
        self.send(Message::Text(text.to_owned().into())).await
    }

    /// Send a close frame and mark the connection Closing. Errors are ignored;
    /// the peer may already be gone.
    pub async fn close(&self, code: u16, reason: &str) {
        self.set_state(ConnectionState::Closing);
        let frame = CloseFrame {
            code,
            reason: reason.to_owned().into(),
        };
        let _ = self.send(Message::Close(Some(frame))).await;
    }

    /// Forcibly terminate: mark Closed and wake the receive loop.
    pub fn abort(&self) {
        self.set_state(ConnectionState::Closed);
        self.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the connection (or the whole server) is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

fn aborted() -> axum::Error {
    axum::Error::new(std::io::Error::new(
        std::io::ErrorKind::ConnectionAborted,
        "connection aborted",
    ))
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
