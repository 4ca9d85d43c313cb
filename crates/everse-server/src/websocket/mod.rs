//! WebSocket connection lifecycle: registry, receive loop, fan-out.

pub mod broadcast;
pub mod connection;
pub mod receive;
pub mod registry;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use connection::{Connection, ConnectionState};
pub use receive::{run_receive_loop, ReceiveOutcome};
pub use registry::ConnectionRegistry;
