//! Read-only WebSocket broadcast server for projecting song text to
//! viewers on the local network.

pub mod assets;
pub mod config;
pub mod discovery;
pub mod error;
pub mod server;
pub mod status;
pub mod websocket;

pub use config::ServerConfig;
pub use discovery::{Advertiser, MdnsAdvertiser, ServiceRecord};
pub use error::{DiscoveryError, ServerError};
pub use server::BroadcastService;
pub use status::StatusReport;
pub use websocket::BroadcastReport;
