/// Errors raised while bringing the broadcast server up.
///
/// None of these reach callers of `BroadcastService`; they are logged and
/// surfaced as `last_error()`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("asset error: {0}")]
    Asset(String),

    #[error("config error: {0}")]
    Config(String),
}

/// Errors from the mDNS advertiser. Always non-fatal.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("mDNS daemon unavailable: {0}")]
    Daemon(String),

    #[error("invalid service record: {0}")]
    Record(String),

    #[error("register failed: {0}")]
    Register(String),
}
