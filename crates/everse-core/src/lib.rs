pub mod display;
pub mod ids;
pub mod search;

pub use display::DisplaySettings;
pub use ids::{BookId, ConnectionId, SongId, VerseId};

use std::path::PathBuf;

/// Root directory for everse data: `$HOME/.everse`, or `/tmp/.everse` without a home.
pub fn data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".everse")
}
