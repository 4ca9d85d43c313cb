pub mod app_config;
pub mod books;
pub mod database;
pub mod error;
pub mod row_helpers;
pub mod schema;
pub mod settings;
pub mod songs;

pub use app_config::AppConfigRepo;
pub use books::{BookRepo, BookRow};
pub use database::Database;
pub use error::StoreError;
pub use settings::SettingsRepo;
pub use songs::{NewSong, SongRepo, SongRow, VerseRow};
