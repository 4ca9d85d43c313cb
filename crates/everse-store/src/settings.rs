use chrono::Utc;
use tracing::instrument;

use everse_core::ids::SongId;
use everse_core::DisplaySettings;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Per-song display settings, stored as a JSON document.
pub struct SettingsRepo {
    db: Database,
}

impl SettingsRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Settings for a song, or the defaults if none were saved.
    #[instrument(skip(self), fields(song_id = %song_id))]
    pub fn get(&self, song_id: &SongId) -> Result<DisplaySettings, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT display FROM song_settings WHERE song_id = ?1")?;
            let mut rows = stmt.query([song_id.as_str()])?;
            match rows.next()? {
                Some(row) => {
                    let raw: String = row_helpers::get(row, 0, "song_settings", "display")?;
                    row_helpers::parse_json(&raw, "song_settings", "display")
                }
                None => Ok(DisplaySettings::default()),
            }
        })
    }

    #[instrument(skip(self, settings), fields(song_id = %song_id))]
    pub fn upsert(&self, song_id: &SongId, settings: &DisplaySettings) -> Result<(), StoreError> {
        let display = serde_json::to_string(settings)?;
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO song_settings (song_id, display, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(song_id) DO UPDATE SET display = excluded.display, updated_at = excluded.updated_at",
                rusqlite::params![song_id.as_str(), display, now],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::songs::{NewSong, SongRepo};

    fn setup() -> (Database, SongId) {
        let db = Database::in_memory().unwrap();
        let song = SongRepo::new(db.clone())
            .create(&NewSong {
                title: "Abide With Me".into(),
                number: 4,
                ..Default::default()
            })
            .unwrap();
        (db, song.id)
    }

    #[test]
    fn missing_settings_are_defaults() {
        let (db, song_id) = setup();
        let repo = SettingsRepo::new(db);
        assert_eq!(repo.get(&song_id).unwrap(), DisplaySettings::default());
    }

    #[test]
    fn upsert_then_overwrite() {
        let (db, song_id) = setup();
        let repo = SettingsRepo::new(db);

        let mut settings = DisplaySettings {
            font_size: 72.0,
            ..Default::default()
        };
        repo.upsert(&song_id, &settings).unwrap();
        assert!((repo.get(&song_id).unwrap().font_size - 72.0).abs() < f64::EPSILON);

        settings.use_fade = false;
        repo.upsert(&song_id, &settings).unwrap();
        let stored = repo.get(&song_id).unwrap();
        assert!(!stored.use_fade);
        assert!((stored.font_size - 72.0).abs() < f64::EPSILON);
    }

    #[test]
    fn upsert_for_unknown_song_conflicts() {
        let db = Database::in_memory().unwrap();
        let repo = SettingsRepo::new(db);
        let result = repo.upsert(&SongId::from_raw("song_missing"), &DisplaySettings::default());
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn deleting_song_drops_settings() {
        let (db, song_id) = setup();
        let repo = SettingsRepo::new(db.clone());
        repo.upsert(&song_id, &DisplaySettings::default()).unwrap();
        SongRepo::new(db.clone()).delete(&song_id).unwrap();
        let rows: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM song_settings", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(rows, 0);
    }
}
