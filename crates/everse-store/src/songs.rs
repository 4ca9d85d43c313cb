use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use everse_core::ids::{BookId, SongId, VerseId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerseRow {
    pub id: VerseId,
    /// 0-based order within the song.
    pub position: u32,
    pub text: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SongRow {
    pub id: SongId,
    pub title: String,
    pub number: i64,
    pub verses: Vec<VerseRow>,
    pub created_at: String,
    pub updated_at: String,
}

impl SongRow {
    /// Verse at a 1-based position, as an operator would count them.
    pub fn verse(&self, one_based: usize) -> Option<&VerseRow> {
        one_based.checked_sub(1).and_then(|i| self.verses.get(i))
    }
}

/// Input for creating a song.
#[derive(Clone, Debug, Default)]
pub struct NewSong {
    pub title: String,
    pub number: i64,
    pub verses: Vec<String>,
    /// Book to link the new song into.
    pub book_id: Option<BookId>,
}

const SONG_COLUMNS: &str = "s.id, s.title, s.number, s.created_at, s.updated_at";

pub struct SongRepo {
    db: Database,
}

impl SongRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a song with its verses in one transaction.
    #[instrument(skip(self, song), fields(title = %song.title, number = song.number))]
    pub fn create(&self, song: &NewSong) -> Result<SongRow, StoreError> {
        let id = SongId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO songs (id, title, number, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![id.as_str(), song.title, song.number, now],
            )?;
            let verses = insert_verses(&tx, &id, &song.verses)?;
            if let Some(book_id) = &song.book_id {
                tx.execute(
                    "INSERT INTO book_songs (book_id, song_id) VALUES (?1, ?2)",
                    rusqlite::params![book_id.as_str(), id.as_str()],
                )?;
            }
            tx.commit()?;

            Ok(SongRow {
                id,
                title: song.title.clone(),
                number: song.number,
                verses,
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(song_id = %id))]
    pub fn get(&self, id: &SongId) -> Result<SongRow, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {SONG_COLUMNS} FROM songs s WHERE s.id = ?1");
            let mut songs = query_songs(conn, &sql, rusqlite::params![id.as_str()])?;
            songs
                .pop()
                .ok_or_else(|| StoreError::NotFound(format!("song {id}")))
        })
    }

    /// All songs ordered by number, then title.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<SongRow>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {SONG_COLUMNS} FROM songs s ORDER BY s.number, s.title");
            query_songs(conn, &sql, [])
        })
    }

    #[instrument(skip(self), fields(book_id = %book_id))]
    pub fn list_by_book(&self, book_id: &BookId) -> Result<Vec<SongRow>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {SONG_COLUMNS} FROM songs s
                 JOIN book_songs bs ON bs.song_id = s.id
                 WHERE bs.book_id = ?1
                 ORDER BY s.number, s.title"
            );
            query_songs(conn, &sql, [book_id.as_str()])
        })
    }

    /// Songs carrying the given number, oldest first.
    #[instrument(skip(self))]
    pub fn find_by_number(&self, number: i64) -> Result<Vec<SongRow>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {SONG_COLUMNS} FROM songs s WHERE s.number = ?1 ORDER BY s.created_at, s.id"
            );
            query_songs(conn, &sql, [number])
        })
    }

    /// Case-insensitive title substring search.
    #[instrument(skip(self))]
    pub fn search_title(&self, needle: &str) -> Result<Vec<SongRow>, StoreError> {
        let pattern = format!("%{}%", row_helpers::escape_like(needle));
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {SONG_COLUMNS} FROM songs s WHERE s.title LIKE ?1 ESCAPE '\\' ORDER BY s.number, s.title"
            );
            query_songs(conn, &sql, [pattern.as_str()])
        })
    }

    /// Replace title, number and the full verse list in one transaction.
    #[instrument(skip(self, verses), fields(song_id = %id, verse_count = verses.len()))]
    pub fn update(
        &self,
        id: &SongId,
        title: &str,
        number: i64,
        verses: &[String],
    ) -> Result<SongRow, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let changed = tx.execute(
                "UPDATE songs SET title = ?1, number = ?2, updated_at = ?3 WHERE id = ?4",
                rusqlite::params![title, number, now, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("song {id}")));
            }
            tx.execute("DELETE FROM verses WHERE song_id = ?1", [id.as_str()])?;
            insert_verses(&tx, id, verses)?;
            tx.commit()?;

            let sql = format!("SELECT {SONG_COLUMNS} FROM songs s WHERE s.id = ?1");
            query_songs(conn, &sql, [id.as_str()])?
                .pop()
                .ok_or_else(|| StoreError::NotFound(format!("song {id}")))
        })
    }

    /// Delete a song with its verses, settings and book links.
    #[instrument(skip(self), fields(song_id = %id))]
    pub fn delete(&self, id: &SongId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM songs WHERE id = ?1", [id.as_str()])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("song {id}")));
            }
            Ok(())
        })
    }
}

fn insert_verses(
    conn: &Connection,
    song_id: &SongId,
    texts: &[String],
) -> Result<Vec<VerseRow>, StoreError> {
    let mut stmt =
        conn.prepare("INSERT INTO verses (id, song_id, position, text) VALUES (?1, ?2, ?3, ?4)")?;
    let mut verses = Vec::with_capacity(texts.len());
    for (position, text) in (0u32..).zip(texts) {
        let id = VerseId::new();
        stmt.execute(rusqlite::params![id.as_str(), song_id.as_str(), position, text])?;
        verses.push(VerseRow {
            id,
            position,
            text: text.clone(),
        });
    }
    Ok(verses)
}

fn load_verses(conn: &Connection, song_id: &SongId) -> Result<Vec<VerseRow>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id, position, text FROM verses WHERE song_id = ?1 ORDER BY position")?;
    let mut rows = stmt.query([song_id.as_str()])?;
    let mut verses = Vec::new();
    while let Some(row) = rows.next()? {
        verses.push(VerseRow {
            id: VerseId::from_raw(row_helpers::get::<String>(row, 0, "verses", "id")?),
            position: row_helpers::get(row, 1, "verses", "position")?,
            text: row_helpers::get(row, 2, "verses", "text")?,
        });
    }
    Ok(verses)
}

fn query_songs<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<SongRow>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut songs = Vec::new();
    while let Some(row) = rows.next()? {
        let id = SongId::from_raw(row_helpers::get::<String>(row, 0, "songs", "id")?);
        songs.push(SongRow {
            verses: load_verses(conn, &id)?,
            id,
            title: row_helpers::get(row, 1, "songs", "title")?,
            number: row_helpers::get(row, 2, "songs", "number")?,
            created_at: row_helpers::get(row, 3, "songs", "created_at")?,
            updated_at: row_helpers::get(row, 4, "songs", "updated_at")?,
        });
    }
    Ok(songs)
}
