use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use everse_core::ids::{BookId, SongId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BookRow {
    pub id: BookId,
    pub title: String,
    pub created_at: String,
}

pub struct BookRepo {
    db: Database,
}

impl BookRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn create(&self, title: &str) -> Result<BookRow, StoreError> {
        let id = BookId::new();
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO books (id, title, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.as_str(), title, now],
            )?;
            Ok(BookRow {
                id,
                title: title.to_string(),
                created_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(book_id = %id))]
    pub fn get(&self, id: &BookId) -> Result<BookRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, title, created_at FROM books WHERE id = ?1")?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_book(row),
                None => Err(StoreError::NotFound(format!("book {id}"))),
            }
        })
    }

    /// All books, alphabetically.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<BookRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, title, created_at FROM books ORDER BY title COLLATE NOCASE, created_at")?;
            let mut rows = stmt.query([])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_book(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self), fields(book_id = %id))]
    pub fn rename(&self, id: &BookId, title: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE books SET title = ?1 WHERE id = ?2",
                rusqlite::params![title, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("book {id}")));
            }
            Ok(())
        })
    }

    /// Delete a book. Its songs survive; only the links are removed.
    #[instrument(skip(self), fields(book_id = %id))]
    pub fn delete(&self, id: &BookId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM books WHERE id = ?1", [id.as_str()])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("book {id}")));
            }
            Ok(())
        })
    }

    /// Link an existing song into a book. Linking twice is a no-op.
    #[instrument(skip(self), fields(book_id = %book_id, song_id = %song_id))]
    pub fn add_song(&self, book_id: &BookId, song_id: &SongId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO book_songs (book_id, song_id) VALUES (?1, ?2)",
                rusqlite::params![book_id.as_str(), song_id.as_str()],
            )?;
            Ok(())
        })
    }
}

fn row_to_book(row: &rusqlite::Row<'_>) -> Result<BookRow, StoreError> {
    Ok(BookRow {
        id: BookId::from_raw(row_helpers::get::<String>(row, 0, "books", "id")?),
        title: row_helpers::get(row, 1, "books", "title")?,
        created_at: row_helpers::get(row, 2, "books", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::songs::{NewSong, SongRepo};

    fn test_db() -> Database {
        Database::in_memory().unwrap()
    }

    #[test]
    fn create_book() {
        let repo = BookRepo::new(test_db());
        let book = repo.create("Hymnal").unwrap();
        assert!(book.id.as_str().starts_with("book_"));
        assert_eq!(book.title, "Hymnal");
    }

    #[test]
    fn get_by_id() {
        let repo = BookRepo::new(test_db());
        let book = repo.create("Hymnal").unwrap();
        assert_eq!(repo.get(&book.id).unwrap().title, "Hymnal");
    }

    #[test]
    fn get_nonexistent_fails() {
        let repo = BookRepo::new(test_db());
        let result = repo.get(&BookId::from_raw("book_missing"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn list_is_alphabetical() {
        let repo = BookRepo::new(test_db());
        repo.create("zion songs").unwrap();
        repo.create("Alleluia").unwrap();
        let titles: Vec<String> = repo.list().unwrap().into_iter().map(|b| b.title).collect();
        assert_eq!(titles, vec!["Alleluia", "zion songs"]);
    }

    #[test]
    fn rename_book() {
        let repo = BookRepo::new(test_db());
        let book = repo.create("Old").unwrap();
        repo.rename(&book.id, "New").unwrap();
        assert_eq!(repo.get(&book.id).unwrap().title, "New");
        assert!(repo.rename(&BookId::from_raw("book_missing"), "x").is_err());
    }

    #[test]
    fn delete_book_keeps_songs() {
        let db = test_db();
        let books = BookRepo::new(db.clone());
        let songs = SongRepo::new(db);
        let book = books.create("Hymnal").unwrap();
        let song = songs
            .create(&NewSong {
                title: "Amazing Grace".into(),
                number: 1,
                verses: vec!["Amazing grace".into()],
                book_id: Some(book.id.clone()),
            })
            .unwrap();

        books.delete(&book.id).unwrap();
        assert!(books.get(&book.id).is_err());
        assert!(songs.get(&song.id).is_ok());
        assert!(songs.list_by_book(&book.id).unwrap().is_empty());
    }

    #[test]
    fn add_song_is_idempotent() {
        let db = test_db();
        let books = BookRepo::new(db.clone());
        let songs = SongRepo::new(db);
        let book = books.create("Hymnal").unwrap();
        let song = songs
            .create(&NewSong {
                title: "Be Thou My Vision".into(),
                number: 7,
                verses: vec![],
                book_id: None,
            })
            .unwrap();

        books.add_song(&book.id, &song.id).unwrap();
        books.add_song(&book.id, &song.id).unwrap();
        assert_eq!(songs.list_by_book(&book.id).unwrap().len(), 1);
    }
}
