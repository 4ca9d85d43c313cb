use tracing::instrument;

use everse_core::ids::BookId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// The single application config row.
pub struct AppConfigRepo {
    db: Database,
}

impl AppConfigRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn last_opened_book(&self) -> Result<Option<BookId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT last_opened_book FROM app_config WHERE id = 1")?;
            let mut rows = stmt.query([])?;
            match rows.next()? {
                Some(row) => Ok(row_helpers::get_opt::<String>(row, 0, "app_config", "last_opened_book")?
                    .map(BookId::from_raw)),
                None => Ok(None),
            }
        })
    }

    /// Remember a book; `None` clears it.
    #[instrument(skip(self))]
    pub fn set_last_opened_book(&self, book_id: Option<&BookId>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE app_config SET last_opened_book = ?1 WHERE id = 1",
                [book_id.map(BookId::as_str)],
            )?;
            Ok(())
        })
    }
}
