use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    level TEXT NOT NULL,
    target TEXT NOT NULL,
    message TEXT NOT NULL,
    fields TEXT,
    connection_id TEXT,
    song_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
CREATE INDEX IF NOT EXISTS idx_logs_connection ON logs(connection_id);
CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);
";

const DEFAULT_LIMIT: u32 = 100;

/// A persisted warning or error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    /// Remaining structured fields as a JSON object.
    pub fields: Option<String>,
    pub connection_id: Option<String>,
    pub song_id: Option<String>,
}

impl LogRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
            level: row.get("level")?,
            target: row.get("target")?,
            message: row.get("message")?,
            fields: row.get("fields")?,
            connection_id: row.get("connection_id")?,
            song_id: row.get("song_id")?,
        })
    }
}

/// Filter for [`SqliteLogSink::query`]. Results are newest first.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    /// Exact level, any case.
    pub level: Option<String>,
    /// Target prefix, e.g. `everse_server`.
    pub target: Option<String>,
    pub connection_id: Option<String>,
    /// RFC 3339 lower bound.
    pub since: Option<String>,
    pub limit: Option<u32>,
}

impl LogQuery {
    fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        let mut push = |clause: &str, value: String| {
            values.push(Value::Text(value));
            clauses.push(clause.replace('?', &format!("?{}", values.len())));
        };

        if let Some(level) = &self.level {
            push("level = ?", level.to_uppercase());
        }
        if let Some(target) = &self.target {
            push("target LIKE ? || '%'", target.clone());
        }
        if let Some(connection_id) = &self.connection_id {
            push("connection_id = ?", connection_id.clone());
        }
        if let Some(since) = &self.since {
            push("timestamp >= ?", since.clone());
        }

        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        values.push(Value::Integer(i64::from(self.limit.unwrap_or(DEFAULT_LIMIT))));
        let sql = format!("SELECT * FROM logs{filter} ORDER BY id DESC LIMIT ?{}", values.len());
        (sql, values)
    }
}

/// Ids that tie a log line to a viewer connection or a song.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Correlation {
    connection_id: Option<String>,
    song_id: Option<String>,
}

impl Correlation {
    /// Claim `name` if it is one of the correlation fields.
    fn claim(&mut self, name: &str, value: &str) -> bool {
        let slot = match name {
            "connection_id" => &mut self.connection_id,
            "song_id" => &mut self.song_id,
            _ => return false,
        };
        *slot = Some(value.trim_matches('"').to_owned());
        true
    }

    fn is_empty(&self) -> bool {
        self.connection_id.is_none() && self.song_id.is_none()
    }

    fn is_complete(&self) -> bool {
        self.connection_id.is_some() && self.song_id.is_some()
    }

    /// Fill the ids still missing from `outer`.
    fn inherit(&mut self, outer: &Correlation) {
        if self.connection_id.is_none() {
            self.connection_id.clone_from(&outer.connection_id);
        }
        if self.song_id.is_none() {
            self.song_id.clone_from(&outer.song_id);
        }
    }
}

/// Fields recorded from one event or span.
#[derive(Default)]
struct Captured {
    message: String,
    ids: Correlation,
    extra: serde_json::Map<String, serde_json::Value>,
}

impl Captured {
    fn text(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            name if self.ids.claim(name, &value) => {}
            name => {
                self.extra.insert(name.to_owned(), value.into());
            }
        }
    }

    fn extra_json(&self) -> Option<String> {
        if self.extra.is_empty() {
            None
        } else {
            serde_json::to_string(&self.extra).ok()
        }
    }
}

impl Visit for Captured {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.text(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.text(field, value.to_owned());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.extra.insert(field.name().to_owned(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.extra.insert(field.name().to_owned(), value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.extra.insert(field.name().to_owned(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.extra.insert(field.name().to_owned(), value.into());
    }
}

/// One row about to be written.
struct Entry<'a> {
    at: DateTime<Utc>,
    level: Level,
    target: &'a str,
    captured: Captured,
}

/// SQLite store of WARN and ERROR events.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            // A missing directory surfaces as the open error below.
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Write errors are dropped.
    fn write(&self, entry: Entry<'_>) {
        let Entry {
            at,
            level,
            target,
            captured,
        } = entry;
        let fields = captured.extra_json();
        let _ = self.conn.lock().execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, connection_id, song_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                at.to_rfc3339(),
                level.to_string(),
                target,
                captured.message,
                fields,
                captured.ids.connection_id,
                captured.ids.song_id,
            ],
        );
    }

    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let (sql, values) = q.to_sql();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values), LogRecord::from_row)?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

/// `tracing` layer feeding WARN and ERROR events into a [`SqliteLogSink`].
///
/// `connection_id` and `song_id` are taken from the event, or else from the
/// nearest enclosing span that carries them.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut captured = Captured::default();
        attrs.record(&mut captured);
        if captured.ids.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(captured.ids);
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::WARN {
            return;
        }

        let mut captured = Captured::default();
        event.record(&mut captured);

        for span in ctx.event_scope(event).into_iter().flatten() {
            if captured.ids.is_complete() {
                break;
            }
            if let Some(outer) = span.extensions().get::<Correlation>() {
                captured.ids.inherit(outer);
            }
        }

        self.sink.write(Entry {
            at: Utc::now(),
            level: *meta.level(),
            target: meta.target(),
            captured,
        });
    }
}
