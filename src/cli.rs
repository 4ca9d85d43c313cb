//! Command-line surface: argument definitions and the library subcommands.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use everse_core::search::{matches, parse_song_numbers};
use everse_core::{BookId, DisplaySettings, SongId};
use everse_server::ServerConfig;
use everse_store::{AppConfigRepo, BookRepo, Database, NewSong, SettingsRepo, SongRepo, SongRow};
use everse_telemetry::{LogQuery, SqliteLogSink};
use tracing::Level;

/// Song projection server and library.
#[derive(Parser, Debug)]
#[command(name = "everse", about = "Project song verses to viewers on the local network", version)]
pub struct Cli {
    /// Path to the library database.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: Level,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn default_db_path() -> PathBuf {
        everse_core::data_dir().join("database").join("everse.db")
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(Self::default_db_path)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the broadcast server with an operator console on stdin
    Serve(ServeArgs),

    /// Manage song books
    Book {
        #[command(subcommand)]
        action: BookCommand,
    },

    /// Manage songs and their verses
    Song {
        #[command(subcommand)]
        action: SongCommand,
    },

    /// Per-song display settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },

    /// Show persisted warnings and errors
    Logs(LogsArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// JSON server config; flags below override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    pub port: Option<u16>,

    /// Token viewers must pass as `?token=`.
    #[arg(long, env = "EVERSE_TOKEN")]
    pub token: Option<String>,

    /// Directory the viewer page is served from.
    #[arg(long)]
    pub web_root: Option<PathBuf>,

    /// Do not advertise the service over mDNS.
    #[arg(long)]
    pub no_mdns: bool,
}

impl ServeArgs {
    /// Config file (or defaults) with command-line overrides applied.
    pub fn resolve(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(token) = &self.token {
            config.token.clone_from(token);
        }
        if let Some(web_root) = &self.web_root {
            config.web_root.clone_from(web_root);
        }
        if self.no_mdns {
            config.mdns_enabled = false;
        }
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
pub enum BookCommand {
    /// Create a book
    Add { title: String },
    /// List books; the last opened one is marked with `*`
    List,
    Rename { id: String, title: String },
    /// Delete a book (its songs are kept)
    Delete { id: String },
    /// Remember a book as the last opened one
    Open { id: String },
}

#[derive(Subcommand, Debug)]
pub enum SongCommand {
    /// Create a song
    Add {
        title: String,

        /// Song number
        #[arg(short, long)]
        number: i64,

        /// Verse text, repeat for each verse in order
        #[arg(short, long = "verse")]
        verses: Vec<String>,

        /// Book to add the song to
        #[arg(short, long)]
        book: Option<String>,
    },

    /// List songs
    List {
        /// Song numbers separated by commas or spaces, e.g. "12, 40 7"
        #[arg(short, long)]
        filter: Option<String>,

        /// Only songs in this book
        #[arg(short, long)]
        book: Option<String>,

        /// Title substring
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Print a song with its verses
    Show { id: String },

    /// Replace a song's title, number and verses
    Edit {
        id: String,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        number: Option<i64>,

        /// Replacement verses; omit to keep the current ones
        #[arg(short, long = "verse")]
        verses: Vec<String>,
    },

    /// Add an existing song to a book
    Link { song: String, book: String },

    Delete { id: String },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Print a song's display settings as JSON
    Show { song: String },

    /// Change individual display settings of a song
    Set {
        song: String,

        #[arg(long)]
        font_family: Option<String>,

        #[arg(long)]
        font_size: Option<f64>,

        #[arg(long)]
        auto_fit: Option<bool>,

        #[arg(long)]
        fade: Option<bool>,

        #[arg(long)]
        fade_ms: Option<u32>,
    },
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Exact level, e.g. WARN or ERROR
    #[arg(long)]
    pub level: Option<String>,

    /// Target prefix, e.g. everse_server
    #[arg(long)]
    pub target: Option<String>,

    #[arg(long)]
    pub connection: Option<String>,

    /// RFC 3339 lower bound on the timestamp
    #[arg(long)]
    pub since: Option<String>,

    #[arg(short = 'n', long, default_value = "50")]
    pub limit: u32,
}

/// Run a book command, writing human-readable output to `out`.
pub fn run_book(db: &Database, action: BookCommand, out: &mut impl Write) -> Result<()> {
    let books = BookRepo::new(db.clone());
    let app = AppConfigRepo::new(db.clone());
    match action {
        BookCommand::Add { title } => {
            let book = books.create(&title)?;
            writeln!(out, "{}", book.id)?;
        }
        BookCommand::List => {
            let last = app.last_opened_book()?;
            for book in books.list()? {
                let mark = if last.as_ref() == Some(&book.id) { "*" } else { " " };
                writeln!(out, "{mark} {}  {}", book.id, book.title)?;
            }
        }
        BookCommand::Rename { id, title } => {
            books.rename(&BookId::from_raw(id), &title)?;
        }
        BookCommand::Delete { id } => {
            books.delete(&BookId::from_raw(id))?;
        }
        BookCommand::Open { id } => {
            let book = books.get(&BookId::from_raw(id))?;
            app.set_last_opened_book(Some(&book.id))?;
            writeln!(out, "opened {}", book.title)?;
        }
    }
    Ok(())
}

pub fn run_song(db: &Database, action: SongCommand, out: &mut impl Write) -> Result<()> {
    let songs = SongRepo::new(db.clone());
    match action {
        SongCommand::Add {
            title,
            number,
            verses,
            book,
        } => {
            let song = songs.create(&NewSong {
                title,
                number,
                verses,
                book_id: book.map(BookId::from_raw),
            })?;
            writeln!(out, "{}", song.id)?;
        }
        SongCommand::List {
            filter,
            book,
            search,
        } => {
            let rows = match (book, search) {
                (Some(_), Some(_)) => bail!("--book and --search cannot be combined"),
                (Some(book), None) => songs.list_by_book(&BookId::from_raw(book))?,
                (None, Some(needle)) => songs.search_title(&needle)?,
                (None, None) => songs.list()?,
            };
            let numbers = filter.as_deref().and_then(parse_song_numbers);
            for song in rows.iter().filter(|s| matches(numbers.as_ref(), s.number)) {
                writeln!(out, "{:>4}  {}  {}", song.number, song.title, song.id)?;
            }
        }
        SongCommand::Show { id } => {
            let song = songs.get(&SongId::from_raw(id))?;
            write_song(&song, out)?;
        }
        SongCommand::Edit {
            id,
            title,
            number,
            verses,
        } => {
            let current = songs.get(&SongId::from_raw(id))?;
            let verses = if verses.is_empty() {
                current.verses.iter().map(|v| v.text.clone()).collect()
            } else {
                verses
            };
            let updated = songs.update(
                &current.id,
                title.as_deref().unwrap_or(&current.title),
                number.unwrap_or(current.number),
                &verses,
            )?;
            write_song(&updated, out)?;
        }
        SongCommand::Link { song, book } => {
            BookRepo::new(db.clone()).add_song(&BookId::from_raw(book), &SongId::from_raw(song))?;
        }
        SongCommand::Delete { id } => {
            songs.delete(&SongId::from_raw(id))?;
        }
    }
    Ok(())
}

pub fn run_settings(db: &Database, action: SettingsCommand, out: &mut impl Write) -> Result<()> {
    let repo = SettingsRepo::new(db.clone());
    match action {
        SettingsCommand::Show { song } => {
            let settings = repo.get(&SongId::from_raw(song))?;
            writeln!(out, "{}", serde_json::to_string_pretty(&settings)?)?;
        }
        SettingsCommand::Set {
            song,
            font_family,
            font_size,
            auto_fit,
            fade,
            fade_ms,
        } => {
            let song_id = SongId::from_raw(song);
            SongRepo::new(db.clone()).get(&song_id)?;
            let current = repo.get(&song_id)?;
            let settings = DisplaySettings {
                font_family: font_family.unwrap_or(current.font_family),
                font_size: font_size.unwrap_or(current.font_size),
                auto_fit: auto_fit.unwrap_or(current.auto_fit),
                use_fade: fade.unwrap_or(current.use_fade),
                fade_ms: fade_ms.unwrap_or(current.fade_ms),
            };
            repo.upsert(&song_id, &settings)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&settings)?)?;
        }
    }
    Ok(())
}

pub fn run_logs(sink: Option<&SqliteLogSink>, args: LogsArgs, out: &mut impl Write) -> Result<()> {
    let Some(sink) = sink else {
        bail!("log database is not available");
    };
    let query = LogQuery {
        level: args.level.map(|l| l.to_uppercase()),
        target: args.target,
        connection_id: args.connection,
        since: args.since,
        limit: Some(args.limit),
    };
    let records = sink.query(&query).context("query log database")?;
    for r in records {
        write!(out, "{} {:<5} {} {}", r.timestamp, r.level, r.target, r.message)?;
        if let Some(fields) = r.fields {
            write!(out, " {fields}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn write_song(song: &SongRow, out: &mut impl Write) -> Result<()> {
    writeln!(out, "#{} {}  ({})", song.number, song.title, song.id)?;
    for (i, verse) in song.verses.iter().enumerate() {
        writeln!(out)?;
        writeln!(out, "[{}]", i + 1)?;
        writeln!(out, "{}", verse.text)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("everse").chain(args.iter().copied())).unwrap()
    }

    fn output(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn add_song(db: &Database, title: &str, number: i64, verses: &[&str]) -> SongId {
        SongRepo::new(db.clone())
            .create(&NewSong {
                title: title.into(),
                number,
                verses: verses.iter().map(|v| v.to_string()).collect(),
                book_id: None,
            })
            .unwrap()
            .id
    }

    #[test]
    fn serve_flags_override_defaults() {
        let cli = parse(&["serve", "--port", "6001", "--token", "t1", "--no-mdns"]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.port, 6001);
        assert_eq!(config.token, "t1");
        assert!(!config.mdns_enabled);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn serve_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, r#"{"port":7000,"token":"from-file","host":"127.0.0.1"}"#).unwrap();

        let args = ServeArgs {
            config: Some(path),
            token: Some("from-flag".into()),
            ..Default::default()
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.token, "from-flag");
    }

    #[test]
    fn song_add_collects_repeated_verses() {
        let cli = parse(&["song", "add", "Amazing Grace", "-n", "12", "-v", "one", "-v", "two"]);
        match cli.command {
            Command::Song {
                action: SongCommand::Add { title, number, verses, book },
            } => {
                assert_eq!(title, "Amazing Grace");
                assert_eq!(number, 12);
                assert_eq!(verses, vec!["one", "two"]);
                assert!(book.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_db_path_after_subcommand() {
        let cli = parse(&["book", "list", "--db-path", "/tmp/x.db"]);
        assert_eq!(cli.db_path(), PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn song_list_applies_number_filter() {
        let db = Database::in_memory().unwrap();
        add_song(&db, "Amazing Grace", 12, &["a"]);
        add_song(&db, "Be Thou My Vision", 40, &["b"]);
        add_song(&db, "Come Thou Fount", 7, &["c"]);

        let out = output(|out| {
            run_song(
                &db,
                SongCommand::List {
                    filter: Some("12, 7 abc".into()),
                    book: None,
                    search: None,
                },
                out,
            )
        });
        assert!(out.contains("Amazing Grace"));
        assert!(out.contains("Come Thou Fount"));
        assert!(!out.contains("Be Thou My Vision"));

        let blank = output(|out| {
            run_song(
                &db,
                SongCommand::List {
                    filter: Some("  ".into()),
                    book: None,
                    search: None,
                },
                out,
            )
        });
        assert_eq!(blank.lines().count(), 3);
    }

    #[test]
    fn song_edit_keeps_verses_when_none_given() {
        let db = Database::in_memory().unwrap();
        let id = add_song(&db, "Old", 1, &["first", "second"]);

        output(|out| {
            run_song(
                &db,
                SongCommand::Edit {
                    id: id.to_string(),
                    title: Some("New".into()),
                    number: None,
                    verses: Vec::new(),
                },
                out,
            )
        });

        let song = SongRepo::new(db).get(&id).unwrap();
        assert_eq!(song.title, "New");
        assert_eq!(song.number, 1);
        assert_eq!(song.verses.len(), 2);
    }

    #[test]
    fn book_open_marks_listing() {
        let db = Database::in_memory().unwrap();
        let book = BookRepo::new(db.clone()).create("Hymnal").unwrap();
        BookRepo::new(db.clone()).create("Choruses").unwrap();

        output(|out| run_book(&db, BookCommand::Open { id: book.id.to_string() }, out));
        let listing = output(|out| run_book(&db, BookCommand::List, out));
        let marked: Vec<_> = listing.lines().filter(|l| l.starts_with('*')).collect();
        assert_eq!(marked.len(), 1);
        assert!(marked[0].contains("Hymnal"));
    }

    #[test]
    fn settings_set_merges_with_current() {
        let db = Database::in_memory().unwrap();
        let id = add_song(&db, "Song", 1, &["v"]);

        output(|out| {
            run_settings(
                &db,
                SettingsCommand::Set {
                    song: id.to_string(),
                    font_family: None,
                    font_size: Some(72.0),
                    auto_fit: None,
                    fade: Some(false),
                    fade_ms: None,
                },
                out,
            )
        });

        let settings = SettingsRepo::new(db).get(&id).unwrap();
        assert_eq!(settings.font_family, "Segoe UI");
        assert!((settings.font_size - 72.0).abs() < f64::EPSILON);
        assert!(!settings.use_fade);
        assert_eq!(settings.fade_ms, 350);
    }

    #[test]
    fn settings_for_unknown_song_fail() {
        let db = Database::in_memory().unwrap();
        let result = run_settings(
            &db,
            SettingsCommand::Set {
                song: "song_missing".into(),
                font_family: None,
                font_size: Some(10.0),
                auto_fit: None,
                fade: None,
                fade_ms: None,
            },
            &mut Vec::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn logs_without_sink_fail() {
        let args = LogsArgs {
            level: None,
            target: None,
            connection: None,
            since: None,
            limit: 10,
        };
        assert!(run_logs(None, args, &mut Vec::new()).is_err());
    }
}
