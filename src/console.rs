//! Operator console: drives a running broadcast service from stdin.

use anyhow::{bail, Result};
use everse_server::{BroadcastReport, BroadcastService};
use everse_store::SongRepo;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const HELP_TEXT: &str = "\
Commands:
  show <text>                 Broadcast literal text
  verse <number> <position>   Broadcast verse <position> (1-based) of song <number>
  clear                       Broadcast an empty screen
  status                      Print server status as JSON
  start                       Start the server
  stop                        Stop the server
  help                        Show this help
  quit, exit                  Stop the server and exit";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Show(String),
    Verse { number: i64, position: usize },
    Clear,
    Status,
    Start,
    Stop,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd, rest.trim_start()),
            None => (line, ""),
        };

        let command = match cmd.to_lowercase().as_str() {
            "" => return Ok(None),
            "show" => Self::Show(rest.to_owned()),
            "verse" => {
                let mut args = rest.split_whitespace();
                let (Some(number), Some(position), None) = (args.next(), args.next(), args.next())
                else {
                    bail!("usage: verse <number> <position>");
                };
                let number = number.parse().map_err(|_| anyhow::anyhow!("invalid song number: {number}"))?;
                let position = position.parse().map_err(|_| anyhow::anyhow!("invalid position: {position}"))?;
                Self::Verse { number, position }
            }
            "clear" => Self::Clear,
            "status" => Self::Status,
            "start" => Self::Start,
            "stop" => Self::Stop,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => bail!("unknown command: {other} (try 'help')"),
        };
        Ok(Some(command))
    }
}

/// Execute one command. `Ok(None)` means the console should exit.
pub async fn execute(
    service: &BroadcastService,
    songs: &SongRepo,
    command: ConsoleCommand,
) -> Result<Option<String>> {
    let output = match command {
        ConsoleCommand::Show(text) => describe(service.broadcast_text(Some(&text)).await),
        ConsoleCommand::Verse { number, position } => {
            let Some(song) = songs.find_by_number(number)?.into_iter().next() else {
                bail!("no song numbered {number}");
            };
            let Some(verse) = song.verse(position) else {
                bail!("song {number} has {} verses", song.verses.len());
            };
            info!(song_id = %song.id, position, "broadcasting verse");
            let report = service.broadcast_text(Some(&verse.text)).await;
            format!("{} [{position}]: {}", song.title, describe(report))
        }
        ConsoleCommand::Clear => describe(service.broadcast_text(None).await),
        ConsoleCommand::Status => serde_json::to_string_pretty(&service.status())?,
        ConsoleCommand::Start => {
            service.start().await;
            match service.last_error() {
                Some(e) if !service.is_running() => format!("failed to start: {e}"),
                _ => format!("running at {}", service.address()),
            }
        }
        ConsoleCommand::Stop => {
            service.stop().await;
            "stopped".to_owned()
        }
        ConsoleCommand::Help => HELP_TEXT.to_owned(),
        ConsoleCommand::Quit => return Ok(None),
    };
    Ok(Some(output))
}

fn describe(report: BroadcastReport) -> String {
    match report.failed {
        0 => format!("sent to {} viewer(s)", report.delivered),
        failed => format!("sent to {} viewer(s), {failed} dropped", report.delivered),
    }
}

/// Start the service and read commands from stdin until `quit`, EOF or
/// Ctrl-C. The service is stopped before returning.
pub async fn run(service: &BroadcastService, songs: &SongRepo) -> Result<()> {
    service.start().await;
    if service.is_running() {
        println!("everse running at {}", service.address());
        println!("viewer token: {}", service.config().token);
    } else {
        println!(
            "server not running: {}",
            service.last_error().unwrap_or_else(|| "unknown error".into())
        );
    }
    println!("Type 'help' for available commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to read stdin");
                break;
            }
        };

        let command = match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("error: {e}");
                continue;
            }
        };

        match execute(service, songs, command).await {
            Ok(Some(output)) => println!("{output}"),
            Ok(None) => break,
            Err(e) => println!("error: {e}"),
        }
    }

    service.stop().await;
    println!("stopped");
    Ok(())
}
