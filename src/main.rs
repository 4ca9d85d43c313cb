//! # everse
//!
//! Song library CLI and the `serve` entry point that projects verses to
//! viewers on the local network.

#![deny(unsafe_code)]

mod cli;
mod console;

use anyhow::{Context, Result};
use clap::Parser;
use everse_server::BroadcastService;
use everse_store::{Database, SongRepo};
use everse_telemetry::{init_telemetry, TelemetryConfig};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        ..Default::default()
    });

    let db_path = cli.db_path();
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Command::Serve(args) => {
            let config = args.resolve()?;
            drop(stdout);
            let db = open_db(&db_path)?;
            tracing::info!(port = config.port, mdns = config.mdns_enabled, "starting everse");
            let service = BroadcastService::new(config);
            console::run(&service, &SongRepo::new(db)).await?;
        }
        Command::Book { action } => cli::run_book(&open_db(&db_path)?, action, &mut stdout)?,
        Command::Song { action } => cli::run_song(&open_db(&db_path)?, action, &mut stdout)?,
        Command::Settings { action } => {
            cli::run_settings(&open_db(&db_path)?, action, &mut stdout)?;
        }
        Command::Logs(args) => cli::run_logs(telemetry.logs(), args, &mut stdout)?,
    }

    Ok(())
}

fn open_db(path: &std::path::Path) -> Result<Database> {
    Database::open(path).with_context(|| format!("Failed to open database: {}", path.display()))
}
