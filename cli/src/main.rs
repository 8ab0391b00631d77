//! Quire CLI - binary entry point.
//!
//! Wires configuration, the engine manager, the project cache and completion
//! together for one-shot runs:
//!
//! ```text
//! quire check <path>        -> build the project, print its diagnostics
//! quire complete <file> ... -> evaluate completion triggers at a position,
//!                              build with the file's contents, print items
//! ```
//!
//! Logs never go to stdout or stderr; they are written to
//! `~/.quire/logs/quire.log` (filter with `RUST_LOG`).

mod args;
mod commands;

use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    process::ExitCode,
    sync::Mutex,
};

use clap::Parser;
use quire_config::QuireConfig;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::args::{Cli, Command};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Command output owns stdout and stderr; without a log file, drop logs.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.quire/logs/quire.log
    if let Some(config_path) = QuireConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("quire.log"));
    }

    // Fallback: ./.quire/logs/quire.log
    candidates.push(PathBuf::from(".quire").join("logs").join("quire.log"));

    candidates
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing();
    let config = QuireConfig::load().ok().flatten().unwrap_or_default();

    let run = async {
        match cli.command {
            Command::Check(args) => commands::check(&config, args).await,
            Command::Complete(args) => commands::complete(&config, args).await,
        }
    };

    let result = tokio::select! {
        result = run => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
            return ExitCode::from(130);
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
