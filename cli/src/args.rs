//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use quire_completion::PositionEncoding;

#[derive(Debug, Parser)]
#[command(name = "quire")]
#[command(about = "Build documentation projects and complete their markup")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Build a project and print its diagnostics
    Check(CheckArgs),
    /// Print completion items for a position in a file, one JSON object per line
    Complete(CompleteArgs),
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct CheckArgs {
    /// Project directory, or a file inside it
    pub path: PathBuf,

    /// Builder to use instead of the configured one
    #[arg(long)]
    pub builder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct CompleteArgs {
    /// Source file to complete in
    pub path: PathBuf,

    /// Zero-based line
    pub line: u32,

    /// Zero-based character, counted in `--encoding` units
    pub character: u32,

    /// Language id (defaults from the file extension)
    #[arg(long)]
    pub language: Option<String>,

    /// Unit of the character offset
    #[arg(long, default_value = "utf-16", value_parser = parse_encoding)]
    pub encoding: PositionEncoding,

    /// Builder to use instead of the configured one
    #[arg(long)]
    pub builder: Option<String>,
}

fn parse_encoding(raw: &str) -> Result<PositionEncoding, String> {
    PositionEncoding::parse(raw)
        .ok_or_else(|| format!("expected utf-8, utf-16 or utf-32, got {raw}"))
}
