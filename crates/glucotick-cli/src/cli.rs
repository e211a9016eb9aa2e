//! CLI argument definitions for glucotick.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `watch` | Run the monitor and print every snapshot and alert |
//! | `once` | Fetch once, print a snapshot, exit |
//! | `cache` | Inspect or clear the durable cache |
//! | `config` | Show, read or write settings |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | platform config dir | Settings file |
//! | `--cache` | platform cache dir | Durable cache file |
//! | `--format` | `text` | Output format (text, json, ndjson) |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--verbose` | `false` | Debug logging |
//!
//! # Examples
//!
//! ```bash
//! glucotick config set nightscoutUrl https://cgm.example.org
//! glucotick config set apiToken reader-abc123
//! glucotick once
//! glucotick watch --format ndjson
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Glucose readout from Nightscout or LibreLink Up.
#[derive(Debug, Parser)]
#[command(
    name = "glucotick",
    author,
    version,
    about = "Continuous glucose monitor readout for the terminal"
)]
pub struct Cli {
    /// Settings file (JSON).
    #[arg(long, global = true, env = "GLUCOTICK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Durable cache file (JSON).
    #[arg(long, global = true, env = "GLUCOTICK_CACHE")]
    pub cache: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Debug logging regardless of the config `debug` flag.
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One human-readable line per update.
    Text,
    /// A single JSON document.
    Json,
    /// Newline-delimited JSON, one object per update.
    Ndjson,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the monitor until interrupted.
    ///
    /// Reloads settings when the config file changes.
    Watch(WatchArgs),

    /// Fetch the current reading and history once.
    Once(OnceArgs),

    /// Durable cache management.
    Cache(CacheArgs),

    /// Settings management.
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Chart window in hours; defaults to `graphHours`.
    #[arg(long)]
    pub window_hours: Option<u32>,

    /// Do not watch the config file for changes.
    #[arg(long, default_value_t = false)]
    pub no_reload: bool,
}

#[derive(Debug, Args)]
pub struct OnceArgs {
    #[arg(long)]
    pub window_hours: Option<u32>,

    /// Skip writing results to the durable cache.
    #[arg(long, default_value_t = false)]
    pub no_save: bool,
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum CacheCommand {
    /// Print the last reading and history batch on disk.
    Show,
    /// Empty both cache slots.
    Clear,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the settings file location.
    Path,
    /// Print all settings with secrets redacted.
    Show,
    /// Print one dotted key, e.g. `thresholds.low`.
    Get { key: String },
    /// Set one dotted key. The value is parsed as JSON, falling back to a string.
    Set { key: String, value: String },
}
