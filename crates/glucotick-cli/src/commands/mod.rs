mod cache;
mod config;
mod once;
mod watch;

use std::path::PathBuf;
use std::process::ExitCode;

use glucotick_core::{DurableCache, Settings};

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// `--config`, else the platform default.
pub fn config_path(cli: &Cli) -> Result<PathBuf, CliError> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => Ok(Settings::default_path()?),
    }
}

pub fn durable_cache(cli: &Cli) -> Result<DurableCache, CliError> {
    let path = match &cli.cache {
        Some(path) => path.clone(),
        None => DurableCache::default_path()?,
    };
    Ok(DurableCache::new(path))
}

pub async fn run(cli: &Cli) -> Result<ExitCode, CliError> {
    match &cli.command {
        Command::Watch(args) => watch::run(cli, args).await,
        Command::Once(args) => once::run(cli, args).await,
        Command::Cache(args) => cache::run(cli, args.command),
        Command::Config(args) => config::run(cli, &args.command),
    }
}
