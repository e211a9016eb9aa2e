mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match commands::run(&cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose` or the
/// config `debug` flag.
fn init_logging(cli: &Cli) {
    let debug = cli.verbose
        || commands::config_path(cli)
            .ok()
            .and_then(|path| glucotick_core::Settings::load_from_path(&path).ok())
            .is_some_and(|settings| settings.debug);
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}
