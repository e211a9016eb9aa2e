use std::process::ExitCode;

use serde_json::json;

use crate::cli::{CacheCommand, Cli};
use crate::error::CliError;
use crate::output;

pub fn run(cli: &Cli, command: CacheCommand) -> Result<ExitCode, CliError> {
    let cache = super::durable_cache(cli)?;
    let data = match command {
        CacheCommand::Show => {
            let entry = cache.load().unwrap_or_default();
            json!({
                "path": cache.path(),
                "empty": entry.is_empty(),
                "entry": entry,
            })
        }
        CacheCommand::Clear => {
            cache.clear();
            json!({ "path": cache.path(), "cleared": true })
        }
    };
    output::render(&data, cli.format, cli.pretty)?;
    Ok(ExitCode::SUCCESS)
}
