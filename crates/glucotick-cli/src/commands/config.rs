use std::process::ExitCode;

use glucotick_core::{ConfigSource, FileConfig, Settings};
use serde_json::{json, Value};

use crate::cli::{Cli, ConfigCommand};
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";
const SECRET_KEYS: [&str; 2] = ["/apiToken", "/librelink/password"];

pub fn run(cli: &Cli, command: &ConfigCommand) -> Result<ExitCode, CliError> {
    let path = super::config_path(cli)?;
    let data = match command {
        ConfigCommand::Path => json!({ "path": path }),
        ConfigCommand::Show => {
            let settings = Settings::load_from_path(&path)?;
            let document: Value = serde_json::from_str(&settings.to_json()?)?;
            json!({ "path": path, "settings": redact(document) })
        }
        ConfigCommand::Get { key } => {
            let settings = Settings::load_from_path(&path)?;
            let value = settings
                .get(key)
                .ok_or_else(|| CliError::MissingKey(key.clone()))?;
            json!({ "key": key, "value": redact_key(key, value) })
        }
        ConfigCommand::Set { key, value } => {
            let config = FileConfig::open(&path)?;
            config.set(key, parse_value(value))?;
            tracing::info!(key = %key, path = %path.display(), "config updated");
            let stored = config.get(key).unwrap_or(Value::Null);
            json!({ "key": key, "value": redact_key(key, stored) })
        }
    };
    output::render(&data, cli.format, cli.pretty)?;
    Ok(ExitCode::SUCCESS)
}

/// JSON when it parses (`65`, `true`, `"x"`), otherwise the raw string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

fn redact(mut document: Value) -> Value {
    for pointer in SECRET_KEYS {
        if let Some(slot) = document.pointer_mut(pointer) {
            if slot.as_str().is_some_and(|secret| !secret.is_empty()) {
                *slot = Value::String(String::from(REDACTED));
            }
        }
    }
    document
}

fn redact_key(key: &str, value: Value) -> Value {
    let pointer = format!("/{}", key.replace('.', "/"));
    let is_secret = SECRET_KEYS.contains(&pointer.as_str());
    match value {
        Value::String(secret) if is_secret && !secret.is_empty() => Value::String(String::from(REDACTED)),
        other => other,
    }
}
