use glucotick_core::{MonitorStatus, Notification, Snapshot};
use serde::Serialize;
use serde_json::Value;

use crate::cli::OutputFormat;
use crate::error::CliError;

fn encode<T: Serialize>(value: &T, format: OutputFormat, pretty: bool) -> Result<String, CliError> {
    let text = if pretty && format == OutputFormat::Json {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(text)
}

/// Renders an arbitrary command payload.
pub fn render(value: &Value, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    match format {
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Json | OutputFormat::Ndjson => println!("{}", encode(value, format, pretty)?),
    }
    Ok(())
}

pub fn render_snapshot(snapshot: &Snapshot, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    match format {
        OutputFormat::Text => println!("{}", snapshot_line(snapshot)),
        OutputFormat::Json | OutputFormat::Ndjson => {
            println!("{}", encode(&tagged("snapshot", snapshot)?, format, pretty)?);
        }
    }
    Ok(())
}

pub fn render_notification(
    notification: &Notification,
    format: OutputFormat,
    pretty: bool,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Text => println!("[{}] {}", notification.title, notification.body),
        OutputFormat::Json | OutputFormat::Ndjson => {
            println!("{}", encode(&tagged("notification", notification)?, format, pretty)?);
        }
    }
    Ok(())
}

fn tagged<T: Serialize>(event: &str, payload: &T) -> Result<Value, CliError> {
    Ok(serde_json::json!({
        "event": event,
        "data": serde_json::to_value(payload)?,
    }))
}

/// `112 ↗  +4 (5min)  TIR 82%  2m ago`
pub fn snapshot_line(snapshot: &Snapshot) -> String {
    let mut parts = vec![snapshot.label()];
    if matches!(snapshot.status, MonitorStatus::Ok | MonitorStatus::Stale) {
        parts.push(snapshot.units.to_string());
        if let Some(delta) = &snapshot.delta {
            parts.push(delta.clone());
        }
        if let Some(tir) = snapshot.time_in_range {
            parts.push(format!("TIR {tir}%"));
        }
        parts.push(snapshot.updated_ago.clone());
    }
    if snapshot.status == MonitorStatus::Stale {
        parts.push(String::from("(stale)"));
    }
    parts.join("  ")
}
