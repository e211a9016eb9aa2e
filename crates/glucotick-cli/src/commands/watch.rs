use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use glucotick_core::{
    ConfigSource, DisplaySink, FileConfig, MonitorBuilder, MonitorHandle, Notification, Snapshot,
};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::cli::{Cli, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

/// Prints every update to stdout.
struct TerminalSink {
    format: OutputFormat,
    pretty: bool,
}

impl DisplaySink for TerminalSink {
    fn publish(&self, snapshot: &Snapshot) {
        if let Err(error) = output::render_snapshot(snapshot, self.format, self.pretty) {
            tracing::error!(%error, "failed to render snapshot");
        }
    }

    fn notify(&self, notification: &Notification) {
        if let Err(error) = output::render_notification(notification, self.format, self.pretty) {
            tracing::error!(%error, "failed to render notification");
        }
    }
}

pub async fn run(cli: &Cli, args: &WatchArgs) -> Result<ExitCode, CliError> {
    let path = super::config_path(cli)?;
    let config: Arc<dyn ConfigSource> = Arc::new(FileConfig::open(&path)?);
    let sink = Arc::new(TerminalSink {
        format: cli.format,
        pretty: cli.pretty,
    });

    let monitor = Arc::new(
        MonitorBuilder::new(config, sink)
            .durable_cache(super::durable_cache(cli)?)
            .start(),
    );
    if let Some(hours) = args.window_hours {
        monitor.set_window_hours(hours);
    }

    let _watcher = if args.no_reload {
        None
    } else {
        Some(watch_config(&path, monitor.clone())?)
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupted, shutting down");
    monitor.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

/// Watches the config file's directory; editors often replace the file
/// rather than write it in place.
fn watch_config(path: &Path, monitor: Arc<MonitorHandle>) -> Result<RecommendedWatcher, CliError> {
    let target: PathBuf = path.to_path_buf();
    let file_name = target.file_name().map(ToOwned::to_owned);
    let directory = target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        match event {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) && event
                    .paths
                    .iter()
                    .any(|changed| changed.file_name() == file_name.as_deref());
                if relevant {
                    tracing::debug!(kind = ?event.kind, "config file changed");
                    monitor.config_changed();
                }
            }
            Err(error) => tracing::warn!(%error, "config watcher error"),
        }
    })?;
    watcher.watch(&directory, RecursiveMode::NonRecursive)?;
    tracing::info!(path = %target.display(), "watching config for changes");
    Ok(watcher)
}
