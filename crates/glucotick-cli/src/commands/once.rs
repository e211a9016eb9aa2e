use std::process::ExitCode;
use std::sync::Arc;

use glucotick_core::alert::{self, AlertState};
use glucotick_core::display::{self, DisplayInput};
use glucotick_core::{
    ConfigSource, DefaultProviderFactory, FileConfig, HistoryBatch, ProviderFactory, UtcDateTime,
};

use crate::cli::{Cli, OnceArgs};
use crate::error::CliError;
use crate::output;

pub async fn run(cli: &Cli, args: &OnceArgs) -> Result<ExitCode, CliError> {
    let config: Arc<dyn ConfigSource> = Arc::new(FileConfig::open(super::config_path(cli)?)?);
    let settings = config.settings();
    let provider = DefaultProviderFactory::default().build(config);
    let window_hours = args.window_hours.unwrap_or(settings.graph_hours).max(1);

    if !provider.is_configured() {
        let snapshot = display::compose(DisplayInput {
            current: None,
            history: &[],
            settings: &settings,
            configured: false,
            current_exhausted: false,
            window_hours,
            now: UtcDateTime::now(),
        });
        output::render_snapshot(&snapshot, cli.format, cli.pretty)?;
        return Err(CliError::NotConfigured);
    }

    let (current, history) = tokio::join!(provider.fetch_current(), provider.fetch_history());
    provider.destroy();

    let cache = (!args.no_save).then(|| super::durable_cache(cli)).transpose()?;
    let now = UtcDateTime::now();
    let history = match history {
        Ok(history) => {
            if let Some(cache) = &cache {
                cache.save_history(&history, now);
            }
            history
        }
        Err(error) => {
            tracing::warn!(%error, "history fetch failed");
            HistoryBatch::default()
        }
    };
    let current = match current {
        Ok(reading) => {
            if let Some(cache) = &cache {
                cache.save_reading(&reading, now);
            }
            reading
        }
        Err(error) => match history.latest() {
            Some(latest) => {
                tracing::warn!(%error, "current fetch failed, using newest history entry");
                *latest
            }
            None => return Err(error.into()),
        },
    };

    let snapshot = display::compose(DisplayInput {
        current: Some(&current),
        history: history.readings(),
        settings: &settings,
        configured: true,
        current_exhausted: false,
        window_hours,
        now,
    });
    output::render_snapshot(&snapshot, cli.format, cli.pretty)?;

    let (_, notification) = alert::evaluate(
        current.value,
        &settings.thresholds,
        &settings.notifications,
        settings.units,
        AlertState::Normal,
    );
    if let Some(notification) = notification {
        output::render_notification(&notification, cli.format, cli.pretty)?;
    }
    Ok(ExitCode::SUCCESS)
}
