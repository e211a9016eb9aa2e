//! Display-ready snapshot composed from monitor state.

use serde::Serialize;

use crate::analytics::{self, TrendClass};
use crate::{GlucoseLevel, GlucoseUnit, Reading, Settings, UtcDateTime};

/// Color used whenever no trustworthy value is shown.
pub const NEUTRAL_COLOR: &str = "gray";

/// Overall monitor condition as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorStatus {
    /// Provider lacks URL or credentials.
    NotConfigured,
    /// Configured, no reading yet.
    Loading,
    Ok,
    /// Last reading older than the staleness limit.
    Stale,
    /// Current-reading retries exhausted without any reading.
    Error,
}

/// Everything a panel or chart needs to render one update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub display_value: String,
    pub units: GlucoseUnit,
    pub trend: Option<TrendClass>,
    pub delta: Option<String>,
    pub time_in_range: Option<u8>,
    pub updated_ago: String,
    pub status: MonitorStatus,
    pub color: String,
    pub window_hours: u32,
    pub window: Vec<Reading>,
}

impl Snapshot {
    /// Panel label: `"{value} {arrow}"`, `"No Config"`, `"ERR"` or `"--"`.
    pub fn label(&self) -> String {
        match self.status {
            MonitorStatus::NotConfigured => String::from("No Config"),
            MonitorStatus::Error => String::from("ERR"),
            MonitorStatus::Loading => String::from("--"),
            MonitorStatus::Ok | MonitorStatus::Stale => match self.trend {
                Some(trend) => format!("{} {}", self.display_value, trend.arrow()),
                None => self.display_value.clone(),
            },
        }
    }
}

/// Inputs for [`compose`].
#[derive(Debug, Clone, Copy)]
pub struct DisplayInput<'a> {
    pub current: Option<&'a Reading>,
    /// Full last history batch, not windowed.
    pub history: &'a [Reading],
    pub settings: &'a Settings,
    pub configured: bool,
    pub current_exhausted: bool,
    pub window_hours: u32,
    pub now: UtcDateTime,
}

pub fn compose(input: DisplayInput<'_>) -> Snapshot {
    let settings = input.settings;
    let units = settings.units;
    let window = analytics::window_history(input.history, input.now, input.window_hours);

    let status = match (input.configured, input.current) {
        (false, _) => MonitorStatus::NotConfigured,
        (true, None) if input.current_exhausted => MonitorStatus::Error,
        (true, None) => MonitorStatus::Loading,
        (true, Some(reading)) if analytics::is_stale(reading, input.now, settings.stale_minutes) => {
            MonitorStatus::Stale
        }
        (true, Some(_)) => MonitorStatus::Ok,
    };

    let color = match (status, input.current) {
        (MonitorStatus::Ok, Some(reading)) => {
            let colors = &settings.colors;
            match settings.thresholds.classify(reading.value) {
                GlucoseLevel::Low => colors.low.clone(),
                GlucoseLevel::High => colors.high.clone(),
                GlucoseLevel::InRange => colors.normal.clone(),
            }
        }
        _ => String::from(NEUTRAL_COLOR),
    };

    Snapshot {
        display_value: input
            .current
            .map_or_else(|| String::from("--"), |reading| units.format(reading.value)),
        units,
        trend: input
            .current
            .and_then(|current| analytics::trend(Some(current), input.history)),
        delta: analytics::delta(input.history).map(|delta| delta.format(units)),
        time_in_range: analytics::time_in_range(&window, &settings.thresholds),
        updated_ago: format_time_ago(input.current.map(|reading| reading.timestamp), input.now),
        status,
        color,
        window_hours: input.window_hours,
        window,
    }
}

/// Human "time since update" text.
pub fn format_time_ago(then: Option<UtcDateTime>, now: UtcDateTime) -> String {
    let Some(then) = then else {
        return String::from("never");
    };
    let seconds = (now - then).whole_seconds();

    if seconds < 60 {
        return String::from("less than 1 minute ago");
    }
    if seconds > 12 * 3600 {
        return String::from("more than 12 hours ago");
    }
    if seconds > 3600 {
        let hours = seconds / 3600;
        let minutes = (seconds % 3600) / 60;
        return if minutes > 0 {
            format!("{hours}h{minutes}m ago")
        } else {
            format!("{hours}h ago")
        };
    }
    if seconds > 60 {
        return format!("{}m ago", seconds / 60);
    }
    String::from("less than 1 minute ago")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrendDirection;
    use time::Duration;

    fn now() -> UtcDateTime {
        UtcDateTime::parse("2024-05-01T12:00:00Z").expect("valid")
    }

    fn ago(seconds: i64) -> Option<UtcDateTime> {
        Some(now().saturating_sub(Duration::seconds(seconds)))
    }

    fn reading(value: f64, minutes_before: i64) -> Reading {
        Reading::new(
            value,
            now().saturating_sub(Duration::minutes(minutes_before)),
            TrendDirection::Rising,
        )
        .expect("valid reading")
    }

    fn input<'a>(current: Option<&'a Reading>, settings: &'a Settings) -> DisplayInput<'a> {
        DisplayInput {
            current,
            history: &[],
            settings,
            configured: true,
            current_exhausted: false,
            window_hours: settings.graph_hours,
            now: now(),
        }
    }

    #[test]
    fn time_ago_strings() {
        assert_eq!(format_time_ago(None, now()), "never");
        assert_eq!(format_time_ago(ago(59), now()), "less than 1 minute ago");
        assert_eq!(format_time_ago(ago(60), now()), "less than 1 minute ago");
        assert_eq!(format_time_ago(ago(7 * 60 + 30), now()), "7m ago");
        assert_eq!(format_time_ago(ago(3600), now()), "60m ago");
        assert_eq!(format_time_ago(ago(2 * 3600 + 5 * 60), now()), "2h5m ago");
        assert_eq!(format_time_ago(ago(3 * 3600 + 20), now()), "3h ago");
        assert_eq!(format_time_ago(ago(13 * 3600), now()), "more than 12 hours ago");
    }

    #[test]
    fn fresh_low_reading_uses_low_color() {
        let settings = Settings::default();
        let current = reading(62.0, 2);

        let snapshot = compose(input(Some(&current), &settings));

        assert_eq!(snapshot.status, MonitorStatus::Ok);
        assert_eq!(snapshot.color, "#ff4444");
        assert_eq!(snapshot.display_value, "62");
        assert_eq!(snapshot.label(), "62 ↗");
        assert_eq!(snapshot.updated_ago, "2m ago");
    }

    #[test]
    fn stale_reading_is_neutral_regardless_of_thresholds() {
        let settings = Settings::default();
        let current = reading(250.0, 25);

        let snapshot = compose(input(Some(&current), &settings));

        assert_eq!(snapshot.status, MonitorStatus::Stale);
        assert_eq!(snapshot.color, NEUTRAL_COLOR);
    }

    #[test]
    fn mmol_display_uses_one_decimal() {
        let settings = Settings {
            units: GlucoseUnit::MmolL,
            ..Settings::default()
        };
        let current = reading(65.0, 1);

        assert_eq!(compose(input(Some(&current), &settings)).display_value, "3.6");
    }

    #[test]
    fn label_reflects_status() {
        let settings = Settings::default();

        let mut unconfigured = input(None, &settings);
        unconfigured.configured = false;
        assert_eq!(compose(unconfigured).label(), "No Config");

        let mut failed = input(None, &settings);
        failed.current_exhausted = true;
        assert_eq!(compose(failed).label(), "ERR");

        assert_eq!(compose(input(None, &settings)).label(), "--");
        assert_eq!(compose(input(None, &settings)).color, NEUTRAL_COLOR);
    }

    #[test]
    fn window_and_time_in_range_follow_window_hours() {
        let settings = Settings::default();
        let history = vec![reading(60.0, 300), reading(100.0, 120), reading(120.0, 0)];
        let current = history[2];

        let mut narrow = input(Some(&current), &settings);
        narrow.history = &history;
        narrow.window_hours = 3;
        let snapshot = compose(narrow);

        assert_eq!(snapshot.window.len(), 2);
        assert_eq!(snapshot.time_in_range, Some(100));

        let mut wide = narrow;
        wide.window_hours = 6;
        assert_eq!(compose(wide).time_in_range, Some(67));
    }
}
