//! Derived metrics over readings and history.
//!
//! Every function is pure and takes `now` explicitly. Inputs may contain
//! invalid entries; those are filtered here rather than trusted.

use std::fmt::{Display, Formatter};

use serde::Serialize;
use time::Duration;

use crate::{GlucoseUnit, Reading, Thresholds, TrendDirection, UtcDateTime};

const TREND_SAMPLE: usize = 6;
const TREND_COMPARE_INDEX: usize = 3;
const TREND_MAX_SPAN_MINUTES: f64 = 60.0;

const DELTA_SAMPLE: usize = 10;
const DELTA_WINDOW_MINUTES: (f64, f64) = (10.0, 30.0);

/// Default staleness limit in minutes.
pub const DEFAULT_STALE_MINUTES: u32 = 10;
const FALLBACK_STALE_MINUTES: u32 = 15;

/// Rate-of-change class, in mg/dL per minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrendClass {
    /// ≥ 2.5
    RapidRise,
    /// ≥ 1.2
    ModerateRise,
    /// ≥ 0.6
    Stable,
    /// ≥ −1.2
    ModerateFall,
    /// ≥ −2.5
    RapidFall,
    VeryRapidFall,
}

impl TrendClass {
    pub fn from_slope(mgdl_per_minute: f64) -> Self {
        match mgdl_per_minute {
            slope if slope >= 2.5 => Self::RapidRise,
            slope if slope >= 1.2 => Self::ModerateRise,
            slope if slope >= 0.6 => Self::Stable,
            slope if slope >= -1.2 => Self::ModerateFall,
            slope if slope >= -2.5 => Self::RapidFall,
            _ => Self::VeryRapidFall,
        }
    }

    pub const fn from_direction(direction: TrendDirection) -> Option<Self> {
        match direction {
            TrendDirection::RisingFast => Some(Self::RapidRise),
            TrendDirection::Rising => Some(Self::ModerateRise),
            TrendDirection::Stable => Some(Self::Stable),
            TrendDirection::Falling => Some(Self::ModerateFall),
            TrendDirection::FallingFast => Some(Self::RapidFall),
            TrendDirection::Unknown => None,
        }
    }

    pub const fn arrow(self) -> &'static str {
        match self {
            Self::RapidRise => "↗↗",
            Self::ModerateRise => "↗",
            Self::Stable => "→",
            Self::ModerateFall => "↘",
            Self::RapidFall => "↘↘",
            Self::VeryRapidFall => "↓",
        }
    }
}

impl Display for TrendClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.arrow())
    }
}

fn recent_descending(history: &[Reading], count: usize) -> Vec<Reading> {
    let mut recent: Vec<Reading> = history
        .iter()
        .rev()
        .filter(|reading| reading.is_valid())
        .take(count)
        .copied()
        .collect();
    recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    recent
}

/// Slope in mg/dL per minute between the newest of the six most recent valid
/// readings and the one at index `min(3, n-1)`.
///
/// `None` with fewer than two points or a span outside `(0, 60]` minutes.
pub fn slope_per_minute(history: &[Reading]) -> Option<f64> {
    let recent = recent_descending(history, TREND_SAMPLE);
    if recent.len() < 2 {
        return None;
    }
    let newest = recent[0];
    let older = recent[TREND_COMPARE_INDEX.min(recent.len() - 1)];

    let span = newest.timestamp.minutes_since(older.timestamp);
    if span <= 0.0 || span > TREND_MAX_SPAN_MINUTES {
        tracing::debug!(span_minutes = span, "trend span out of range");
        return None;
    }
    Some((newest.value - older.value) / span)
}

/// Provider direction when known, otherwise computed from history.
pub fn trend(current: Option<&Reading>, history: &[Reading]) -> Option<TrendClass> {
    current
        .and_then(|reading| TrendClass::from_direction(reading.trend_direction))
        .or_else(|| slope_per_minute(history).map(TrendClass::from_slope))
}

/// Change between the newest reading and a comparison point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delta {
    /// mg/dL, signed.
    pub value: f64,
    pub minutes: i64,
}

impl Delta {
    /// `+N (Mmin)` in mg/dL, `+N.N (Mmin)` in mmol/L.
    pub fn format(&self, unit: GlucoseUnit) -> String {
        format!("{} ({}min)", unit.format_signed(self.value), self.minutes)
    }
}

/// Compares the newest of the ten most recent valid readings with the first
/// one 10 to 30 minutes older, or else with the second most recent.
pub fn delta(history: &[Reading]) -> Option<Delta> {
    let recent = recent_descending(history, DELTA_SAMPLE);
    if recent.len() < 2 {
        return None;
    }
    let newest = recent[0];
    let (min, max) = DELTA_WINDOW_MINUTES;
    let comparison = recent[1..]
        .iter()
        .find(|reading| (min..=max).contains(&newest.timestamp.minutes_since(reading.timestamp)))
        .copied()
        .unwrap_or(recent[1]);

    Some(Delta {
        value: newest.value - comparison.value,
        minutes: newest.timestamp.minutes_since(comparison.timestamp).round() as i64,
    })
}

/// Percentage of readings inside the inclusive thresholds, rounded.
pub fn time_in_range(window: &[Reading], thresholds: &Thresholds) -> Option<u8> {
    if window.is_empty() {
        return None;
    }
    let in_range = window
        .iter()
        .filter(|reading| thresholds.contains(reading.value))
        .count();
    Some((100.0 * in_range as f64 / window.len() as f64).round() as u8)
}

/// Minutes elapsed since the reading was taken.
pub fn minutes_old(reading: &Reading, now: UtcDateTime) -> f64 {
    now.minutes_since(reading.timestamp)
}

/// A zero limit falls back to 15 minutes.
pub fn is_stale(reading: &Reading, now: UtcDateTime, stale_minutes: u32) -> bool {
    let limit = if stale_minutes == 0 {
        FALLBACK_STALE_MINUTES
    } else {
        stale_minutes
    };
    minutes_old(reading, now) > f64::from(limit)
}

/// Valid readings within `[now - hours, now]`, ascending.
pub fn window_history(history: &[Reading], now: UtcDateTime, hours: u32) -> Vec<Reading> {
    let start = now.saturating_sub(Duration::hours(i64::from(hours)));
    let mut window: Vec<Reading> = history
        .iter()
        .filter(|reading| reading.is_valid())
        .filter(|reading| reading.timestamp >= start && reading.timestamp <= now)
        .copied()
        .collect();
    window.sort_by_key(|reading| reading.timestamp);
    window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(minutes_before: i64, base: UtcDateTime) -> UtcDateTime {
        base.saturating_sub(Duration::minutes(minutes_before))
    }

    fn series(base: UtcDateTime, points: &[(i64, f64)]) -> Vec<Reading> {
        let mut readings: Vec<Reading> = points
            .iter()
            .map(|(minutes_before, value)| {
                Reading::new(*value, at(*minutes_before, base), TrendDirection::Unknown)
                    .expect("valid reading")
            })
            .collect();
        readings.sort_by_key(|r| r.timestamp);
        readings
    }

    fn base() -> UtcDateTime {
        UtcDateTime::parse("2024-05-01T12:00:00Z").expect("valid")
    }

    #[test]
    fn slope_classes_follow_thresholds() {
        assert_eq!(TrendClass::from_slope(2.5), TrendClass::RapidRise);
        assert_eq!(TrendClass::from_slope(1.2), TrendClass::ModerateRise);
        assert_eq!(TrendClass::from_slope(0.6), TrendClass::Stable);
        assert_eq!(TrendClass::from_slope(0.0), TrendClass::ModerateFall);
        assert_eq!(TrendClass::from_slope(-2.5), TrendClass::RapidFall);
        assert_eq!(TrendClass::from_slope(-2.51), TrendClass::VeryRapidFall);
    }

    #[test]
    fn provider_direction_wins_over_history() {
        let history = series(base(), &[(15, 100.0), (0, 200.0)]);
        let current = Reading::new(150.0, base(), TrendDirection::Stable).expect("valid");

        assert_eq!(trend(Some(&current), &history), Some(TrendClass::Stable));
    }

    #[test]
    fn unknown_direction_falls_back_to_history_slope() {
        // Newest vs. index 3 (15 min earlier): +45 mg/dL over 15 min = 3/min.
        let history = series(
            base(),
            &[(25, 90.0), (20, 95.0), (15, 100.0), (10, 115.0), (5, 130.0), (0, 145.0)],
        );
        let current = Reading::new(145.0, base(), TrendDirection::Unknown).expect("valid");

        assert_eq!(trend(Some(&current), &history), Some(TrendClass::RapidRise));
        assert_eq!(trend(None, &history).map(TrendClass::arrow), Some("↗↗"));
    }

    #[test]
    fn trend_needs_two_points_and_sane_span() {
        assert_eq!(trend(None, &series(base(), &[(0, 100.0)])), None);
        assert_eq!(trend(None, &series(base(), &[(90, 100.0), (0, 110.0)])), None);
        assert_eq!(trend(None, &[]), None);
    }

    #[test]
    fn delta_prefers_ten_to_thirty_minutes_back() {
        let history = series(base(), &[(20, 100.0), (15, 104.0), (5, 110.0), (0, 112.0)]);

        let delta = delta(&history).expect("delta");

        assert_eq!(delta.value, 8.0);
        assert_eq!(delta.minutes, 15);
        assert_eq!(delta.format(GlucoseUnit::MgDl), "+8 (15min)");
    }

    #[test]
    fn delta_falls_back_to_second_most_recent() {
        let history = series(base(), &[(45, 150.0), (3, 130.0), (0, 121.0)]);

        let delta = delta(&history).expect("delta");

        assert_eq!(delta.value, -9.0);
        assert_eq!(delta.minutes, 3);
        assert_eq!(delta.format(GlucoseUnit::MmolL), "-0.5 (3min)");
    }

    #[test]
    fn delta_is_none_below_two_entries_and_idempotent() {
        assert_eq!(delta(&series(base(), &[(0, 100.0)])), None);

        let history = series(base(), &[(10, 100.0), (0, 120.0)]);
        assert_eq!(delta(&history), delta(&history));
    }

    #[test]
    fn time_in_range_is_inclusive_and_rounded() {
        let thresholds = Thresholds::default();
        let values = [70.0, 100.0, 120.0, 150.0, 180.0, 160.0, 90.0, 60.0, 200.0, 250.0];
        let points: Vec<(i64, f64)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as i64 * 5, *v))
            .collect();

        assert_eq!(time_in_range(&series(base(), &points), &thresholds), Some(70));
        assert_eq!(time_in_range(&[], &thresholds), None);
    }

    #[test]
    fn staleness_uses_limit_with_fallback() {
        let reading = Reading::new(100.0, at(12, base()), TrendDirection::Stable).expect("valid");

        assert!(is_stale(&reading, base(), 10));
        assert!(!is_stale(&reading, base(), 0));
        assert!((minutes_old(&reading, base()) - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn window_keeps_only_recent_valid_readings() {
        let history = series(base(), &[(400, 100.0), (300, 110.0), (30, 120.0), (0, 130.0)]);
        let future = Reading::new(99.0, base().saturating_add(Duration::minutes(5)), TrendDirection::Stable)
            .expect("valid");
        let mut with_future = history.clone();
        with_future.push(future);

        let window = window_history(&with_future, base(), 6);

        let values: Vec<f64> = window.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![110.0, 120.0, 130.0]);
    }
}
