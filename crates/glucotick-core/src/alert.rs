//! Low/high alert transitions.

use serde::Serialize;

use crate::config::NotificationSettings;
use crate::{GlucoseLevel, GlucoseUnit, Thresholds};

pub const ALERT_TITLE: &str = "CGM Alert";

/// Last classified alert state. Lives for the process, not persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    #[default]
    Normal,
    Low,
    High,
}

impl From<GlucoseLevel> for AlertState {
    fn from(level: GlucoseLevel) -> Self {
        match level {
            GlucoseLevel::Low => Self::Low,
            GlucoseLevel::InRange => Self::Normal,
            GlucoseLevel::High => Self::High,
        }
    }
}

/// Desktop notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

/// Decides the next state and whether to notify.
///
/// Fires only when entering low or high from a different state. The state is
/// tracked even when notifications are disabled, so enabling them later does
/// not fire for an excursion already in progress.
pub fn evaluate(
    value: f64,
    thresholds: &Thresholds,
    notifications: &NotificationSettings,
    unit: GlucoseUnit,
    previous: AlertState,
) -> (AlertState, Option<Notification>) {
    let next = AlertState::from(thresholds.classify(value));
    if next == previous {
        return (next, None);
    }

    let (enabled, label) = match next {
        AlertState::Normal => return (next, None),
        AlertState::Low => (notifications.low, "Low"),
        AlertState::High => (notifications.high, "High"),
    };
    if !(notifications.enabled && enabled) {
        return (next, None);
    }

    let notification = Notification {
        title: String::from(ALERT_TITLE),
        body: format!("{label} Glucose: {} {unit}", unit.format(value)),
    };
    (next, Some(notification))
}

/// Stateful wrapper around [`evaluate`].
#[derive(Debug, Clone, Default)]
pub struct AlertEvaluator {
    state: AlertState,
}

impl AlertEvaluator {
    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn observe(
        &mut self,
        value: f64,
        thresholds: &Thresholds,
        notifications: &NotificationSettings,
        unit: GlucoseUnit,
    ) -> Option<Notification> {
        let (next, notification) = evaluate(value, thresholds, notifications, unit, self.state);
        if next != self.state {
            tracing::debug!(from = ?self.state, to = ?next, "alert state changed");
        }
        self.state = next;
        notification
    }

    pub fn reset(&mut self) {
        self.state = AlertState::Normal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observe(evaluator: &mut AlertEvaluator, value: f64) -> Option<Notification> {
        evaluator.observe(
            value,
            &Thresholds::default(),
            &NotificationSettings::default(),
            GlucoseUnit::MgDl,
        )
    }

    #[test]
    fn fires_once_on_entering_low() {
        let mut evaluator = AlertEvaluator::default();

        let first = observe(&mut evaluator, 65.0).expect("normal -> low fires");
        assert_eq!(first.title, "CGM Alert");
        assert_eq!(first.body, "Low Glucose: 65 mg/dL");

        assert!(observe(&mut evaluator, 60.0).is_none());
        assert!(observe(&mut evaluator, 100.0).is_none());
        assert_eq!(evaluator.state(), AlertState::Normal);
    }

    #[test]
    fn low_to_high_fires_again() {
        let mut evaluator = AlertEvaluator::default();
        observe(&mut evaluator, 60.0);

        let high = observe(&mut evaluator, 220.0).expect("low -> high fires");
        assert_eq!(high.body, "High Glucose: 220 mg/dL");
    }

    #[test]
    fn thresholds_themselves_are_normal() {
        let mut evaluator = AlertEvaluator::default();
        assert!(observe(&mut evaluator, 70.0).is_none());
        assert!(observe(&mut evaluator, 180.0).is_none());
    }

    #[test]
    fn mmol_body_uses_display_unit() {
        let (state, notification) = evaluate(
            65.0,
            &Thresholds::default(),
            &NotificationSettings::default(),
            GlucoseUnit::MmolL,
            AlertState::Normal,
        );
        assert_eq!(state, AlertState::Low);
        assert_eq!(
            notification.map(|n| n.body).as_deref(),
            Some("Low Glucose: 3.6 mmol/L")
        );
    }

    #[test]
    fn disabled_notifications_still_track_state() {
        let mut evaluator = AlertEvaluator::default();
        let muted = NotificationSettings {
            enabled: false,
            ..NotificationSettings::default()
        };

        let silent = evaluator.observe(60.0, &Thresholds::default(), &muted, GlucoseUnit::MgDl);
        assert!(silent.is_none());
        assert_eq!(evaluator.state(), AlertState::Low);

        // Re-enabled mid-excursion: no alert for the low already in progress.
        assert!(observe(&mut evaluator, 58.0).is_none());
    }

    #[test]
    fn per_direction_flag_suppresses_only_that_direction() {
        let no_high = NotificationSettings {
            high: false,
            ..NotificationSettings::default()
        };
        let (_, high) = evaluate(
            250.0,
            &Thresholds::default(),
            &no_high,
            GlucoseUnit::MgDl,
            AlertState::Normal,
        );
        let (_, low) = evaluate(
            50.0,
            &Thresholds::default(),
            &no_high,
            GlucoseUnit::MgDl,
            AlertState::Normal,
        );
        assert!(high.is_none());
        assert!(low.is_some());
    }
}
