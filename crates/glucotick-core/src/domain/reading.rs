use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{UtcDateTime, ValidationError};

/// Provider-reported direction of travel for a reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrendDirection {
    RisingFast,
    Rising,
    Stable,
    Falling,
    FallingFast,
    #[default]
    Unknown,
}

impl TrendDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RisingFast => "rising-fast",
            Self::Rising => "rising",
            Self::Stable => "stable",
            Self::Falling => "falling",
            Self::FallingFast => "falling-fast",
            Self::Unknown => "unknown",
        }
    }

    /// Maps a Nightscout `direction` string.
    pub fn from_nightscout(direction: &str) -> Self {
        match direction {
            "DoubleUp" => Self::RisingFast,
            "SingleUp" | "FortyFiveUp" => Self::Rising,
            "Flat" => Self::Stable,
            "FortyFiveDown" | "SingleDown" => Self::Falling,
            "DoubleDown" => Self::FallingFast,
            _ => Self::Unknown,
        }
    }

    /// Maps a LibreLink `TrendArrow` code.
    pub const fn from_librelink_arrow(code: i64) -> Self {
        match code {
            1 => Self::Rising,
            2 => Self::Stable,
            3 => Self::Falling,
            _ => Self::Unknown,
        }
    }

    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl Display for TrendDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical glucose reading in mg/dL, independent of the source protocol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub value: f64,
    pub timestamp: UtcDateTime,
    #[serde(default)]
    pub trend_direction: TrendDirection,
}

impl Reading {
    pub fn new(
        value: f64,
        timestamp: UtcDateTime,
        trend_direction: TrendDirection,
    ) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteValue { field: "value" });
        }
        if value <= 0.0 {
            return Err(ValidationError::NonPositiveValue { field: "value" });
        }

        Ok(Self {
            value,
            timestamp,
            trend_direction,
        })
    }

    /// Deserialized readings bypass `new`, so consumers re-check before use.
    pub fn is_valid(&self) -> bool {
        self.value.is_finite() && self.value > 0.0
    }
}

/// Readings from one history fetch, time-ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryBatch {
    readings: Vec<Reading>,
}

impl HistoryBatch {
    /// Sorts the readings ascending by timestamp. Duplicates are kept.
    pub fn new(mut readings: Vec<Reading>) -> Self {
        readings.sort_by_key(|reading| reading.timestamp);
        Self { readings }
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn into_readings(self) -> Vec<Reading> {
        self.readings
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.readings.last()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

impl From<Vec<Reading>> for HistoryBatch {
    fn from(readings: Vec<Reading>) -> Self {
        Self::new(readings)
    }
}
