use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// mg/dL per mmol/L for glucose.
pub const MGDL_PER_MMOL: f64 = 18.0;

/// Display unit. Values are always held in mg/dL internally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlucoseUnit {
    #[default]
    #[serde(rename = "mg/dL")]
    MgDl,
    #[serde(rename = "mmol/L")]
    MmolL,
}

impl GlucoseUnit {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MgDl => "mg/dL",
            Self::MmolL => "mmol/L",
        }
    }

    /// Converts a canonical mg/dL value into this unit, rounded for display.
    pub fn from_mgdl(self, mgdl: f64) -> f64 {
        match self {
            Self::MgDl => mgdl.round(),
            Self::MmolL => mgdl_to_mmol(mgdl),
        }
    }

    /// Converts a value expressed in this unit back to canonical mg/dL.
    pub fn to_mgdl(self, value: f64) -> f64 {
        match self {
            Self::MgDl => value,
            Self::MmolL => mmol_to_mgdl(value),
        }
    }

    /// Formats a canonical mg/dL value: integer for mg/dL, one decimal for mmol/L.
    pub fn format(self, mgdl: f64) -> String {
        match self {
            Self::MgDl => format!("{}", mgdl.round() as i64),
            Self::MmolL => format!("{:.1}", mgdl_to_mmol(mgdl)),
        }
    }

    /// Same as [`format`](Self::format) with an explicit leading sign.
    pub fn format_signed(self, mgdl: f64) -> String {
        let formatted = self.format(mgdl);
        if formatted.starts_with('-') {
            // "-0" and "-0.0" read as no change.
            if formatted.trim_start_matches('-').trim_matches(|c| c == '0' || c == '.').is_empty() {
                return format!("+{}", formatted.trim_start_matches('-'));
            }
            formatted
        } else {
            format!("+{formatted}")
        }
    }
}

impl Display for GlucoseUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GlucoseUnit {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mg/dl" | "mgdl" => Ok(Self::MgDl),
            "mmol/l" | "mmol" => Ok(Self::MmolL),
            other => Err(ValidationError::InvalidUnits {
                value: other.to_owned(),
            }),
        }
    }
}

/// mg/dL → mmol/L, rounded to one decimal place.
pub fn mgdl_to_mmol(mgdl: f64) -> f64 {
    (mgdl / MGDL_PER_MMOL * 10.0).round() / 10.0
}

/// mmol/L → mg/dL, rounded to the nearest integer.
pub fn mmol_to_mgdl(mmol: f64) -> f64 {
    (mmol * MGDL_PER_MMOL).round()
}

/// Position of a value relative to [`Thresholds`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlucoseLevel {
    Low,
    InRange,
    High,
}

/// Low/high limits in mg/dL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub low: f64,
    pub high: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low: 70.0,
            high: 180.0,
        }
    }
}

impl Thresholds {
    pub fn new(low: f64, high: f64) -> Result<Self, ValidationError> {
        if !low.is_finite() || !high.is_finite() {
            return Err(ValidationError::NonFiniteValue { field: "thresholds" });
        }
        if low >= high {
            return Err(ValidationError::InvertedThresholds {
                low: low.max(0.0) as u32,
                high: high.max(0.0) as u32,
            });
        }
        Ok(Self { low, high })
    }

    /// Inclusive on both ends.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }

    pub fn classify(&self, value: f64) -> GlucoseLevel {
        if value < self.low {
            GlucoseLevel::Low
        } else if value > self.high {
            GlucoseLevel::High
        } else {
            GlucoseLevel::InRange
        }
    }

    pub fn convert(self, from: GlucoseUnit) -> Self {
        Self {
            low: from.to_mgdl(self.low),
            high: from.to_mgdl(self.high),
        }
    }

    pub fn express_in(self, unit: GlucoseUnit) -> Self {
        Self {
            low: unit.from_mgdl(self.low),
            high: unit.from_mgdl(self.high),
        }
    }
}
