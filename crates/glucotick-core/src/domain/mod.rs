//! # Domain Models
//!
//! Canonical glucose types shared by providers, caches and analytics.
//!
//! ## Models
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Reading`] | One glucose sample in mg/dL with timestamp and direction |
//! | [`HistoryBatch`] | Time-ascending readings from one history fetch |
//! | [`TrendDirection`] | Provider-reported direction of travel |
//! | [`Thresholds`] | Low/high limits in mg/dL |
//! | [`GlucoseUnit`] | Display unit (mg/dL or mmol/L) |
//! | [`UtcDateTime`] | UTC wall-clock timestamp |
//!
//! ## Validation
//!
//! Readings enforce a finite, positive value at construction time:
//!
//! ```rust
//! use glucotick_core::{Reading, TrendDirection, UtcDateTime, ValidationError};
//!
//! let at = UtcDateTime::parse("2024-01-01T00:00:00Z").unwrap();
//! assert!(Reading::new(112.0, at, TrendDirection::Stable).is_ok());
//! assert!(matches!(
//!     Reading::new(-3.0, at, TrendDirection::Stable),
//!     Err(ValidationError::NonPositiveValue { .. })
//! ));
//! ```
//!
//! Values are always mg/dL; conversion to mmol/L happens at the display edge
//! with a single rounding rule (see [`mgdl_to_mmol`] and [`mmol_to_mgdl`]).

mod reading;
mod timestamp;
mod units;

pub use reading::{HistoryBatch, Reading, TrendDirection};
pub use timestamp::UtcDateTime;
pub use units::{
    mgdl_to_mmol, mmol_to_mgdl, GlucoseLevel, GlucoseUnit, Thresholds, MGDL_PER_MMOL,
};
