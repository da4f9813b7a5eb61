//! Constants for CellWatch Core
//!
//! This module centralises the numeric defaults used throughout the analysis
//! core. None of these values are used directly by the algorithms: every
//! component takes its tunables as explicit parameters, and these constants
//! only seed the `Default` implementations of configuration types.
//!
//! ## Organization
//!
//! Constants are grouped by domain:
//! - **Battery**: LiFePO4 bank characteristics and correction coefficients
//! - **Analysis**: Window sizes, thresholds and evidence policies
//! - **Time**: Unit conversions
//!
//! ## Usage Guidelines
//!
//! 1. Always use these constants instead of magic numbers
//! 2. Include the unit in the name (`_V`, `_MV`, `_C`, `_AH`, `_SECS`)
//! 3. Document where a value comes from (datasheet, measurement, convention)

/// LiFePO4 bank characteristics, thermal coefficients and uncertainties.
pub mod battery;

/// Window sizes, anomaly thresholds and statistical policies.
pub mod analysis;

/// Time unit conversions.
pub mod time;

// Re-export commonly used constants for convenience
pub use battery::{
    NAMEPLATE_CAPACITY_AH, MV_PER_SOC_PERCENT,
    INSTRUMENT_THERMAL_COEFF_V_PER_C, BATTERY_THERMAL_COEFF_V_PER_C,
    MEASUREMENT_UNCERTAINTY_V, TEMPERATURE_UNCERTAINTY_C,
};

pub use analysis::{
    DEFAULT_BUCKET_SECS, MIN_BUCKET_SAMPLES, DEFAULT_SLIDING_WINDOW,
    DEFAULT_ALIGNMENT_TOLERANCE_SECS, DEFAULT_SIGMA_MULTIPLIER,
};

pub use time::{SECONDS_PER_HOUR, SECONDS_PER_DAY, HOURS_PER_DAY};
