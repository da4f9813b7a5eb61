//! Battery Bank Constants
//!
//! Characteristics of the monitored 12V/500Ah LiFePO4 bank and of the
//! monitoring device. These are the reference values for the capacity and
//! parasitic-current estimator; every one of them can be overridden through
//! configuration.

// ===== NAMEPLATE =====

/// Nameplate capacity of the bank (Ah).
pub const NAMEPLATE_CAPACITY_AH: f64 = 500.0;

/// Resting-voltage slope of the SOC curve on the LiFePO4 plateau (mV per 1% SOC).
///
/// LiFePO4 has a very flat open-circuit curve; 10 mV/% is the working figure
/// for the 13.2-13.4 V resting region of a 4S bank.
pub const MV_PER_SOC_PERCENT: f64 = 10.0;

/// Usable fraction of nameplate for standby endurance projections (80% DOD).
pub const USABLE_CAPACITY_FRACTION: f64 = 0.8;

// ===== THERMAL COEFFICIENTS =====

/// Thermal drift of the measuring instrument (V per °C).
///
/// Measured separately against a reference source; dominates the battery's
/// own coefficient.
pub const INSTRUMENT_THERMAL_COEFF_V_PER_C: f64 = 0.007;

/// Intrinsic thermal coefficient of the bank's resting voltage (V per °C).
pub const BATTERY_THERMAL_COEFF_V_PER_C: f64 = 0.002;

// ===== MEASUREMENT =====

/// Measurement uncertainty applied to voltage deltas (V).
pub const MEASUREMENT_UNCERTAINTY_V: f64 = 0.005;

/// Uncertainty of the start/end temperature estimates (°C).
pub const TEMPERATURE_UNCERTAINTY_C: f64 = 1.0;
