//! Capacity and parasitic-current estimation
//!
//! ## Overview
//!
//! Converts a resting-voltage delta over a known duration into a charge
//! loss and an average current, after removing known confounds:
//!
//! 1. Step correction: a separately measured baseline offset (e.g. a device
//!    setting change) is added to the raw end voltage
//! 2. `ΔV_observed = V_end_corrected - V_start`
//! 3. Thermal confounds, each linear in the temperature delta `ΔT`:
//!    the instrument's reading drift and the cell chemistry's own
//!    coefficient are both subtracted
//! 4. `ΔSOC% = ΔV_mV / mV_per_%SOC`, `ΔAh = nameplate × ΔSOC% / 100`
//! 5. `I_mA = ΔAh × 1000 / hours` (negative = discharge)
//!
//! ## Uncertainty
//!
//! Steps 3-5 are repeated at the extremes of the measurement (±u volts) and
//! temperature (±u_T degrees) uncertainty:
//!
//! ```text
//! best  = ΔV_obs + u - (k_inst + k_batt) × (ΔT - u_T)
//! worst = ΔV_obs - u - (k_inst + k_batt) × (ΔT + u_T)
//! ```
//!
//! The point estimate is reported ± half the best/worst spread.
//!
//! ## Anchors
//!
//! [`estimate_between`] requires samples at exactly the requested start and
//! end timestamps. A missing anchor is `MissingAnchor`; the nearest sample is
//! never substituted.

use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::constants::battery::{
    BATTERY_THERMAL_COEFF_V_PER_C, INSTRUMENT_THERMAL_COEFF_V_PER_C, MEASUREMENT_UNCERTAINTY_V,
    MV_PER_SOC_PERCENT, NAMEPLATE_CAPACITY_AH, TEMPERATURE_UNCERTAINTY_C, USABLE_CAPACITY_FRACTION,
};
use crate::constants::time::MV_PER_V;
use crate::errors::{AnalysisError, AnalysisResult};
use crate::time::{hours_between, Timestamp};

/// Percent of a full state of charge
const FULL_SOC_PERCENT: f64 = 100.0;

/// Battery constants used for the voltage to charge conversion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacityModel {
    /// Resting-voltage change per 1% state of charge, in mV
    pub mv_per_soc_percent: f64,
    /// Rated capacity in amp-hours
    pub nameplate_ah: f64,
}

impl Default for CapacityModel {
    fn default() -> Self {
        Self { mv_per_soc_percent: MV_PER_SOC_PERCENT, nameplate_ah: NAMEPLATE_CAPACITY_AH }
    }
}

impl CapacityModel {
    /// Reject non-positive constants
    pub fn validate(&self) -> AnalysisResult<()> {
        if self.mv_per_soc_percent <= 0.0 {
            return Err(AnalysisError::config("mV per %SOC must be positive"));
        }
        if self.nameplate_ah <= 0.0 {
            return Err(AnalysisError::config("nameplate capacity must be positive"));
        }
        Ok(())
    }

    /// Usable amp-hours at a depth-of-discharge fraction
    pub fn usable_ah(&self, fraction: f64) -> f64 {
        self.nameplate_ah * fraction
    }

    fn convert(&self, delta_v: f64, hours: f64) -> (f64, f64, f64) {
        let soc = delta_v * MV_PER_V / self.mv_per_soc_percent;
        let ah = self.nameplate_ah * soc / FULL_SOC_PERCENT;
        let ma = ah * 1000.0 / hours;
        (soc, ah, ma)
    }
}

/// Externally supplied correction assumptions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Corrections {
    /// Known baseline offset added to the raw end voltage (V)
    pub step_offset_v: f64,
    /// Temperature at the start anchor (°C)
    pub start_temp_c: f64,
    /// Temperature at the end anchor (°C)
    pub end_temp_c: f64,
    /// Instrument reading drift per °C (V/°C)
    pub instrument_coeff_v_per_c: f64,
    /// Cell chemistry voltage change per °C (V/°C)
    pub battery_coeff_v_per_c: f64,
    /// Voltage measurement uncertainty (± V)
    pub measurement_uncertainty_v: f64,
    /// Temperature uncertainty (± °C)
    pub temperature_uncertainty_c: f64,
}

impl Default for Corrections {
    fn default() -> Self {
        Self {
            step_offset_v: 0.0,
            start_temp_c: 0.0,
            end_temp_c: 0.0,
            instrument_coeff_v_per_c: INSTRUMENT_THERMAL_COEFF_V_PER_C,
            battery_coeff_v_per_c: BATTERY_THERMAL_COEFF_V_PER_C,
            measurement_uncertainty_v: MEASUREMENT_UNCERTAINTY_V,
            temperature_uncertainty_c: TEMPERATURE_UNCERTAINTY_C,
        }
    }
}

impl Corrections {
    /// No corrections and no uncertainty
    pub fn none() -> Self {
        Self {
            instrument_coeff_v_per_c: 0.0,
            battery_coeff_v_per_c: 0.0,
            measurement_uncertainty_v: 0.0,
            temperature_uncertainty_c: 0.0,
            ..Self::default()
        }
    }

    /// Set the step offset
    pub fn with_step_offset(mut self, offset_v: f64) -> Self {
        self.step_offset_v = offset_v;
        self
    }

    /// Set the anchor temperatures
    pub fn with_temperatures(mut self, start_c: f64, end_c: f64) -> Self {
        self.start_temp_c = start_c;
        self.end_temp_c = end_c;
        self
    }

    /// `end - start` temperature
    pub fn delta_temp_c(&self) -> f64 {
        self.end_temp_c - self.start_temp_c
    }

    fn total_coeff(&self) -> f64 {
        self.instrument_coeff_v_per_c + self.battery_coeff_v_per_c
    }
}

/// Closed interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    /// Lower bound
    pub low: f64,
    /// Upper bound
    pub high: f64,
}

impl Band {
    fn spanning(a: f64, b: f64) -> Self {
        Self { low: a.min(b), high: a.max(b) }
    }
}

/// Result of one capacity estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacityEstimate {
    /// Elapsed hours
    pub duration_hours: f64,
    /// End voltage after the step correction (V)
    pub v_end_corrected: f64,
    /// `v_end_corrected - v_start` (V)
    pub observed_dv: f64,
    /// Observed delta with only the instrument effect removed (V)
    pub instrument_corrected_dv: f64,
    /// Observed delta with both thermal effects removed (V)
    pub corrected_dv: f64,
    /// State of charge change (%)
    pub delta_soc_percent: f64,
    /// State of charge relative to a full start (%)
    pub resulting_soc_percent: f64,
    /// Charge change (Ah, negative = lost)
    pub delta_ah: f64,
    /// Average current (mA, negative = discharge)
    pub current_ma: f64,
    /// Current at the favourable uncertainty extreme (mA)
    pub best_case_ma: f64,
    /// Current at the unfavourable uncertainty extreme (mA)
    pub worst_case_ma: f64,
    /// Half the best/worst spread (± mA)
    pub uncertainty_ma: f64,
    /// `current_ma ± uncertainty_ma`
    pub band: Band,
}

/// Estimate charge loss and average current between two resting voltages
pub fn estimate(
    v_start: f64,
    v_end_raw: f64,
    duration_hours: f64,
    model: &CapacityModel,
    corrections: &Corrections,
) -> AnalysisResult<CapacityEstimate> {
    if duration_hours <= 0.0 {
        return Err(AnalysisError::DivisionByZero { what: "capacity estimate over non-positive duration" });
    }
    model.validate()?;

    let v_end_corrected = v_end_raw + corrections.step_offset_v;
    let observed_dv = v_end_corrected - v_start;

    let d_temp = corrections.delta_temp_c();
    let instrument_effect = corrections.instrument_coeff_v_per_c * d_temp;
    let battery_effect = corrections.battery_coeff_v_per_c * d_temp;
    let instrument_corrected_dv = observed_dv - instrument_effect;
    let corrected_dv = instrument_corrected_dv - battery_effect;

    let (delta_soc_percent, delta_ah, current_ma) = model.convert(corrected_dv, duration_hours);

    let u = corrections.measurement_uncertainty_v;
    let u_t = corrections.temperature_uncertainty_c;
    let k = corrections.total_coeff();
    let best_dv = observed_dv + u - k * (d_temp - u_t);
    let worst_dv = observed_dv - u - k * (d_temp + u_t);
    let (_, _, best_case_ma) = model.convert(best_dv, duration_hours);
    let (_, _, worst_case_ma) = model.convert(worst_dv, duration_hours);
    let uncertainty_ma = (worst_case_ma - best_case_ma).abs() / 2.0;

    Ok(CapacityEstimate {
        duration_hours,
        v_end_corrected,
        observed_dv,
        instrument_corrected_dv,
        corrected_dv,
        delta_soc_percent,
        resulting_soc_percent: FULL_SOC_PERCENT + delta_soc_percent,
        delta_ah,
        current_ma,
        best_case_ma,
        worst_case_ma,
        uncertainty_ma,
        band: Band::spanning(current_ma - uncertainty_ma, current_ma + uncertainty_ma),
    })
}

/// Estimate using the channel's samples at exactly `start` and `end`
pub fn estimate_between(
    channel: &Channel,
    start: Timestamp,
    end: Timestamp,
    model: &CapacityModel,
    corrections: &Corrections,
) -> AnalysisResult<CapacityEstimate> {
    let v_start = channel.anchor(start)?;
    let v_end = channel.anchor(end)?;
    let est = estimate(v_start, v_end, hours_between(start, end), model, corrections)?;
    log::info!(
        "'{}' {} -> {}: {:.1} mA (±{:.1})",
        channel.name(),
        start,
        end,
        est.current_ma,
        est.uncertainty_ma
    );
    Ok(est)
}

/// Hours a standby current takes to drain `usable_ah`
pub fn endurance_hours(usable_ah: f64, current_ma: f64) -> AnalysisResult<f64> {
    if current_ma == 0.0 {
        return Err(AnalysisError::DivisionByZero { what: "endurance at zero current" });
    }
    Ok(usable_ah * 1000.0 / current_ma.abs())
}

/// Default usable capacity of the bank
pub fn default_usable_ah() -> f64 {
    CapacityModel::default().usable_ah(USABLE_CAPACITY_FRACTION)
}

/// Amp-hours moved by `current_ma` over `hours`
pub fn coulomb_loss_ah(current_ma: f64, hours: f64) -> f64 {
    current_ma * hours / 1000.0
}
