//! Analysis configuration
//!
//! Every tunable the core accepts as an explicit parameter, grouped by
//! component. Each field falls back to the documented constant in
//! `cellwatch_core::constants`, so an empty JSON object is a valid
//! configuration. Dataset-specific values (phase boundaries, capacity
//! anchors, the step event, divergence periods) have no defaults; the
//! quantities depending on them are reported as unavailable when absent.

use std::path::Path;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use cellwatch_core::anomaly::{DivergenceConfig, Period};
use cellwatch_core::capacity::{CapacityModel, Corrections};
use cellwatch_core::constants::{analysis, battery, time};
use cellwatch_core::phase::{PhaseBoundary, PhasePlan};
use cellwatch_core::{AnalysisError, Timestamp};

use crate::ReportResult;

/// Complete configuration of one analysis run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Bucketing and moving-average parameters
    #[serde(default)]
    pub filtering: FilteringConfig,
    /// Cross-channel alignment parameters
    #[serde(default)]
    pub alignment: AlignmentConfig,
    /// Phase boundaries and segmentation parameters
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    /// Drift regression parameters
    #[serde(default)]
    pub regression: RegressionConfig,
    /// Battery constants, corrections and anchors
    #[serde(default)]
    pub capacity: CapacityConfig,
    /// Threshold and statistical anomaly rules
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    /// Spread/voltage divergence disambiguation
    #[serde(default)]
    pub divergence: DivergenceSettings,
}

impl AnalysisConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> ReportResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> ReportResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject out-of-domain values
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let f = &self.filtering;
        positive(f.bucket_secs, "bucket length")?;
        positive(f.summary_bucket_secs, "summary bucket length")?;
        if f.summary_bucket_secs < f.bucket_secs {
            return Err(invalid("summary bucket must not be shorter than the bucket length"));
        }
        non_zero(f.sliding_window, "sliding window")?;
        non_zero(f.min_bucket_samples, "minimum bucket samples")?;

        if self.alignment.tolerance_secs < 0 {
            return Err(invalid("alignment tolerance must not be negative"));
        }

        let s = &self.segmentation;
        if !s.phases.is_empty() {
            PhasePlan::new(s.phases.clone())?;
        }
        non_zero(s.edge_samples, "phase edge window")?;
        positive(s.step_window_hours, "step shift window")?;
        if let Some(days) = &s.drift_days {
            if days.to <= days.from {
                return Err(invalid("drift days must be in increasing order"));
            }
        }

        let r = &self.regression;
        if r.rolling_window < 2 {
            return Err(invalid("rolling window must hold at least 2 samples"));
        }
        positive(r.trend_window_days, "trend window")?;

        self.capacity.model().validate()?;
        let c = &self.capacity;
        if !(c.usable_fraction > 0.0 && c.usable_fraction <= 1.0) {
            return Err(invalid("usable fraction must be in (0, 1]"));
        }
        if c.measurement_uncertainty_v < 0.0 || c.temperature_uncertainty_c < 0.0 {
            return Err(invalid("uncertainties must not be negative"));
        }
        if let Some(anchors) = &c.anchors {
            if anchors.end <= anchors.start {
                return Err(invalid("capacity end anchor must follow the start anchor"));
            }
        }

        let a = &self.anomaly;
        if a.sigma_multiplier <= 0.0 {
            return Err(invalid("sigma multiplier must be positive"));
        }
        if a.spread_band_edges.len() < 2 || a.spread_band_edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(invalid("spread band edges must be at least two strictly increasing values"));
        }
        if a.day_hours.iter().chain(&a.night_hours).any(|h| *h > 23) {
            return Err(invalid("clock hours must be within 0-23"));
        }

        let d = &self.divergence;
        if d.band_high < d.band_low {
            return Err(invalid("divergence band is inverted"));
        }
        if !(d.alpha > 0.0 && d.alpha < 1.0) {
            return Err(invalid("significance level must be in (0, 1)"));
        }
        for period in [&d.reference, &d.early, &d.late].into_iter().flatten() {
            if period.end <= period.start {
                return Err(invalid("divergence period must have positive length"));
            }
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> AnalysisError {
    AnalysisError::InvalidConfig { reason: reason.to_string() }
}

fn positive(value: i64, what: &str) -> Result<(), AnalysisError> {
    if value <= 0 {
        return Err(invalid(&format!("{what} must be positive")));
    }
    Ok(())
}

fn non_zero(value: usize, what: &str) -> Result<(), AnalysisError> {
    if value == 0 {
        return Err(invalid(&format!("{what} must not be zero")));
    }
    Ok(())
}

/// Bucketing and moving-average parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteringConfig {
    /// Raw-data bucket length in seconds
    #[serde(default = "default_bucket_secs")]
    pub bucket_secs: i64,
    /// Coarser bucket for the summary table (daily by default)
    #[serde(default = "default_summary_bucket_secs")]
    pub summary_bucket_secs: i64,
    /// Samples a bucket needs before it counts
    #[serde(default = "default_min_bucket_samples")]
    pub min_bucket_samples: usize,
    /// Sliding moving-average window, in samples
    #[serde(default = "default_sliding_window")]
    pub sliding_window: usize,
}

fn default_bucket_secs() -> i64 {
    analysis::DEFAULT_BUCKET_SECS
}

fn default_summary_bucket_secs() -> i64 {
    time::SECONDS_PER_DAY
}

fn default_min_bucket_samples() -> usize {
    analysis::MIN_BUCKET_SAMPLES
}

fn default_sliding_window() -> usize {
    analysis::DEFAULT_SLIDING_WINDOW
}

impl Default for FilteringConfig {
    fn default() -> Self {
        Self {
            bucket_secs: default_bucket_secs(),
            summary_bucket_secs: default_summary_bucket_secs(),
            min_bucket_samples: default_min_bucket_samples(),
            sliding_window: default_sliding_window(),
        }
    }
}

impl FilteringConfig {
    /// Bucket length as a duration
    pub fn bucket(&self) -> Duration {
        Duration::seconds(self.bucket_secs)
    }

    /// Summary bucket length as a duration
    pub fn summary_bucket(&self) -> Duration {
        Duration::seconds(self.summary_bucket_secs)
    }
}

/// Cross-channel alignment parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// Maximum as-of lookback in seconds
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: i64,
    /// Complete pairs needed before a coefficient is reported
    #[serde(default = "default_min_coefficient_points")]
    pub min_coefficient_points: usize,
    /// The temperature feed is logged in °F
    #[serde(default = "default_true")]
    pub temperature_in_fahrenheit: bool,
}

fn default_tolerance_secs() -> i64 {
    analysis::DEFAULT_ALIGNMENT_TOLERANCE_SECS
}

fn default_min_coefficient_points() -> usize {
    analysis::MIN_COEFFICIENT_POINTS
}

fn default_true() -> bool {
    true
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            tolerance_secs: default_tolerance_secs(),
            min_coefficient_points: default_min_coefficient_points(),
            temperature_in_fahrenheit: true,
        }
    }
}

impl AlignmentConfig {
    /// Tolerance as a duration
    pub fn tolerance(&self) -> Duration {
        Duration::seconds(self.tolerance_secs)
    }
}

/// Pair of calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRange {
    /// Earlier day
    pub from: NaiveDate,
    /// Later day
    pub to: NaiveDate,
}

/// Phase boundaries and segmentation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// Named phase starts, strictly increasing
    #[serde(default)]
    pub phases: Vec<PhaseBoundary>,
    /// Samples averaged at each phase edge
    #[serde(default = "default_edge_samples")]
    pub edge_samples: usize,
    /// Device-setting change whose baseline offset is measured
    #[serde(default)]
    pub step_event: Option<Timestamp>,
    /// Hours either side of the step event
    #[serde(default = "default_step_window_hours")]
    pub step_window_hours: i64,
    /// Days compared for the calendar-day drift rate
    #[serde(default)]
    pub drift_days: Option<DayRange>,
}

fn default_edge_samples() -> usize {
    analysis::PHASE_EDGE_SAMPLES
}

fn default_step_window_hours() -> i64 {
    analysis::STEP_SHIFT_WINDOW_HOURS
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            phases: Vec::new(),
            edge_samples: default_edge_samples(),
            step_event: None,
            step_window_hours: default_step_window_hours(),
            drift_days: None,
        }
    }
}

impl SegmentationConfig {
    /// Step shift window as a duration
    pub fn step_window(&self) -> Duration {
        Duration::hours(self.step_window_hours)
    }
}

/// Drift regression parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionConfig {
    /// Rolling regression window, in samples
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,
    /// Calendar window length for windowed trends, in days
    #[serde(default = "default_trend_window_days")]
    pub trend_window_days: i64,
    /// Samples a calendar window needs before it is fitted
    #[serde(default = "default_min_window_samples")]
    pub min_window_samples: usize,
}

fn default_rolling_window() -> usize {
    analysis::ROLLING_WINDOW_SAMPLES
}

fn default_trend_window_days() -> i64 {
    7
}

fn default_min_window_samples() -> usize {
    analysis::MIN_WINDOW_TREND_SAMPLES
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            rolling_window: default_rolling_window(),
            trend_window_days: default_trend_window_days(),
            min_window_samples: default_min_window_samples(),
        }
    }
}

impl RegressionConfig {
    /// Calendar window as a duration
    pub fn trend_window(&self) -> Duration {
        Duration::days(self.trend_window_days)
    }
}

/// Resting-voltage anchors of a capacity estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacityAnchors {
    /// Start anchor; a sample must exist at exactly this instant
    pub start: Timestamp,
    /// End anchor; a sample must exist at exactly this instant
    pub end: Timestamp,
    /// Temperature at the start anchor (°C); looked up when absent
    #[serde(default)]
    pub start_temp_c: Option<f64>,
    /// Temperature at the end anchor (°C); looked up when absent
    #[serde(default)]
    pub end_temp_c: Option<f64>,
}

/// Battery constants, corrections and anchors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Resting-voltage change per 1% SOC (mV)
    #[serde(default = "default_mv_per_soc")]
    pub mv_per_soc_percent: f64,
    /// Rated capacity (Ah)
    #[serde(default = "default_nameplate_ah")]
    pub nameplate_ah: f64,
    /// Fraction of nameplate usable for endurance projections
    #[serde(default = "default_usable_fraction")]
    pub usable_fraction: f64,
    /// Instrument reading drift (V/°C)
    #[serde(default = "default_instrument_coeff")]
    pub instrument_coeff_v_per_c: f64,
    /// Cell chemistry voltage change (V/°C)
    #[serde(default = "default_battery_coeff")]
    pub battery_coeff_v_per_c: f64,
    /// Voltage measurement uncertainty (± V)
    #[serde(default = "default_measurement_uncertainty")]
    pub measurement_uncertainty_v: f64,
    /// Temperature uncertainty (± °C)
    #[serde(default = "default_temperature_uncertainty")]
    pub temperature_uncertainty_c: f64,
    /// Known step offset (V); the measured step shift is used when absent
    #[serde(default)]
    pub step_offset_v: Option<f64>,
    /// Estimate anchors
    #[serde(default)]
    pub anchors: Option<CapacityAnchors>,
}

fn default_mv_per_soc() -> f64 {
    battery::MV_PER_SOC_PERCENT
}

fn default_nameplate_ah() -> f64 {
    battery::NAMEPLATE_CAPACITY_AH
}

fn default_usable_fraction() -> f64 {
    battery::USABLE_CAPACITY_FRACTION
}

fn default_instrument_coeff() -> f64 {
    battery::INSTRUMENT_THERMAL_COEFF_V_PER_C
}

fn default_battery_coeff() -> f64 {
    battery::BATTERY_THERMAL_COEFF_V_PER_C
}

fn default_measurement_uncertainty() -> f64 {
    battery::MEASUREMENT_UNCERTAINTY_V
}

fn default_temperature_uncertainty() -> f64 {
    battery::TEMPERATURE_UNCERTAINTY_C
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            mv_per_soc_percent: default_mv_per_soc(),
            nameplate_ah: default_nameplate_ah(),
            usable_fraction: default_usable_fraction(),
            instrument_coeff_v_per_c: default_instrument_coeff(),
            battery_coeff_v_per_c: default_battery_coeff(),
            measurement_uncertainty_v: default_measurement_uncertainty(),
            temperature_uncertainty_c: default_temperature_uncertainty(),
            step_offset_v: None,
            anchors: None,
        }
    }
}

impl CapacityConfig {
    /// Conversion constants
    pub fn model(&self) -> CapacityModel {
        CapacityModel { mv_per_soc_percent: self.mv_per_soc_percent, nameplate_ah: self.nameplate_ah }
    }

    /// Coefficients and uncertainties, with no offset and equal temperatures
    pub fn corrections(&self) -> Corrections {
        Corrections {
            instrument_coeff_v_per_c: self.instrument_coeff_v_per_c,
            battery_coeff_v_per_c: self.battery_coeff_v_per_c,
            measurement_uncertainty_v: self.measurement_uncertainty_v,
            temperature_uncertainty_c: self.temperature_uncertainty_c,
            ..Corrections::none()
        }
    }
}

/// Threshold and statistical anomaly rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Minimum voltage below which a sample is a dip (V)
    #[serde(default = "default_dip")]
    pub voltage_dip_v: f64,
    /// Spread above which a sample is flagged (V)
    #[serde(default = "default_high_spread")]
    pub high_spread_v: f64,
    /// Consecutive-sample drop that is flagged (V)
    #[serde(default = "default_sudden_drop")]
    pub sudden_drop_v: f64,
    /// Gaps longer than this are not compared (s)
    #[serde(default = "default_sudden_drop_gap")]
    pub sudden_drop_max_gap_secs: i64,
    /// k in `mean ± kσ`
    #[serde(default = "default_sigma")]
    pub sigma_multiplier: f64,
    /// Phase whose statistics bound the outlier scan; the first phase when absent
    #[serde(default)]
    pub reference_phase: Option<String>,
    /// Voltage band edges for the spread-by-band table (V)
    #[serde(default = "default_band_edges")]
    pub spread_band_edges: Vec<f64>,
    /// Clock hours averaged as daytime
    #[serde(default = "default_day_hours")]
    pub day_hours: Vec<u32>,
    /// Clock hours averaged as night
    #[serde(default = "default_night_hours")]
    pub night_hours: Vec<u32>,
}

fn default_dip() -> f64 {
    analysis::VOLTAGE_DIP_THRESHOLD_V
}

fn default_high_spread() -> f64 {
    analysis::HIGH_SPREAD_THRESHOLD_V
}

fn default_sudden_drop() -> f64 {
    analysis::SUDDEN_DROP_THRESHOLD_V
}

fn default_sudden_drop_gap() -> i64 {
    analysis::SUDDEN_DROP_MAX_GAP_SECS
}

fn default_sigma() -> f64 {
    analysis::DEFAULT_SIGMA_MULTIPLIER
}

fn default_band_edges() -> Vec<f64> {
    analysis::SPREAD_BAND_EDGES_V.to_vec()
}

fn default_day_hours() -> Vec<u32> {
    analysis::DAY_HOURS.to_vec()
}

fn default_night_hours() -> Vec<u32> {
    analysis::NIGHT_HOURS.to_vec()
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            voltage_dip_v: default_dip(),
            high_spread_v: default_high_spread(),
            sudden_drop_v: default_sudden_drop(),
            sudden_drop_max_gap_secs: default_sudden_drop_gap(),
            sigma_multiplier: default_sigma(),
            reference_phase: None,
            spread_band_edges: default_band_edges(),
            day_hours: default_day_hours(),
            night_hours: default_night_hours(),
        }
    }
}

/// Spread/voltage divergence disambiguation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceSettings {
    /// `|r|` above which voltage level explains the spread
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,
    /// Significance level of the same-band test
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Minimum samples per comparison group
    #[serde(default = "default_min_group")]
    pub min_group: usize,
    /// Lower edge of the comparison voltage band (V)
    #[serde(default = "default_band_low")]
    pub band_low: f64,
    /// Upper edge of the comparison voltage band (V)
    #[serde(default = "default_band_high")]
    pub band_high: f64,
    /// Correlation period; the whole dataset when absent
    #[serde(default)]
    pub reference: Option<Period>,
    /// Earlier comparison period
    #[serde(default)]
    pub early: Option<Period>,
    /// Later comparison period
    #[serde(default)]
    pub late: Option<Period>,
}

fn default_correlation_threshold() -> f64 {
    analysis::CONFOUND_CORRELATION_THRESHOLD
}

fn default_alpha() -> f64 {
    analysis::SIGNIFICANCE_LEVEL
}

fn default_min_group() -> usize {
    analysis::MIN_COMPARISON_GROUP
}

fn default_band_low() -> f64 {
    analysis::DIVERGENCE_BAND_V.0
}

fn default_band_high() -> f64 {
    analysis::DIVERGENCE_BAND_V.1
}

impl Default for DivergenceSettings {
    fn default() -> Self {
        Self {
            correlation_threshold: default_correlation_threshold(),
            alpha: default_alpha(),
            min_group: default_min_group(),
            band_low: default_band_low(),
            band_high: default_band_high(),
            reference: None,
            early: None,
            late: None,
        }
    }
}

impl DivergenceSettings {
    /// Core parameters, or `None` without both comparison periods
    ///
    /// `data_span` stands in for the reference period when none is configured.
    pub fn resolve(&self, data_span: Period) -> Option<DivergenceConfig> {
        Some(DivergenceConfig {
            reference: self.reference.unwrap_or(data_span),
            early: self.early?,
            late: self.late?,
            band_low: self.band_low,
            band_high: self.band_high,
            correlation_threshold: self.correlation_threshold,
            alpha: self.alpha,
            min_group: self.min_group,
        })
    }
}
