//! Analysis Window and Threshold Constants
//!
//! Defaults for the filtering, segmentation, regression and anomaly
//! components. The insufficient-evidence policies live here as well: they
//! decide when a statistic is reported as unavailable instead of as a
//! noise-dominated number.

// ===== FILTERING =====

/// Default time-bucket length for raw high-frequency aggregation (seconds).
pub const DEFAULT_BUCKET_SECS: i64 = 60;

/// Minimum samples for a bucket to enter summary statistics.
///
/// Buckets with three or fewer raw readings are dominated by quantisation.
pub const MIN_BUCKET_SAMPLES: usize = 4;

/// Default fixed-count sliding-average window (samples).
pub const DEFAULT_SLIDING_WINDOW: usize = 60;

// ===== ALIGNMENT =====

/// Default as-of join tolerance (seconds). Hourly feeds align within one hour.
pub const DEFAULT_ALIGNMENT_TOLERANCE_SECS: i64 = 3600;

// ===== SEGMENTATION =====

/// Samples averaged at each end of a phase for its drift figure.
pub const PHASE_EDGE_SAMPLES: usize = 24;

/// Window either side of a device-setting change for step-shift measurement (hours).
pub const STEP_SHIFT_WINDOW_HOURS: i64 = 24;

// ===== REGRESSION =====

/// Rolling regression window (samples): seven days of hourly data.
pub const ROLLING_WINDOW_SAMPLES: usize = 24 * 7;

/// Minimum aligned points before a thermal coefficient is reported.
pub const MIN_COEFFICIENT_POINTS: usize = 10;

/// Minimum samples in a calendar window before its trend is reported.
pub const MIN_WINDOW_TREND_SAMPLES: usize = 48;

// ===== ANOMALY DETECTION =====

/// σ-multiplier for statistical-bound scans.
pub const DEFAULT_SIGMA_MULTIPLIER: f64 = 2.0;

/// Min-voltage dip threshold (V).
pub const VOLTAGE_DIP_THRESHOLD_V: f64 = 13.20;

/// Hourly spread threshold (V).
pub const HIGH_SPREAD_THRESHOLD_V: f64 = 0.060;

/// Hour-to-hour drop in Min voltage considered sudden (V).
pub const SUDDEN_DROP_THRESHOLD_V: f64 = 0.030;

/// Largest gap between samples still compared by the sudden-drop scan (seconds).
pub const SUDDEN_DROP_MAX_GAP_SECS: i64 = 3600;

// ===== DIVERGENCE =====

/// |correlation| above which a confound is considered to explain the behaviour.
pub const CONFOUND_CORRELATION_THRESHOLD: f64 = 0.3;

/// Significance level for the same-band comparison.
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Minimum group size for each side of the same-band comparison.
pub const MIN_COMPARISON_GROUP: usize = 10;

/// Voltage band for the same-band spread comparison (V, inclusive).
pub const DIVERGENCE_BAND_V: (f64, f64) = (13.20, 13.30);

/// Voltage band edges for the spread-by-voltage table (V).
pub const SPREAD_BAND_EDGES_V: [f64; 8] = [12.5, 13.0, 13.2, 13.3, 13.4, 13.5, 14.0, 15.0];

// ===== DIURNAL =====

/// Clock hours treated as daytime for the diurnal swing.
pub const DAY_HOURS: [u32; 5] = [10, 11, 12, 13, 14];

/// Clock hours treated as night for the diurnal swing.
pub const NIGHT_HOURS: [u32; 7] = [22, 23, 0, 1, 2, 3, 4];
