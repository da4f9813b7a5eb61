//! Error Types for Telemetry Analysis Failures
//!
//! ## Design Philosophy
//!
//! CellWatch analyses a static, captured dataset. A failure is rarely fatal for
//! the whole run: most failures concern one statistic over one slice of data,
//! and the rest of the pipeline should still report what it could compute.
//!
//! 1. **Scoped Failures**: Every statistical operation returns
//!    `AnalysisResult<T>`. An `Err` means "no result for this slice", never a
//!    zero or a placeholder number.
//!
//! 2. **Actionable Information**: Each error carries enough context (row index,
//!    anchor timestamp, required vs. available sample counts) to tell the
//!    engineer exactly which quantity could not be computed and why.
//!
//! 3. **Fatal vs. Local**: `is_fatal()` separates ingestion failures, which
//!    abort the run so no partial garbage dataset is analysed, from local
//!    failures that are reported as absent results.
//!
//! ## Error Categories
//!
//! ### Ingestion (fatal)
//! - `ParseFailure`: Malformed timestamp or structurally broken row
//! - `Io`: The source could not be read at all
//!
//! ### Evidence (local)
//! - `InsufficientData`: Fewer samples than the operation requires
//! - `EmptyPhase`: A phase window contains no samples (zero coverage)
//!
//! ### Anchoring and Rates (local, fatal for that calculation)
//! - `MissingAnchor`: No sample at the exact timestamp an estimate requires
//! - `DivisionByZero`: Zero duration or zero rate in a rate computation
//! - `DegenerateWindow`: Zero-length or zero-variance input
//!
//! ### Caller Mistakes
//! - `InvalidConfig`: Out-of-domain configuration value
//! - `LengthMismatch`: Paired inputs of different lengths
//!
//! ## Error Handling Strategy
//!
//! ```rust
//! use cellwatch_core::{AnalysisError, regression::linear_trend};
//!
//! match linear_trend(&[1.0], &[2.0]) {
//!     Ok(trend) => println!("slope = {}", trend.slope),
//!     Err(AnalysisError::InsufficientData { required, available, .. }) => {
//!         // Report the slope as unavailable, do not coerce it to zero
//!         assert_eq!((required, available), (2, 1));
//!     }
//!     Err(e) => panic!("unexpected: {e}"),
//! }
//! ```

use chrono::NaiveDateTime;
use thiserror::Error;

/// Result type for analysis operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Analysis errors, following the fatal/local taxonomy of the pipeline
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Malformed timestamp or structurally broken row; aborts ingestion of the source
    #[error("Parse failure at row {row}: {reason}")]
    ParseFailure {
        /// Zero-based data row index (header excluded)
        row: usize,
        /// What could not be parsed
        reason: String,
    },

    /// Source could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Not enough samples for the requested statistic
    #[error("Insufficient data for {what}: need {required}, have {available}")]
    InsufficientData {
        /// Name of the statistic or slice
        what: &'static str,
        /// Minimum number of samples needed
        required: usize,
        /// Actual number of samples available
        available: usize,
    },

    /// A phase window has zero coverage
    #[error("Phase '{phase}' contains no samples")]
    EmptyPhase {
        /// Phase name
        phase: String,
    },

    /// No sample exists at the exact timestamp an estimate is anchored on
    #[error("No sample at anchor timestamp {timestamp}")]
    MissingAnchor {
        /// Requested anchor
        timestamp: NaiveDateTime,
    },

    /// Rate computation over a zero (or negative) denominator
    #[error("Division by zero in {what}")]
    DivisionByZero {
        /// Which rate was being computed
        what: &'static str,
    },

    /// Zero-length window or zero-variance regressor
    #[error("Degenerate window: {what}")]
    DegenerateWindow {
        /// What made the window unusable
        what: &'static str,
    },

    /// Configuration value outside its domain
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Which constraint was violated
        reason: String,
    },

    /// Paired inputs of different lengths
    #[error("Length mismatch: {left} vs {right}")]
    LengthMismatch {
        /// Length of the first input
        left: usize,
        /// Length of the second input
        right: usize,
    },
}

impl AnalysisError {
    /// Short machine-readable category, used in reports
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ParseFailure { .. } => "parse_failure",
            Self::Io(_) => "io",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::EmptyPhase { .. } => "empty_phase",
            Self::MissingAnchor { .. } => "missing_anchor",
            Self::DivisionByZero { .. } => "division_by_zero",
            Self::DegenerateWindow { .. } => "degenerate_window",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::LengthMismatch { .. } => "length_mismatch",
        }
    }

    /// Whether this failure must abort the whole run
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ParseFailure { .. } | Self::Io(_))
    }

    pub(crate) fn insufficient(what: &'static str, required: usize, available: usize) -> Self {
        Self::InsufficientData { what, required, available }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig { reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_only_for_ingestion() {
        let parse = AnalysisError::ParseFailure { row: 3, reason: "bad timestamp".into() };
        assert!(parse.is_fatal());
        assert_eq!(parse.kind(), "parse_failure");

        let local = AnalysisError::insufficient("regression", 2, 1);
        assert!(!local.is_fatal());
        assert_eq!(local.to_string(), "Insufficient data for regression: need 2, have 1");
    }
}
