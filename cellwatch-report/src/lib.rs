//! Configuration, Pipeline Runner and Structured Reports
//!
//! ## Overview
//!
//! `cellwatch-core` provides the analytical components as independent,
//! individually testable functions. This crate wires them together for one
//! analysis run:
//!
//! 1. **Configuration** ([`config`]): every tunable the core accepts, loaded
//!    from JSON with defaults that reproduce the reference deployment
//! 2. **Sources** ([`sources`]): which file feeds which channels, and the
//!    ingestion specs for the standard exports
//! 3. **Pipeline** ([`pipeline`]): runs every component in dependency order
//! 4. **Report** ([`report`]): plain tables, scalar findings, anomaly events
//!    and the list of quantities that could not be computed
//!
//! ## Failure Policy
//!
//! Loading is all-or-nothing: a parse failure in any source aborts the run
//! before analysis starts. Once the dataset exists, nothing aborts. Every
//! statistic that fails is recorded as an [`report::Unavailable`] entry with
//! its error kind and reason.
//!
//! ```no_run
//! use cellwatch_report::{config::AnalysisConfig, pipeline, sources};
//!
//! let config = AnalysisConfig::from_path("analysis.json")?;
//! let dataset = sources::load_dataset(&[sources::DataSource::hourly_voltage("combined_output.csv")])?;
//! let report = pipeline::run(&dataset, &config);
//! println!("{}", report.to_json_pretty()?);
//! # Ok::<(), cellwatch_report::ReportError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use thiserror::Error;

use cellwatch_core::AnalysisError;

pub mod config;
pub mod pipeline;
pub mod report;
pub mod sources;

// Public API
pub use config::AnalysisConfig;
pub use pipeline::run;
pub use report::{Finding, Report, SummaryTable, Unavailable};
pub use sources::{load_dataset, DataSource};

/// Result type for report operations
pub type ReportResult<T> = Result<T, ReportError>;

/// Errors at the orchestration boundary
#[derive(Error, Debug)]
pub enum ReportError {
    /// Failure raised by an analysis component or by validation
    #[error("Analysis error: {0}")]
    Core(#[from] AnalysisError),

    /// Configuration document could not be parsed, or report serialisation failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn core_errors_convert() {
        let err: ReportError = AnalysisError::DivisionByZero { what: "rate" }.into();
        assert!(matches!(err, ReportError::Core(AnalysisError::DivisionByZero { .. })));
    }
}
