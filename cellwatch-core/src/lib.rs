//! Core analysis engine for CellWatch
//!
//! Temporal correlation and drift estimation over captured battery
//! telemetry from a 12V LiFePO4 bank: voltage min/max, temperature,
//! humidity and raw high-frequency voltage.
//!
//! Key constraints:
//! - Static, captured datasets only; no live feed
//! - Channels are immutable once ingested; every stage returns new values
//! - Absent results are first-class: a statistic without evidence is an
//!   `Err`, never a zero
//!
//! Data flows strictly downward:
//!
//! ```text
//! ingest -> align -> filter / phase -> regression -> capacity
//!                                   \-----------------------> anomaly
//! ```
//!
//! ```no_run
//! use cellwatch_core::capacity::{estimate, CapacityModel, Corrections};
//!
//! let est = estimate(13.300, 13.210, 1320.0, &CapacityModel::default(), &Corrections::none())?;
//! println!("{:.1} mA", est.current_ma);
//! # Ok::<(), cellwatch_core::AnalysisError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod align;
pub mod anomaly;
pub mod capacity;
pub mod channel;
pub mod constants;
pub mod errors;
pub mod filter;
pub mod ingest;
pub mod phase;
pub mod regression;
pub mod stats;
pub mod table;
pub mod time;

// Public API
pub use errors::{AnalysisError, AnalysisResult};
pub use channel::{Channel, ChannelView, Dataset, Sample};
pub use time::Timestamp;
pub use align::{AlignedRecord, Alignment};
pub use filter::{BucketTable, NoiseProfile, WindowStat};
pub use phase::{Phase, PhasePlan, PhaseStats};
pub use regression::{DriftEstimate, LinearTrend, XAxis};
pub use capacity::{CapacityEstimate, CapacityModel, Corrections};
pub use anomaly::{AnomalyEvent, AnomalyKind, Verdict};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
