//! Time-series ingestion and normalisation
//!
//! ## Overview
//!
//! Turns a [`RawTable`] into one [`Channel`] per logical signal according to
//! an [`IngestSpec`]. Ingestion is the only stage allowed to abort a run:
//!
//! - A timestamp that does not parse, or a row too short to hold the
//!   referenced columns, is a `ParseFailure` carrying the data row index
//! - A value that does not parse is *cleaning*, not failure: the row is
//!   dropped from that channel and counted in the [`IngestReport`]
//!
//! Placeholder states exported by the monitoring device (`unavailable`,
//! `unknown`, empty cells) are counted separately from genuinely malformed
//! numbers so the report distinguishes sensor dropouts from corrupt data.
//!
//! ## Derived Fields
//!
//! `Midpoint(a, b)` and `Spread(a, b)` are computed once, here, from the raw
//! columns. Downstream components never see the raw min/max pairs again
//! unless they ingest them as channels of their own.
//!
//! ## Example
//!
//! ```rust
//! use std::io::Cursor;
//! use cellwatch_core::ingest::{ingest, ChannelSpec, IngestSpec, TimestampSpec};
//! use cellwatch_core::table::RawTable;
//!
//! let csv = "Date,Time,Min,Max\n26/12/2025,14:00,13.28,13.31\n26/12/2025,15:00,unavailable,13.30\n";
//! let table = RawTable::from_reader(Cursor::new(csv)).unwrap();
//! let spec = IngestSpec::new(TimestampSpec::combined("Date", "Time", "%d/%m/%Y %H:%M"))
//!     .channel(ChannelSpec::midpoint("voltage_mid", "Min", "Max"))
//!     .channel(ChannelSpec::column("voltage_max", "Max"));
//!
//! let out = ingest(&table, &spec).unwrap();
//! assert_eq!(out.channels[0].len(), 1);
//! assert_eq!(out.channels[1].len(), 2);
//! assert_eq!(out.report.channel("voltage_mid").unwrap().placeholders, 1);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::channel::{Channel, Sample};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::table::RawTable;
use crate::time::{Timestamp, TimestampFormat};

/// Placeholder markers recognised by default (compared case-insensitively)
pub const DEFAULT_PLACEHOLDERS: &[&str] = &["unavailable", "unknown", ""];

/// Where the timestamp of a row comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimestampColumns {
    /// Separate date and time columns, joined with a single space
    Combined {
        /// Date column header
        date: String,
        /// Time column header
        time: String,
    },
    /// One column holding the full timestamp
    Single {
        /// Timestamp column header
        column: String,
    },
}

/// Timestamp columns plus their format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampSpec {
    /// Source columns
    pub columns: TimestampColumns,
    /// Interpretation of the (joined) string
    pub format: TimestampFormat,
}

impl TimestampSpec {
    /// Split date + time columns parsed with a `chrono` pattern
    pub fn combined(date: &str, time: &str, pattern: &str) -> Self {
        Self {
            columns: TimestampColumns::Combined { date: date.into(), time: time.into() },
            format: TimestampFormat::pattern(pattern),
        }
    }

    /// Single ISO-8601 column, optionally normalised to UTC
    pub fn iso8601(column: &str, normalize_to_utc: bool) -> Self {
        Self {
            columns: TimestampColumns::Single { column: column.into() },
            format: TimestampFormat::Iso8601 { normalize_to_utc },
        }
    }

    /// Single column parsed with a `chrono` pattern
    pub fn single(column: &str, pattern: &str) -> Self {
        Self {
            columns: TimestampColumns::Single { column: column.into() },
            format: TimestampFormat::pattern(pattern),
        }
    }
}

/// How a channel's value is obtained from a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueSource {
    /// A single numeric column
    Column {
        /// Column header
        column: String,
    },
    /// `(a + b) / 2`
    Midpoint {
        /// Lower column
        low: String,
        /// Upper column
        high: String,
    },
    /// `high - low`
    Spread {
        /// Lower column
        low: String,
        /// Upper column
        high: String,
    },
}

impl ValueSource {
    fn columns(&self) -> Vec<&str> {
        match self {
            Self::Column { column } => vec![column.as_str()],
            Self::Midpoint { low, high } | Self::Spread { low, high } => vec![low.as_str(), high.as_str()],
        }
    }

    fn combine(&self, values: &[f64]) -> f64 {
        match (self, values) {
            (Self::Column { .. }, [v, ..]) => *v,
            (Self::Midpoint { .. }, [lo, hi, ..]) => (lo + hi) / 2.0,
            (Self::Spread { .. }, [lo, hi, ..]) => hi - lo,
            _ => f64::NAN,
        }
    }
}

/// One output channel of an ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Output channel name
    pub name: String,
    /// Value derivation
    pub source: ValueSource,
    /// Collapse duplicate timestamps to their first occurrence
    #[serde(default)]
    pub unique: bool,
    /// Keep only readings written with at most this many decimal places
    #[serde(default)]
    pub max_decimals: Option<usize>,
}

impl ChannelSpec {
    /// Channel read straight from one column
    pub fn column(name: &str, column: &str) -> Self {
        Self::with_source(name, ValueSource::Column { column: column.into() })
    }

    /// Midpoint of two columns
    pub fn midpoint(name: &str, low: &str, high: &str) -> Self {
        Self::with_source(name, ValueSource::Midpoint { low: low.into(), high: high.into() })
    }

    /// Difference of two columns
    pub fn spread(name: &str, low: &str, high: &str) -> Self {
        Self::with_source(name, ValueSource::Spread { low: low.into(), high: high.into() })
    }

    fn with_source(name: &str, source: ValueSource) -> Self {
        Self { name: name.into(), source, unique: false, max_decimals: None }
    }

    /// Require unique timestamps
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set the decimal-precision filter
    pub fn max_decimals(mut self, decimals: usize) -> Self {
        self.max_decimals = Some(decimals);
        self
    }
}

/// Full description of how to ingest one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestSpec {
    /// Timestamp source
    pub timestamp: TimestampSpec,
    /// Output channels
    pub channels: Vec<ChannelSpec>,
    /// Placeholder markers, compared case-insensitively after trimming
    #[serde(default = "default_placeholders")]
    pub placeholders: Vec<String>,
}

fn default_placeholders() -> Vec<String> {
    DEFAULT_PLACEHOLDERS.iter().map(|s| s.to_string()).collect()
}

impl IngestSpec {
    /// Spec with no channels and the default placeholders
    pub fn new(timestamp: TimestampSpec) -> Self {
        Self { timestamp, channels: Vec::new(), placeholders: default_placeholders() }
    }

    /// Add an output channel
    pub fn channel(mut self, channel: ChannelSpec) -> Self {
        self.channels.push(channel);
        self
    }

    /// Replace the placeholder markers
    pub fn with_placeholders(mut self, placeholders: &[&str]) -> Self {
        self.placeholders = placeholders.iter().map(|s| s.to_string()).collect();
        self
    }

    fn is_placeholder(&self, cell: &str) -> bool {
        let cell = cell.trim();
        self.placeholders.iter().any(|p| p.eq_ignore_ascii_case(cell))
    }
}

/// Per-channel cleaning counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelIngestStats {
    /// Samples kept
    pub kept: usize,
    /// Rows dropped because a source cell held a placeholder state
    pub placeholders: usize,
    /// Rows dropped because a source cell was not a finite number
    pub unparseable: usize,
    /// Rows dropped by the decimal-precision filter
    pub precision_filtered: usize,
    /// Rows collapsed by the uniqueness requirement
    pub duplicates_collapsed: usize,
}

impl ChannelIngestStats {
    /// Total rows dropped for this channel
    pub fn dropped(&self) -> usize {
        self.placeholders + self.unparseable + self.precision_filtered + self.duplicates_collapsed
    }
}

/// What ingestion kept and discarded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Data rows in the source table
    pub rows_total: usize,
    /// Cleaning counts per output channel
    pub channels: BTreeMap<String, ChannelIngestStats>,
}

impl IngestReport {
    /// Counts for one channel
    pub fn channel(&self, name: &str) -> Option<&ChannelIngestStats> {
        self.channels.get(name)
    }
}

/// Channels produced by one ingestion, in spec order
#[derive(Debug, Clone)]
pub struct Ingested {
    /// Output channels
    pub channels: Vec<Channel>,
    /// Cleaning report
    pub report: IngestReport,
}

enum Cell {
    Value(f64),
    Placeholder,
    Unparseable,
    TooPrecise,
}

/// Ingest a table according to `spec`
pub fn ingest(table: &RawTable, spec: &IngestSpec) -> AnalysisResult<Ingested> {
    let timestamp_idx = resolve_timestamp_columns(table, &spec.timestamp.columns)?;
    let value_idx = spec
        .channels
        .iter()
        .map(|ch| ch.source.columns().into_iter().map(|c| require_column(table, c)).collect())
        .collect::<AnalysisResult<Vec<Vec<usize>>>>()?;

    let mut samples: Vec<Vec<Sample>> = vec![Vec::new(); spec.channels.len()];
    let mut stats: Vec<ChannelIngestStats> = vec![ChannelIngestStats::default(); spec.channels.len()];

    for (row_idx, row) in table.rows().iter().enumerate() {
        let timestamp = parse_row_timestamp(row, row_idx, &timestamp_idx, &spec.timestamp.format)?;

        for (ch_idx, ch_spec) in spec.channels.iter().enumerate() {
            let mut values = Vec::with_capacity(2);
            let mut outcome = None;
            for &col in &value_idx[ch_idx] {
                let raw = cell(row, row_idx, col)?;
                match classify(spec, ch_spec, raw) {
                    Cell::Value(v) => values.push(v),
                    other => {
                        outcome = Some(other);
                        break;
                    }
                }
            }

            let st = &mut stats[ch_idx];
            match outcome {
                None => samples[ch_idx].push(Sample::new(timestamp, ch_spec.source.combine(&values))),
                Some(Cell::Placeholder) => st.placeholders += 1,
                Some(Cell::TooPrecise) => st.precision_filtered += 1,
                Some(_) => {
                    log::debug!("row {row_idx}: non-numeric value for channel '{}'", ch_spec.name);
                    st.unparseable += 1;
                }
            }
        }
    }

    let mut channels = Vec::with_capacity(spec.channels.len());
    let mut report = IngestReport { rows_total: table.len(), channels: BTreeMap::new() };

    for ((ch_spec, ch_samples), mut st) in spec.channels.iter().zip(samples).zip(stats) {
        let mut channel = Channel::new(ch_spec.name.clone(), ch_samples);
        if ch_spec.unique {
            let (deduped, collapsed) = collapse_duplicates(&channel);
            channel = deduped;
            st.duplicates_collapsed = collapsed;
        }
        st.kept = channel.len();
        if st.dropped() > 0 {
            log::info!(
                "channel '{}': kept {}, dropped {} ({} placeholder, {} unparseable, {} precision, {} duplicate)",
                ch_spec.name,
                st.kept,
                st.dropped(),
                st.placeholders,
                st.unparseable,
                st.precision_filtered,
                st.duplicates_collapsed
            );
        } else {
            log::info!("channel '{}': kept {} samples", ch_spec.name, st.kept);
        }
        report.channels.insert(ch_spec.name.clone(), st);
        channels.push(channel);
    }

    Ok(Ingested { channels, report })
}

fn require_column(table: &RawTable, name: &str) -> AnalysisResult<usize> {
    table.column_index(name).ok_or_else(|| AnalysisError::ParseFailure {
        row: 0,
        reason: format!("missing column '{name}'"),
    })
}

fn resolve_timestamp_columns(table: &RawTable, columns: &TimestampColumns) -> AnalysisResult<Vec<usize>> {
    match columns {
        TimestampColumns::Combined { date, time } => {
            Ok(vec![require_column(table, date)?, require_column(table, time)?])
        }
        TimestampColumns::Single { column } => Ok(vec![require_column(table, column)?]),
    }
}

fn cell(row: &[String], row_idx: usize, col: usize) -> AnalysisResult<&str> {
    row.get(col).map(String::as_str).ok_or_else(|| AnalysisError::ParseFailure {
        row: row_idx,
        reason: format!("row has {} cells, column {} missing", row.len(), col),
    })
}

fn parse_row_timestamp(
    row: &[String],
    row_idx: usize,
    columns: &[usize],
    format: &TimestampFormat,
) -> AnalysisResult<Timestamp> {
    let joined = columns
        .iter()
        .map(|&c| cell(row, row_idx, c))
        .collect::<AnalysisResult<Vec<_>>>()?
        .join(" ");
    format
        .parse(&joined)
        .map_err(|reason| AnalysisError::ParseFailure { row: row_idx, reason })
}

fn classify(spec: &IngestSpec, ch_spec: &ChannelSpec, raw: &str) -> Cell {
    let raw = raw.trim();
    if spec.is_placeholder(raw) {
        return Cell::Placeholder;
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => {
            if ch_spec.max_decimals.is_some_and(|max| decimal_places(raw) > max) {
                Cell::TooPrecise
            } else {
                Cell::Value(v)
            }
        }
        _ => Cell::Unparseable,
    }
}

/// Digits written after the decimal point
fn decimal_places(raw: &str) -> usize {
    let mantissa = raw.split(['e', 'E']).next().unwrap_or(raw);
    mantissa.split_once('.').map_or(0, |(_, frac)| frac.len())
}

fn collapse_duplicates(channel: &Channel) -> (Channel, usize) {
    let mut kept: Vec<Sample> = Vec::with_capacity(channel.len());
    for s in channel.samples() {
        if kept.last().map_or(true, |last| last.timestamp != s.timestamp) {
            kept.push(*s);
        }
    }
    let collapsed = channel.len() - kept.len();
    (Channel::new(channel.name(), kept), collapsed)
}
