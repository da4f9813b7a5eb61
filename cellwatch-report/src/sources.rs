//! Dataset loading
//!
//! A [`DataSource`] pairs a file with the [`IngestSpec`] that turns it into
//! channels. Constructors are provided for the exports of the reference
//! deployment: hourly min/max voltage and temperature aggregates with split
//! date and time columns, and the high-frequency voltage history with ISO
//! timestamps. Loading is all-or-nothing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cellwatch_core::channel::names;
use cellwatch_core::ingest::{ingest, ChannelSpec, IngestReport, IngestSpec, TimestampSpec};
use cellwatch_core::table::{RawTable, TableStats};
use cellwatch_core::{AnalysisError, Channel, Dataset};

use crate::ReportResult;

/// Day-first timestamp layout of the aggregate exports
pub const AGGREGATE_TIMESTAMP_PATTERN: &str = "%d/%m/%Y %H:%M";

/// One input file and how to read it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    /// File to read
    pub path: PathBuf,
    /// Column mapping and cleaning rules
    pub spec: IngestSpec,
}

impl DataSource {
    /// Source with an explicit spec
    pub fn new(path: impl Into<PathBuf>, spec: IngestSpec) -> Self {
        Self { path: path.into(), spec }
    }

    /// Hourly voltage aggregates: `Date,Time,Min,Max`
    ///
    /// Produces minimum, maximum, midpoint and spread channels.
    pub fn hourly_voltage(path: impl Into<PathBuf>) -> Self {
        let spec = IngestSpec::new(aggregate_timestamp())
            .channel(ChannelSpec::column(names::VOLTAGE_MIN, "Min"))
            .channel(ChannelSpec::column(names::VOLTAGE_MAX, "Max"))
            .channel(ChannelSpec::midpoint(names::VOLTAGE_MID, "Min", "Max"))
            .channel(ChannelSpec::spread(names::SPREAD, "Min", "Max"));
        Self::new(path, spec)
    }

    /// Hourly temperature aggregates: `Date,Time,Min,Max`, midpoint only
    pub fn hourly_temperature(path: impl Into<PathBuf>) -> Self {
        let spec = IngestSpec::new(aggregate_timestamp())
            .channel(ChannelSpec::midpoint(names::TEMPERATURE_MID, "Min", "Max"));
        Self::new(path, spec)
    }

    /// Hourly humidity aggregates: `Date,Time,Min,Max`, midpoint only
    pub fn hourly_humidity(path: impl Into<PathBuf>) -> Self {
        let spec = IngestSpec::new(aggregate_timestamp())
            .channel(ChannelSpec::midpoint(names::HUMIDITY, "Min", "Max"));
        Self::new(path, spec)
    }

    /// High-frequency state history: `entity_id,state,last_changed`
    ///
    /// Timestamps are normalised to UTC. Only readings at the 10 mV ADC
    /// resolution (two decimals) are kept, one per timestamp.
    pub fn raw_voltage(path: impl Into<PathBuf>) -> Self {
        let spec = IngestSpec::new(TimestampSpec::iso8601("last_changed", true))
            .channel(ChannelSpec::column(names::RAW_VOLTAGE, "state").unique().max_decimals(2));
        Self::new(path, spec)
    }
}

fn aggregate_timestamp() -> TimestampSpec {
    TimestampSpec::combined("Date", "Time", AGGREGATE_TIMESTAMP_PATTERN)
}

/// What loading one source read and kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    /// File read
    pub path: PathBuf,
    /// Line and byte counts
    pub table: TableStats,
    /// Per-channel cleaning counts
    pub ingest: IngestReport,
}

/// Loaded dataset with per-source reports
#[derive(Debug, Clone)]
pub struct Loaded {
    /// All channels
    pub dataset: Dataset,
    /// One report per source, in load order
    pub sources: Vec<SourceReport>,
}

/// Read every source; the first failure aborts the load
pub fn load_sources(sources: &[DataSource]) -> ReportResult<Loaded> {
    let mut dataset = Dataset::new();
    let mut reports = Vec::with_capacity(sources.len());

    for source in sources {
        let (channels, report) = load_one(&source.path, &source.spec)?;
        for channel in channels {
            if dataset.get(channel.name()).is_some() {
                return Err(AnalysisError::InvalidConfig {
                    reason: format!("channel '{}' is produced by more than one source", channel.name()),
                }
                .into());
            }
            dataset.insert(channel);
        }
        reports.push(report);
    }

    log::info!("Loaded {} channels from {} sources", dataset.len(), sources.len());
    Ok(Loaded { dataset, sources: reports })
}

/// Read every source into one dataset
pub fn load_dataset(sources: &[DataSource]) -> ReportResult<Dataset> {
    Ok(load_sources(sources)?.dataset)
}

fn load_one(path: &Path, spec: &IngestSpec) -> ReportResult<(Vec<Channel>, SourceReport)> {
    let table = RawTable::from_path(path).map_err(|e| {
        log::warn!("Failed to read {}: {}", path.display(), e);
        e
    })?;
    let ingested = ingest(&table, spec).map_err(|e| {
        log::warn!("Ingestion of {} aborted: {}", path.display(), e);
        e
    })?;
    let report = SourceReport { path: path.to_path_buf(), table: table.stats().clone(), ingest: ingested.report };
    Ok((ingested.channels, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write");
        file.flush().expect("flush");
        file
    }

    #[test]
    fn hourly_voltage_yields_four_channels() {
        let file = write_csv("Date,Time,Min,Max\n26/12/2025,14:00,13.28,13.31\n26/12/2025,15:00,13.27,13.30\n");
        let loaded = load_sources(&[DataSource::hourly_voltage(file.path())]).expect("valid csv");

        let channel_names: Vec<&str> = loaded.dataset.names().collect();
        assert_eq!(channel_names, vec!["spread", "voltage_max", "voltage_mid", "voltage_min"]);
        let spread = loaded.dataset.get(names::SPREAD).expect("spread");
        assert!((spread.samples()[0].value - 0.03).abs() < 1e-9);
        assert_eq!(loaded.sources[0].table.rows_read, 2);
    }

    #[test]
    fn parse_failure_aborts_whole_load() {
        let good = write_csv("Date,Time,Min,Max\n26/12/2025,14:00,13.28,13.31\n");
        let bad = write_csv("Date,Time,Min,Max\n2025-12-26,14:00,13.28,13.31\n");
        let err = load_dataset(&[DataSource::hourly_voltage(good.path()), DataSource::hourly_temperature(bad.path())])
            .expect_err("bad timestamp");
        assert!(matches!(err, crate::ReportError::Core(AnalysisError::ParseFailure { row: 0, .. })));
    }

    #[test]
    fn duplicate_channel_names_are_rejected() {
        let a = write_csv("Date,Time,Min,Max\n26/12/2025,14:00,13.28,13.31\n");
        let b = write_csv("Date,Time,Min,Max\n27/12/2025,14:00,13.28,13.31\n");
        let err = load_dataset(&[DataSource::hourly_voltage(a.path()), DataSource::hourly_voltage(b.path())])
            .expect_err("duplicate");
        assert!(matches!(err, crate::ReportError::Core(AnalysisError::InvalidConfig { .. })));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_dataset(&[DataSource::raw_voltage("/nonexistent/history.csv")]).expect_err("missing");
        assert!(matches!(err, crate::ReportError::Core(AnalysisError::Io(_))));
    }
}
