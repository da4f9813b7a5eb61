//! End-to-end tests: CSV files on disk through loading, analysis and report

use std::io::Write;

use cellwatch_core::AnalysisError;
use cellwatch_report::pipeline::run_loaded;
use cellwatch_report::sources::{load_sources, DataSource};
use cellwatch_report::{AnalysisConfig, ReportError};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde_json::json;
use tempfile::NamedTempFile;

const HOURS: i64 = 240;

fn origin() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 11, 8).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

fn resting_v(hour: i64) -> f64 {
    13.300 - 0.0004 * hour as f64
}

/// Ten days of hourly Min/Max with a linear decline; spread widens as voltage falls
fn hourly_voltage_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "Date,Time,Min,Max").unwrap();
    for h in 0..HOURS {
        let ts = origin() + Duration::hours(h);
        let min = resting_v(h);
        let max = min + 0.030 + 0.2 * (13.300 - min);
        let max = if h == 100 { "unavailable".to_string() } else { format!("{max:.3}") };
        writeln!(file, "{},{},{:.3},{}", ts.format("%d/%m/%Y"), ts.format("%H:%M"), min, max).unwrap();
    }
    file.flush().unwrap();
    file
}

/// Hourly temperature in °F with a daily cycle
fn hourly_temperature_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "Date,Time,Min,Max").unwrap();
    for h in 0..HOURS {
        let ts = origin() + Duration::hours(h);
        let mid = 50.0 + 10.0 * (std::f64::consts::TAU * (h % 24) as f64 / 24.0).sin();
        writeln!(file, "{},{},{:.1},{:.1}", ts.format("%d/%m/%Y"), ts.format("%H:%M"), mid - 1.0, mid + 1.0).unwrap();
    }
    file.flush().unwrap();
    file
}

/// Two hours of 5-second state history with one placeholder and one pre-averaged row
fn raw_history_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "entity_id,state,last_changed").unwrap();
    for i in 0..1440 {
        let ts = origin() + Duration::seconds(5 * i);
        let state = match i {
            17 => "unavailable".to_string(),
            18 => "13.2845".to_string(),
            _ if i % 2 == 0 => "13.28".to_string(),
            _ => "13.29".to_string(),
        };
        writeln!(file, "sensor.battery_voltage,{},{}+00:00", state, ts.format("%Y-%m-%dT%H:%M:%S")).unwrap();
    }
    file.flush().unwrap();
    file
}

fn config_json() -> String {
    json!({
        "segmentation": {
            "phases": [
                { "name": "early", "start": "2025-11-08T00:00:00" },
                { "name": "late", "start": "2025-11-13T00:00:00" }
            ],
            "drift_days": { "from": "2025-11-08", "to": "2025-11-17" }
        },
        "capacity": {
            "anchors": { "start": "2025-11-08T00:00:00", "end": "2025-11-17T23:00:00" }
        },
        "divergence": {
            "early": { "start": "2025-11-08T00:00:00", "end": "2025-11-13T00:00:00" },
            "late": { "start": "2025-11-13T00:00:00", "end": "2025-11-18T00:00:00" }
        }
    })
    .to_string()
}

#[test]
fn full_run_over_csv_sources() {
    let voltage = hourly_voltage_csv();
    let temperature = hourly_temperature_csv();
    let raw = raw_history_csv();
    let mut config_file = NamedTempFile::new().unwrap();
    write!(config_file, "{}", config_json()).unwrap();
    config_file.flush().unwrap();

    let config = AnalysisConfig::from_path(config_file.path()).unwrap();
    let loaded = load_sources(&[
        DataSource::hourly_voltage(voltage.path()),
        DataSource::hourly_temperature(temperature.path()),
        DataSource::raw_voltage(raw.path()),
    ])
    .unwrap();
    assert_eq!(loaded.dataset.len(), 6);

    let report = run_loaded(&loaded, &config);

    // Ingestion table leads, with cleaning counts per channel
    let ingestion = &report.tables[0];
    assert_eq!(ingestion.name, "ingestion");
    let raw_stats = &loaded.sources[2].ingest.channels["raw_voltage_highfreq"];
    assert_eq!(raw_stats.placeholders, 1);
    assert_eq!(raw_stats.precision_filtered, 1);
    assert_eq!(raw_stats.kept, 1438);
    let max_stats = &loaded.sources[0].ingest.channels["voltage_max"];
    assert_eq!(max_stats.placeholders, 1);
    assert_eq!(loaded.sources[0].ingest.channels["voltage_min"].kept, HOURS as usize);

    // Filtering of the raw channel: 120 full one-minute buckets
    assert_eq!(report.table("buckets").unwrap().len(), 120);
    assert_eq!(report.finding("noise.buckets_used").unwrap().value, 120.0);
    assert_eq!(report.finding("noise.buckets_excluded").unwrap().value, 0.0);
    assert!(report.finding("noise.within_bucket").unwrap().value > 0.0);
    assert!(report.finding("noise.reduction").unwrap().value > 0.0);

    // Segmentation and trends
    assert_eq!(report.table("phases").unwrap().len(), 2);
    let rate = report.finding("drift.rate").unwrap();
    assert_eq!(rate.unit, "mV/day");
    // midpoint falls at 0.9 of the minimum's 0.4 mV/h
    assert!((rate.value + 8.64).abs() < 0.1, "{}", rate.value);
    assert!(report.finding("day_drift.rate").unwrap().value < 0.0);

    // Alignment and capacity
    assert!(report.finding("coefficient.temperature").is_some());
    assert!(report.finding("capacity.current").unwrap().value < 0.0);
    assert!(report.unavailable("capacity.thermal_correction").is_none());

    // Divergence is assessed; step event and rolling window were not available
    let divergence = report.table("divergence").unwrap();
    assert_eq!(divergence.rows.len(), 1);
    assert_eq!(report.unavailable("segmentation.step_shift").unwrap().kind, "not_configured");
    assert_eq!(report.unavailable("regression.rolling").map(|u| u.kind.as_str()), None);

    let json = report.to_json_pretty().unwrap();
    assert!(json.contains("\"unavailable\""));
}

#[test]
fn sparse_bucket_is_left_out_of_bucket_table() {
    // Three full minutes at 5 s cadence, then a minute with two samples
    let mut raw = NamedTempFile::new().unwrap();
    writeln!(raw, "entity_id,state,last_changed").unwrap();
    let offsets = (0..36).map(|i| 5 * i).chain([185, 190]);
    for (i, secs) in offsets.enumerate() {
        let ts = origin() + Duration::seconds(secs);
        let state = if i % 2 == 0 { "13.28" } else { "13.29" };
        writeln!(raw, "sensor.battery_voltage,{},{}+00:00", state, ts.format("%Y-%m-%dT%H:%M:%S")).unwrap();
    }
    raw.flush().unwrap();

    let loaded = load_sources(&[DataSource::raw_voltage(raw.path())]).unwrap();
    let report = run_loaded(&loaded, &AnalysisConfig::default());

    let buckets = report.table("buckets").unwrap();
    assert!(!buckets.columns.iter().any(|c| c == "qualified"));
    assert_eq!(buckets.len(), 3);
    let count_col = buckets.columns.iter().position(|c| c == "count").unwrap();
    assert!(buckets.rows.iter().all(|row| row[count_col] == json!(12)));
    assert_eq!(report.finding("noise.buckets_used").unwrap().value, 3.0);
    assert_eq!(report.finding("noise.buckets_excluded").unwrap().value, 1.0);
}

#[test]
fn malformed_timestamp_aborts_before_analysis() {
    let mut bad = NamedTempFile::new().unwrap();
    writeln!(bad, "Date,Time,Min,Max").unwrap();
    writeln!(bad, "08/11/2025,00:00,13.30,13.33").unwrap();
    writeln!(bad, "08/11/2025,25:00,13.30,13.33").unwrap();
    bad.flush().unwrap();

    match load_sources(&[DataSource::hourly_voltage(bad.path())]) {
        Err(ReportError::Core(AnalysisError::ParseFailure { row, .. })) => assert_eq!(row, 1),
        other => panic!("expected parse failure, got {other:?}"),
    }
}

#[test]
fn invalid_config_file_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{ "filtering": {{ "bucket_secs": -60 }} }}"#).unwrap();
    file.flush().unwrap();

    let err = AnalysisConfig::from_path(file.path()).unwrap_err();
    assert!(matches!(err, ReportError::Core(AnalysisError::InvalidConfig { .. })));
}
