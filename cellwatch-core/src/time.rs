//! Timestamp handling for captured telemetry
//!
//! Monitoring exports arrive with heterogeneous clock representations:
//! - Split `Date` + `Time` columns in a locale format (`26/12/2025`, `14:00`)
//! - ISO-8601 / RFC 3339 strings with a zone offset (`2025-12-26T14:00:03.120+00:00`)
//! - Naive ISO strings without any zone
//!
//! All of them are normalised to a naive wall-clock [`Timestamp`]. Zoned
//! inputs are converted to UTC before the zone is dropped when normalisation
//! is requested, otherwise their local wall-clock reading is kept.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::constants::time::SECONDS_PER_HOUR;
use crate::errors::{AnalysisError, AnalysisResult};

/// Instant on the analysis timeline
pub type Timestamp = NaiveDateTime;

/// How a timestamp string is interpreted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimestampFormat {
    /// `chrono` format string, e.g. `%d/%m/%Y %H:%M`
    Pattern {
        /// strftime-style pattern
        pattern: String,
    },
    /// ISO-8601 / RFC 3339, zoned or naive
    Iso8601 {
        /// Convert zoned timestamps to UTC before dropping the zone
        normalize_to_utc: bool,
    },
}

impl TimestampFormat {
    /// Pattern-based format
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self::Pattern { pattern: pattern.into() }
    }

    /// Parse a single timestamp string
    pub fn parse(&self, raw: &str) -> Result<Timestamp, String> {
        let raw = raw.trim();
        match self {
            Self::Pattern { pattern } => NaiveDateTime::parse_from_str(raw, pattern)
                .or_else(|_| {
                    // Date-only patterns resolve to midnight
                    NaiveDate::parse_from_str(raw, pattern)
                        .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
                })
                .map_err(|e| format!("'{raw}' does not match '{pattern}': {e}")),
            Self::Iso8601 { normalize_to_utc } => {
                if let Ok(zoned) = DateTime::parse_from_rfc3339(raw) {
                    return Ok(if *normalize_to_utc {
                        zoned.naive_utc()
                    } else {
                        zoned.naive_local()
                    });
                }
                // Space-separated variant with offset, as emitted by many exporters
                if let Ok(zoned) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
                    return Ok(if *normalize_to_utc {
                        zoned.naive_utc()
                    } else {
                        zoned.naive_local()
                    });
                }
                ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
                    .iter()
                    .find_map(|p| NaiveDateTime::parse_from_str(raw, p).ok())
                    .ok_or_else(|| format!("'{raw}' is not an ISO-8601 timestamp"))
            }
        }
    }
}

impl Default for TimestampFormat {
    fn default() -> Self {
        Self::Iso8601 { normalize_to_utc: true }
    }
}

/// Floor a timestamp to a multiple of `bucket` since the Unix epoch
///
/// Returns `DegenerateWindow` for non-positive bucket lengths.
pub fn floor_to(ts: Timestamp, bucket: Duration) -> AnalysisResult<Timestamp> {
    let len = bucket.num_milliseconds();
    if len <= 0 {
        return Err(AnalysisError::DegenerateWindow { what: "bucket length must be positive" });
    }
    let millis = ts.and_utc().timestamp_millis();
    let floored = millis - millis.rem_euclid(len);
    DateTime::from_timestamp_millis(floored)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| AnalysisError::DegenerateWindow { what: "bucket start out of range" })
}

/// Elapsed time as fractional hours
pub fn hours_between(start: Timestamp, end: Timestamp) -> f64 {
    (end - start).num_milliseconds() as f64 / (SECONDS_PER_HOUR as f64 * 1000.0)
}

/// Elapsed time in units of `unit` (e.g. hours, days)
pub fn elapsed_in(start: Timestamp, end: Timestamp, unit: Duration) -> AnalysisResult<f64> {
    let unit_ms = unit.num_milliseconds();
    if unit_ms <= 0 {
        return Err(AnalysisError::DivisionByZero { what: "elapsed time unit" });
    }
    Ok((end - start).num_milliseconds() as f64 / unit_ms as f64)
}

/// Clock hour (0-23) of a timestamp
pub fn hour_of_day(ts: Timestamp) -> u32 {
    ts.hour()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn combined_date_time_pattern() {
        let fmt = TimestampFormat::pattern("%d/%m/%Y %H:%M");
        assert_eq!(fmt.parse("26/12/2025 14:00").unwrap(), ts("2025-12-26 14:00:00"));
        assert!(fmt.parse("2025-12-26 14:00").is_err());
    }

    #[test]
    fn iso_with_zone_normalisation() {
        let utc = TimestampFormat::Iso8601 { normalize_to_utc: true };
        let local = TimestampFormat::Iso8601 { normalize_to_utc: false };

        let raw = "2025-12-26T14:00:03+02:00";
        assert_eq!(utc.parse(raw).unwrap(), ts("2025-12-26 12:00:03"));
        assert_eq!(local.parse(raw).unwrap(), ts("2025-12-26 14:00:03"));

        // Naive strings are taken as-is
        assert_eq!(utc.parse("2025-12-26T14:00:03").unwrap(), ts("2025-12-26 14:00:03"));
        assert_eq!(utc.parse("2025-12-26 14:00:03.500+00:00").unwrap().second(), 3);
        assert!(utc.parse("unavailable").is_err());
    }

    #[test]
    fn flooring_to_buckets() {
        let t = ts("2025-12-26 14:07:42");
        assert_eq!(floor_to(t, Duration::seconds(60)).unwrap(), ts("2025-12-26 14:07:00"));
        assert_eq!(floor_to(t, Duration::hours(1)).unwrap(), ts("2025-12-26 14:00:00"));
        assert!(floor_to(t, Duration::zero()).is_err());
    }

    #[test]
    fn elapsed_units() {
        let a = ts("2025-11-08 00:00:00");
        let b = ts("2026-01-02 00:00:00");
        assert_eq!(hours_between(a, b), 1320.0);
        assert_eq!(elapsed_in(a, b, Duration::days(1)).unwrap(), 55.0);
        assert!(elapsed_in(a, b, Duration::zero()).is_err());
    }
}
