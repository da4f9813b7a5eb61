//! Cross-channel alignment
//!
//! ## Overview
//!
//! Channels are sampled at different cadences: hourly min/max aggregates,
//! sub-minute raw voltage, temperature every few minutes. Alignment puts
//! them on the primary channel's timeline with a backward as-of join:
//!
//! ```text
//! primary:    t0        t1        t2        t3
//! secondary:     s0 s1              s2
//! result:     -         s1        s1*       s2
//!                                 (* absent if t2 - s1 > tolerance)
//! ```
//!
//! For every primary sample the latest secondary sample at or before it is
//! taken; if the gap exceeds the tolerance the field is absent. No value is
//! ever interpolated.
//!
//! Duplicate timestamps are matched by position: the k-th primary sample
//! at a shared timestamp takes the k-th secondary sample at that same
//! timestamp, or the last one when the secondary run is shorter. A
//! channel aligned to itself with zero tolerance is therefore the
//! identity. Without an exact match the last duplicate before `t` wins.
//!
//! ## Multiple Secondaries
//!
//! [`Alignment`] keys merged columns by channel name. Each merge only reads
//! the primary timeline and its own secondary, so merge order never changes
//! the result.

use std::collections::BTreeMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::channel::{Channel, Sample};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::time::Timestamp;

/// One primary sample with its matched secondary values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedRecord {
    /// Primary timestamp
    pub timestamp: Timestamp,
    /// Primary value
    pub primary: f64,
    /// Secondary values by channel name; `None` when nothing fell within tolerance
    pub secondaries: BTreeMap<String, Option<f64>>,
}

impl AlignedRecord {
    /// Value of a merged secondary, flattened
    pub fn secondary(&self, name: &str) -> Option<f64> {
        self.secondaries.get(name).copied().flatten()
    }
}

/// Latest sample at or before `t` within `tolerance`
pub fn as_of(secondary: &[Sample], t: Timestamp, tolerance: Duration) -> Option<f64> {
    let idx = secondary.partition_point(|s| s.timestamp <= t);
    let candidate = secondary.get(idx.checked_sub(1)?)?;
    (t - candidate.timestamp <= tolerance).then_some(candidate.value)
}

/// As [`as_of`], but an exact timestamp match picks the `rank`-th sample of
/// the duplicate run, clamped to its last sample
pub fn as_of_ranked(secondary: &[Sample], t: Timestamp, rank: usize, tolerance: Duration) -> Option<f64> {
    let first = secondary.partition_point(|s| s.timestamp < t);
    let end = secondary.partition_point(|s| s.timestamp <= t);
    if first < end {
        return secondary.get((first + rank).min(end - 1)).map(|s| s.value);
    }
    as_of(secondary, t, tolerance)
}

/// Align one secondary channel onto a primary channel
pub fn align(primary: &Channel, secondary: &Channel, tolerance: Duration) -> AnalysisResult<Vec<AlignedRecord>> {
    Ok(Alignment::new(primary).merge(secondary, tolerance)?.into_records())
}

/// How many primary records received a secondary value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    /// Records with a value within tolerance
    pub matched: usize,
    /// All primary records
    pub total: usize,
}

impl Coverage {
    /// Matched fraction, 0.0 for an empty primary
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.matched as f64 / self.total as f64
        }
    }
}

/// Primary timeline with any number of merged secondaries
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    primary: String,
    records: Vec<AlignedRecord>,
}

impl Alignment {
    /// Start from a primary channel with no secondaries
    pub fn new(primary: &Channel) -> Self {
        let records = primary
            .samples()
            .iter()
            .map(|s| AlignedRecord { timestamp: s.timestamp, primary: s.value, secondaries: BTreeMap::new() })
            .collect();
        Self { primary: primary.name().to_string(), records }
    }

    /// Merge a secondary channel onto the primary timeline
    ///
    /// A negative tolerance is rejected; merging a channel twice replaces
    /// the earlier column.
    pub fn merge(mut self, secondary: &Channel, tolerance: Duration) -> AnalysisResult<Self> {
        if tolerance < Duration::zero() {
            return Err(AnalysisError::config("alignment tolerance must not be negative"));
        }
        let name = secondary.name().to_string();
        let mut matched = 0;
        let mut rank = 0;
        let mut previous = None;
        for record in &mut self.records {
            rank = if previous == Some(record.timestamp) { rank + 1 } else { 0 };
            previous = Some(record.timestamp);
            let value = as_of_ranked(secondary.samples(), record.timestamp, rank, tolerance);
            matched += usize::from(value.is_some());
            record.secondaries.insert(name.clone(), value);
        }
        log::info!(
            "aligned '{}' onto '{}': {}/{} records matched",
            name,
            self.primary,
            matched,
            self.records.len()
        );
        Ok(self)
    }

    /// Primary channel name
    pub fn primary_name(&self) -> &str {
        &self.primary
    }

    /// Aligned records in primary order
    pub fn records(&self) -> &[AlignedRecord] {
        &self.records
    }

    /// Consume into the record list
    pub fn into_records(self) -> Vec<AlignedRecord> {
        self.records
    }

    /// One merged column, absent values kept as `None`
    pub fn column(&self, name: &str) -> Vec<Option<f64>> {
        self.records.iter().map(|r| r.secondary(name)).collect()
    }

    /// `(primary, secondary)` value vectors restricted to records where the
    /// secondary is present
    pub fn complete_pairs(&self, name: &str) -> (Vec<f64>, Vec<f64>) {
        self.records
            .iter()
            .filter_map(|r| r.secondary(name).map(|s| (r.primary, s)))
            .unzip()
    }

    /// Match statistics for one merged column
    pub fn coverage(&self, name: &str) -> Coverage {
        Coverage {
            matched: self.records.iter().filter(|r| r.secondary(name).is_some()).count(),
            total: self.records.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, min: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2025, 12, 26).unwrap().and_hms_opt(hour, min, 0).unwrap()
    }

    #[test]
    fn backward_fill_within_tolerance() {
        let primary = Channel::from_pairs("v", vec![(at(0, 0), 1.0), (at(1, 0), 2.0), (at(3, 0), 3.0)]);
        let temp = Channel::from_pairs("t", vec![(at(0, 30), 10.0), (at(1, 0), 11.0)]);

        let records = align(&primary, &temp, Duration::hours(1)).unwrap();
        assert_eq!(records.len(), 3);
        // Nothing at or before 00:00
        assert_eq!(records[0].secondary("t"), None);
        // Exact match
        assert_eq!(records[1].secondary("t"), Some(11.0));
        // Latest prior sample is 2 h old: absent, not interpolated
        assert_eq!(records[2].secondary("t"), None);
        assert_eq!(records[2].primary, 3.0);
    }

    #[test]
    fn never_looks_forward() {
        let secondary = [Sample::new(at(1, 0), 5.0)];
        assert_eq!(as_of(&secondary, at(0, 59), Duration::hours(24)), None);
        assert_eq!(as_of(&secondary, at(1, 0), Duration::zero()), Some(5.0));
    }

    #[test]
    fn last_duplicate_wins() {
        let secondary = Channel::from_pairs("s", vec![(at(1, 0), 5.0), (at(1, 0), 6.0)]);
        assert_eq!(as_of(secondary.samples(), at(1, 0), Duration::zero()), Some(6.0));
    }

    #[test]
    fn duplicate_runs_match_by_position() {
        let ch = Channel::from_pairs("v", vec![(at(0, 0), 13.27), (at(0, 0), 13.28), (at(0, 5), 13.29)]);
        let records = align(&ch, &ch, Duration::zero()).unwrap();
        let values: Vec<_> = records.iter().map(|r| r.secondary("v")).collect();
        assert_eq!(values, vec![Some(13.27), Some(13.28), Some(13.29)]);

        // Shorter secondary run clamps to its last sample
        let single = Channel::from_pairs("s", vec![(at(0, 0), 1.0)]);
        let records = align(&ch, &single, Duration::zero()).unwrap();
        assert_eq!(records[1].secondary("s"), Some(1.0));
        assert_eq!(records[2].secondary("s"), None);
    }

    #[test]
    fn merge_order_is_irrelevant() {
        let primary = Channel::from_pairs("v", (0..5).map(|h| (at(h, 0), h as f64)));
        let a = Channel::from_pairs("a", vec![(at(0, 10), 1.0), (at(2, 50), 2.0)]);
        let b = Channel::from_pairs("b", vec![(at(1, 0), 7.0)]);
        let tol = Duration::minutes(90);

        let ab = Alignment::new(&primary).merge(&a, tol).unwrap().merge(&b, tol).unwrap();
        let ba = Alignment::new(&primary).merge(&b, tol).unwrap().merge(&a, tol).unwrap();
        assert_eq!(ab, ba);

        let cov = ab.coverage("b");
        assert_eq!((cov.matched, cov.total), (2, 5));
        assert!((cov.fraction() - 0.4).abs() < 1e-12);

        let (v, s) = ab.complete_pairs("a");
        assert_eq!(v, vec![1.0, 3.0, 4.0]);
        assert_eq!(s, vec![1.0, 2.0, 2.0]);
        assert_eq!(ab.column("missing"), vec![None; 5]);
    }

    #[test]
    fn negative_tolerance_rejected() {
        let ch = Channel::from_pairs("v", vec![(at(0, 0), 1.0)]);
        assert!(matches!(
            align(&ch, &ch, Duration::seconds(-1)),
            Err(AnalysisError::InvalidConfig { .. })
        ));
    }
}
