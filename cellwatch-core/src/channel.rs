//! Channels: named, time-ordered sample sequences
//!
//! ## Overview
//!
//! A [`Channel`] is the unit every analysis component consumes. It is built
//! once at ingestion time and never mutated afterwards; phases, buckets and
//! windows are borrowed [`ChannelView`]s over its storage, not copies.
//!
//! ## Invariants
//!
//! - Samples are sorted by timestamp ascending (stable, so duplicate
//!   timestamps keep their input order)
//! - All values in a channel share one physical unit
//!
//! ## Data Integrity Diagnostics
//!
//! Captured datasets have gaps and a quantised ADC. The diagnostics on
//! [`ChannelView`] surface both before any statistic is trusted:
//! - `missing_slots`: expected cadence slots with no sample
//! - `quantization_step`: smallest positive difference between distinct values
//! - `value_histogram`: how often each distinct reading occurs
//! - `sampling_interval`: median, mean and largest gap between samples

use std::collections::{BTreeMap, BTreeSet};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{AnalysisError, AnalysisResult};
use crate::stats::{self, Summary};
use crate::time::{floor_to, Timestamp};

/// Well-known channel names produced by the standard ingestion specs
pub mod names {
    /// Per-interval minimum voltage
    pub const VOLTAGE_MIN: &str = "voltage_min";
    /// Per-interval maximum voltage
    pub const VOLTAGE_MAX: &str = "voltage_max";
    /// Midpoint of min and max voltage
    pub const VOLTAGE_MID: &str = "voltage_mid";
    /// Max minus min voltage
    pub const SPREAD: &str = "spread";
    /// Midpoint temperature
    pub const TEMPERATURE_MID: &str = "temperature_mid";
    /// Relative humidity
    pub const HUMIDITY: &str = "humidity";
    /// Raw high-frequency voltage readings
    pub const RAW_VOLTAGE: &str = "raw_voltage_highfreq";
}

/// One timestamped reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Reading time
    pub timestamp: Timestamp,
    /// Reading value in the channel's unit
    pub value: f64,
}

impl Sample {
    /// Create a sample
    pub const fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Named, immutable, time-ordered sequence of samples
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    name: String,
    samples: Vec<Sample>,
}

impl Channel {
    /// Build a channel, sorting samples by timestamp (stable)
    pub fn new(name: impl Into<String>, mut samples: Vec<Sample>) -> Self {
        samples.sort_by_key(|s| s.timestamp);
        Self { name: name.into(), samples }
    }

    /// Build a channel from `(timestamp, value)` pairs
    pub fn from_pairs(
        name: impl Into<String>,
        pairs: impl IntoIterator<Item = (Timestamp, f64)>,
    ) -> Self {
        Self::new(name, pairs.into_iter().map(|(t, v)| Sample::new(t, v)).collect())
    }

    /// Same samples under a different name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self { name: name.into(), samples: self.samples.clone() }
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All samples, ordered
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the channel has no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// View over the whole channel
    pub fn view(&self) -> ChannelView<'_> {
        ChannelView { name: &self.name, samples: &self.samples }
    }

    /// View over `[start, end)`; `None` leaves that side open
    pub fn range(&self, start: Option<Timestamp>, end: Option<Timestamp>) -> ChannelView<'_> {
        self.view().range(start, end)
    }

    /// Value of the first sample at exactly `ts`
    pub fn value_at(&self, ts: Timestamp) -> Option<f64> {
        self.view().value_at(ts)
    }

    /// Value at exactly `ts`, or `MissingAnchor`
    pub fn anchor(&self, ts: Timestamp) -> AnalysisResult<f64> {
        self.value_at(ts).ok_or(AnalysisError::MissingAnchor { timestamp: ts })
    }

    /// New channel with `f` applied to every value
    pub fn map_values(&self, name: impl Into<String>, f: impl Fn(f64) -> f64) -> Self {
        Self {
            name: name.into(),
            samples: self.samples.iter().map(|s| Sample::new(s.timestamp, f(s.value))).collect(),
        }
    }
}

/// Borrowed slice of a channel
#[derive(Debug, Clone, Copy)]
pub struct ChannelView<'a> {
    name: &'a str,
    samples: &'a [Sample],
}

impl<'a> ChannelView<'a> {
    /// Channel name
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Samples in the view
    pub fn samples(&self) -> &'a [Sample] {
        self.samples
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the view has no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Values in order
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    /// Timestamps in order
    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.samples.iter().map(|s| s.timestamp).collect()
    }

    /// First sample
    pub fn first(&self) -> Option<&'a Sample> {
        self.samples.first()
    }

    /// Last sample
    pub fn last(&self) -> Option<&'a Sample> {
        self.samples.last()
    }

    /// Earliest and latest timestamp
    pub fn time_range(&self) -> Option<(Timestamp, Timestamp)> {
        Some((self.first()?.timestamp, self.last()?.timestamp))
    }

    /// Sub-view over `[start, end)`
    pub fn range(&self, start: Option<Timestamp>, end: Option<Timestamp>) -> ChannelView<'a> {
        let lo = start.map_or(0, |t| self.samples.partition_point(|s| s.timestamp < t));
        let hi = end.map_or(self.samples.len(), |t| self.samples.partition_point(|s| s.timestamp < t));
        ChannelView { name: self.name, samples: &self.samples[lo..hi.max(lo)] }
    }

    /// Value of the first sample at exactly `ts`
    pub fn value_at(&self, ts: Timestamp) -> Option<f64> {
        let idx = self.samples.partition_point(|s| s.timestamp < ts);
        self.samples.get(idx).filter(|s| s.timestamp == ts).map(|s| s.value)
    }

    /// Descriptive summary of the values
    pub fn summary(&self) -> AnalysisResult<Summary> {
        Summary::of(&self.values())
    }

    /// Mean of the values
    pub fn mean(&self) -> AnalysisResult<f64> {
        stats::mean(&self.values())
    }

    /// Start of every `step`-aligned slot between the first and last sample
    /// that holds no sample
    pub fn missing_slots(&self, step: Duration) -> AnalysisResult<Vec<Timestamp>> {
        let Some((first, last)) = self.time_range() else {
            return Ok(Vec::new());
        };
        let occupied = self
            .samples
            .iter()
            .map(|s| floor_to(s.timestamp, step))
            .collect::<AnalysisResult<BTreeSet<_>>>()?;

        let mut missing = Vec::new();
        let mut slot = floor_to(first, step)?;
        while slot <= last {
            if !occupied.contains(&slot) {
                missing.push(slot);
            }
            slot += step;
        }
        Ok(missing)
    }

    /// Smallest positive difference between distinct values
    pub fn quantization_step(&self) -> Option<f64> {
        let mut values = self.values();
        values.sort_by(f64::total_cmp);
        values
            .windows(2)
            .map(|w| w[1] - w[0])
            .filter(|d| *d > 0.0)
            .min_by(f64::total_cmp)
    }

    /// Occurrence count of each distinct value, ascending by value
    pub fn value_histogram(&self) -> Vec<(f64, usize)> {
        let mut values = self.values();
        values.sort_by(f64::total_cmp);
        let mut histogram: Vec<(f64, usize)> = Vec::new();
        for v in values {
            match histogram.last_mut() {
                Some((last, count)) if *last == v => *count += 1,
                _ => histogram.push((v, 1)),
            }
        }
        histogram
    }

    /// Gap statistics between consecutive samples
    pub fn sampling_interval(&self) -> AnalysisResult<SamplingInterval> {
        let gaps: Vec<f64> = self
            .samples
            .windows(2)
            .map(|w| (w[1].timestamp - w[0].timestamp).num_milliseconds() as f64 / 1000.0)
            .collect();
        if gaps.is_empty() {
            return Err(AnalysisError::insufficient("sampling interval", 2, self.len()));
        }
        Ok(SamplingInterval {
            median_secs: stats::median(&gaps)?,
            mean_secs: stats::mean(&gaps)?,
            max_gap_secs: gaps.iter().copied().fold(0.0, f64::max),
        })
    }
}

/// Inter-sample gap statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingInterval {
    /// Median gap in seconds
    pub median_secs: f64,
    /// Mean gap in seconds
    pub mean_secs: f64,
    /// Largest gap in seconds
    pub max_gap_secs: f64,
}

/// All channels of one analysis run, keyed by name
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    channels: BTreeMap<String, Channel>,
}

impl Dataset {
    /// Empty dataset
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel, replacing any channel with the same name
    pub fn insert(&mut self, channel: Channel) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    /// Look up a channel by name
    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    /// Channel names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// All channels
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Number of channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if the dataset holds no channels
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl FromIterator<Channel> for Dataset {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        let mut dataset = Self::new();
        for channel in iter {
            dataset.insert(channel);
        }
        dataset
    }
}
