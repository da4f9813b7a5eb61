//! Noise filtering and moving-average engine
//!
//! ## Overview
//!
//! Two independent filtering modes operate on a channel:
//!
//! 1. **Time-bucketed aggregation** ([`bucketize`]): non-overlapping buckets
//!    keyed by `floor(timestamp / bucket_len)`, one [`WindowStat`] each.
//!    Every sample lands in exactly one bucket, so the bucket counts always
//!    sum to the input length.
//! 2. **Causal sliding mean** ([`sliding_mean`]): the mean of the trailing N
//!    raw values. The first N-1 positions have no value.
//!
//! ## Noise Characterisation
//!
//! [`BucketTable::summary`] reports two dispersion figures side by side:
//!
//! | Figure              | Computed as                  | Answers                      |
//! |---------------------|------------------------------|------------------------------|
//! | within-bucket noise | mean of per-bucket std-dev   | how much does the ADC jitter |
//! | between-bucket noise| std-dev of per-bucket means  | how much does the signal move|
//!
//! They are never combined. Buckets holding fewer samples than the
//! configured minimum are excluded from both.

use std::collections::BTreeMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::channel::{Channel, ChannelView, Sample};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::stats::{self, Summary};
use crate::time::{floor_to, hour_of_day, Timestamp};

/// Aggregate of one bucket or window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowStat {
    /// Floor of the bucket's timestamps
    pub bucket_start: Timestamp,
    /// Mean value
    pub mean: f64,
    /// Sample standard deviation, 0.0 for a single sample
    pub std_dev: f64,
    /// Minimum value
    pub min: f64,
    /// Maximum value
    pub max: f64,
    /// Samples in the bucket (always >= 1)
    pub count: usize,
}

impl WindowStat {
    fn from_values(bucket_start: Timestamp, values: &[f64]) -> AnalysisResult<Self> {
        let s = Summary::of(values)?;
        Ok(Self { bucket_start, mean: s.mean, std_dev: s.std_dev, min: s.min, max: s.max, count: s.count })
    }

    /// Max minus min within the bucket
    pub fn range(&self) -> f64 {
        self.max - self.min
    }
}

/// Buckets of one channel at one bucket length
#[derive(Debug, Clone, PartialEq)]
pub struct BucketTable {
    bucket: Duration,
    buckets: Vec<WindowStat>,
}

/// Partition a channel view into fixed-length time buckets
pub fn bucketize(view: ChannelView<'_>, bucket: Duration) -> AnalysisResult<BucketTable> {
    let buckets = group_by_floor(view.samples(), bucket)?
        .into_iter()
        .map(|(start, values)| WindowStat::from_values(start, &values))
        .collect::<AnalysisResult<Vec<_>>>()?;
    log::info!(
        "'{}': {} samples into {} buckets of {}s",
        view.name(),
        view.len(),
        buckets.len(),
        bucket.num_seconds()
    );
    Ok(BucketTable { bucket, buckets })
}

fn group_by_floor(samples: &[Sample], bucket: Duration) -> AnalysisResult<Vec<(Timestamp, Vec<f64>)>> {
    let mut groups: Vec<(Timestamp, Vec<f64>)> = Vec::new();
    for s in samples {
        let start = floor_to(s.timestamp, bucket)?;
        match groups.last_mut() {
            Some((last, values)) if *last == start => values.push(s.value),
            _ => groups.push((start, vec![s.value])),
        }
    }
    Ok(groups)
}

/// Two-figure noise characterisation of a bucket table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseProfile {
    /// Mean of the qualified bucket means
    pub overall_mean: f64,
    /// Mean of per-bucket standard deviations (instrument jitter)
    pub within_bucket_noise: f64,
    /// Standard deviation of bucket means (signal movement)
    pub between_bucket_noise: f64,
    /// Mean per-bucket max-min range
    pub mean_range: f64,
    /// Buckets meeting the minimum count
    pub buckets_used: usize,
    /// Buckets excluded by the minimum count
    pub buckets_excluded: usize,
}

impl BucketTable {
    /// Bucket length
    pub fn bucket_len(&self) -> Duration {
        self.bucket
    }

    /// All buckets in time order
    pub fn buckets(&self) -> &[WindowStat] {
        &self.buckets
    }

    /// Number of buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Check if there are no buckets
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Samples across all buckets
    pub fn total_count(&self) -> usize {
        self.buckets.iter().map(|b| b.count).sum()
    }

    /// Buckets holding at least `min_count` samples
    pub fn qualified(&self, min_count: usize) -> impl Iterator<Item = &WindowStat> {
        self.buckets.iter().filter(move |b| b.count >= min_count)
    }

    /// Noise profile over qualified buckets
    ///
    /// Needs at least two qualified buckets for the between-bucket figure.
    pub fn summary(&self, min_count: usize) -> AnalysisResult<NoiseProfile> {
        let used: Vec<&WindowStat> = self.qualified(min_count).collect();
        let excluded = self.buckets.len() - used.len();
        if excluded > 0 {
            log::warn!("{excluded} buckets below {min_count} samples excluded from noise summary");
        }
        if used.len() < 2 {
            return Err(AnalysisError::insufficient("qualified buckets", 2, used.len()));
        }

        let means: Vec<f64> = used.iter().map(|b| b.mean).collect();
        let stds: Vec<f64> = used.iter().map(|b| b.std_dev).collect();
        let ranges: Vec<f64> = used.iter().map(|b| b.range()).collect();

        Ok(NoiseProfile {
            overall_mean: stats::mean(&means)?,
            within_bucket_noise: stats::mean(&stds)?,
            between_bucket_noise: stats::sample_std(&means)?,
            mean_range: stats::mean(&ranges)?,
            buckets_used: used.len(),
            buckets_excluded: excluded,
        })
    }

    /// Aggregate qualified bucket means into coarser buckets
    ///
    /// Each coarse bucket's `count` is the number of fine buckets it holds.
    pub fn rebucket(&self, coarse: Duration, min_count: usize) -> AnalysisResult<BucketTable> {
        if coarse < self.bucket {
            return Err(AnalysisError::config("coarse bucket shorter than source bucket"));
        }
        let means: Vec<Sample> = self.qualified(min_count).map(|b| Sample::new(b.bucket_start, b.mean)).collect();
        let buckets = group_by_floor(&means, coarse)?
            .into_iter()
            .map(|(start, values)| WindowStat::from_values(start, &values))
            .collect::<AnalysisResult<Vec<_>>>()?;
        Ok(BucketTable { bucket: coarse, buckets })
    }

    /// Qualified bucket means as a channel keyed by bucket start
    pub fn to_channel(&self, name: &str, min_count: usize) -> Channel {
        Channel::new(name, self.qualified(min_count).map(|b| Sample::new(b.bucket_start, b.mean)).collect())
    }
}

/// Causal simple moving average over the trailing `window` values
///
/// Position `i` holds `None` for `i < window - 1`, otherwise the mean of
/// `values[i + 1 - window ..= i]`.
pub fn sliding_mean(values: &[f64], window: usize) -> AnalysisResult<Vec<Option<f64>>> {
    if window == 0 {
        return Err(AnalysisError::DegenerateWindow { what: "sliding window of size zero" });
    }
    let mut out = vec![None; values.len().min(window - 1)];
    out.extend(values.windows(window).map(|w| Some(w.iter().sum::<f64>() / window as f64)));
    Ok(out)
}

/// Sliding mean as a channel holding only the defined positions
pub fn smooth(view: ChannelView<'_>, window: usize, name: &str) -> AnalysisResult<Channel> {
    let means = sliding_mean(&view.values(), window)?;
    let samples = view
        .samples()
        .iter()
        .zip(means)
        .filter_map(|(s, m)| m.map(|m| Sample::new(s.timestamp, m)))
        .collect();
    Ok(Channel::new(name, samples))
}

/// Dispersion before and after smoothing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseReduction {
    /// Std-dev of the raw values
    pub raw_std: f64,
    /// Std-dev of the smoothed values
    pub smoothed_std: f64,
    /// `1 - smoothed_std / raw_std`
    pub reduction: f64,
}

/// Fractional noise reduction achieved by smoothing
pub fn noise_reduction(raw: &[f64], smoothed: &[f64]) -> AnalysisResult<NoiseReduction> {
    let raw_std = stats::sample_std(raw)?;
    let smoothed_std = stats::sample_std(smoothed)?;
    if raw_std == 0.0 {
        return Err(AnalysisError::DivisionByZero { what: "noise reduction of a constant signal" });
    }
    Ok(NoiseReduction { raw_std, smoothed_std, reduction: 1.0 - smoothed_std / raw_std })
}

/// Statistics for one clock hour
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourProfile {
    /// Clock hour 0-23
    pub hour: u32,
    /// Mean value in that hour
    pub mean: f64,
    /// Sample std-dev in that hour
    pub std_dev: f64,
    /// Samples in that hour
    pub count: usize,
}

/// Per-clock-hour statistics, ascending by hour; hours without data are omitted
pub fn hour_of_day_profile(view: ChannelView<'_>) -> AnalysisResult<Vec<HourProfile>> {
    let mut by_hour: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for s in view.samples() {
        by_hour.entry(hour_of_day(s.timestamp)).or_default().push(s.value);
    }
    by_hour
        .into_iter()
        .map(|(hour, values)| {
            let s = Summary::of(&values)?;
            Ok(HourProfile { hour, mean: s.mean, std_dev: s.std_dev, count: s.count })
        })
        .collect()
}

/// Sample-weighted mean of the day hours minus that of the night hours
pub fn diurnal_swing(profile: &[HourProfile], day_hours: &[u32], night_hours: &[u32]) -> AnalysisResult<f64> {
    let weighted = |hours: &[u32], what: &'static str| -> AnalysisResult<f64> {
        let (sum, n) = profile
            .iter()
            .filter(|p| hours.contains(&p.hour))
            .fold((0.0, 0usize), |(sum, n), p| (sum + p.mean * p.count as f64, n + p.count));
        if n == 0 {
            return Err(AnalysisError::insufficient(what, 1, 0));
        }
        Ok(sum / n as f64)
    };
    Ok(weighted(day_hours, "day-hour samples")? - weighted(night_hours, "night-hour samples")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, min: u32, sec: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2025, 12, 26).unwrap().and_hms_opt(hour, min, sec).unwrap()
    }

    fn raw() -> Channel {
        // Minute 0: 4 samples, minute 1: 4 samples, minute 2: 1 sample
        Channel::from_pairs(
            "raw",
            vec![
                (at(0, 0, 0), 13.27),
                (at(0, 0, 15), 13.28),
                (at(0, 0, 30), 13.27),
                (at(0, 0, 45), 13.28),
                (at(0, 1, 0), 13.29),
                (at(0, 1, 15), 13.30),
                (at(0, 1, 30), 13.29),
                (at(0, 1, 45), 13.30),
                (at(0, 2, 0), 13.50),
            ],
        )
    }

    #[test]
    fn buckets_partition_input() {
        let ch = raw();
        let table = bucketize(ch.view(), Duration::seconds(60)).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.total_count(), ch.len());
        assert_eq!(table.buckets()[2].count, 1);
        assert_eq!(table.buckets()[2].std_dev, 0.0);
        assert_eq!(table.buckets()[1].bucket_start, at(0, 1, 0));
        assert!((table.buckets()[0].mean - 13.275).abs() < 1e-12);
    }

    #[test]
    fn noise_summary_excludes_sparse_buckets() {
        let table = bucketize(raw().view(), Duration::seconds(60)).unwrap();
        let profile = table.summary(4).unwrap();
        assert_eq!((profile.buckets_used, profile.buckets_excluded), (2, 1));
        assert!((profile.overall_mean - 13.285).abs() < 1e-9);
        // Bucket means 13.275 and 13.295
        assert!((profile.between_bucket_noise - 0.02 / 2f64.sqrt()).abs() < 1e-9);
        assert!(profile.within_bucket_noise > 0.0 && profile.within_bucket_noise < 0.01);
        assert!((profile.mean_range - 0.01).abs() < 1e-9);

        assert!(matches!(table.summary(5), Err(AnalysisError::InsufficientData { .. })));
    }

    #[test]
    fn rebucket_to_coarser() {
        let table = bucketize(raw().view(), Duration::seconds(60)).unwrap();
        let hourly = table.rebucket(Duration::hours(1), 4).unwrap();
        assert_eq!(hourly.len(), 1);
        assert_eq!(hourly.buckets()[0].count, 2);
        assert!(table.rebucket(Duration::seconds(1), 4).is_err());
        assert_eq!(table.to_channel("means", 4).len(), 2);
    }

    #[test]
    fn causal_sliding_mean() {
        let means = sliding_mean(&[1.0, 2.0, 3.0, 4.0, 5.0], 3).unwrap();
        assert_eq!(means, vec![None, None, Some(2.0), Some(3.0), Some(4.0)]);
        assert_eq!(sliding_mean(&[1.0, 2.0], 3).unwrap(), vec![None, None]);
        assert_eq!(sliding_mean(&[7.0], 1).unwrap(), vec![Some(7.0)]);
        assert!(sliding_mean(&[1.0], 0).is_err());
    }

    #[test]
    fn smoothing_reduces_noise() {
        let ch = Channel::from_pairs(
            "v",
            (0..40).map(|i| (at(0, i, 0), if i % 2 == 0 { 13.27 } else { 13.29 })),
        );
        let smoothed = smooth(ch.view(), 4, "v_ma").unwrap();
        assert_eq!(smoothed.len(), 37);
        assert_eq!(smoothed.samples()[0].timestamp, at(0, 3, 0));

        let nr = noise_reduction(&ch.view().values(), &smoothed.view().values()).unwrap();
        assert!(nr.smoothed_std < 1e-9);
        assert!((nr.reduction - 1.0).abs() < 1e-6);
        assert!(noise_reduction(&[1.0, 1.0], &[1.0, 1.0]).is_err());
    }

    #[test]
    fn diurnal_profile() {
        let day = NaiveDate::from_ymd_opt(2025, 12, 26).unwrap();
        let ch = Channel::from_pairs(
            "v",
            (0..24).map(|h| (day.and_hms_opt(h, 0, 0).unwrap(), if (10..=14).contains(&h) { 13.30 } else { 13.26 })),
        );
        let profile = hour_of_day_profile(ch.view()).unwrap();
        assert_eq!(profile.len(), 24);
        assert_eq!(profile[12].hour, 12);

        let swing = diurnal_swing(&profile, &[10, 11, 12, 13, 14], &[22, 23, 0, 1, 2, 3, 4]).unwrap();
        assert!((swing - 0.04).abs() < 1e-9);
        assert!(diurnal_swing(&[], &[10], &[22]).is_err());
    }
}
