//! Anomaly and divergence detection
//!
//! ## Techniques
//!
//! 1. **Threshold scan** ([`ThresholdRule`], [`sudden_drop_scan`]): fixed,
//!    externally configured limits on a derived quantity (min voltage,
//!    spread, hour-to-hour min delta)
//! 2. **Statistical bound** ([`StatisticalBound`]): `mean ± kσ` learned from
//!    a reference phase, applied to any view
//! 3. **Divergence vs. artifact** ([`assess_divergence`]): a growing spread
//!    is only called a cell divergence after two steps:
//!    - confound check: correlation of the spread with voltage level over a
//!      reference period. `|r|` above the threshold means the voltage level
//!      explains the spread
//!    - controlled comparison: the spread restricted to one narrow voltage
//!      band, early period vs. late period, with a two-sample t-test
//!
//! | band test       | confounded | verdict        |
//! |-----------------|------------|----------------|
//! | significant     | any        | `Divergence`   |
//! | not significant | yes        | `Artifact`     |
//! | not significant | no         | `Stable`       |
//! | unavailable     | any        | `Inconclusive` |
//!
//! The band test is unavailable only when a group falls below the minimum
//! size. Constant groups still produce a test (see [`stats::t_test_ind`]).
//!
//! Events are read-only findings; nothing here mutates a channel.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::align::Alignment;
use crate::channel::{Channel, ChannelView};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::stats::{self, Summary, TTest};
use crate::time::Timestamp;

/// Category of a flagged sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Voltage below a floor
    VoltageDip,
    /// Min/max spread above a ceiling
    HighSpread,
    /// Consecutive-sample drop larger than a limit
    SuddenDrop,
    /// Outside `mean ± kσ` of a reference phase
    StatisticalOutlier,
}

impl AnomalyKind {
    /// Short machine-readable name
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::VoltageDip => "voltage_dip",
            Self::HighSpread => "high_spread",
            Self::SuddenDrop => "sudden_drop",
            Self::StatisticalOutlier => "statistical_outlier",
        }
    }
}

/// One flagged sample
///
/// `magnitude` is the observed value for threshold rules, the signed delta
/// for sudden drops and the signed z-score for statistical outliers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    /// When
    pub timestamp: Timestamp,
    /// What rule fired
    pub kind: AnomalyKind,
    /// How far
    pub magnitude: f64,
    /// Which channel
    pub channel: String,
}

/// Which side of the limit is anomalous
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Flag values strictly below the limit
    Below,
    /// Flag values strictly above the limit
    Above,
}

/// Fixed-limit scan
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    /// Kind reported for flagged samples
    pub kind: AnomalyKind,
    /// Limit in the channel's unit
    pub limit: f64,
    /// Anomalous side
    pub direction: Direction,
}

impl ThresholdRule {
    /// Flag values below `limit`
    pub const fn below(kind: AnomalyKind, limit: f64) -> Self {
        Self { kind, limit, direction: Direction::Below }
    }

    /// Flag values above `limit`
    pub const fn above(kind: AnomalyKind, limit: f64) -> Self {
        Self { kind, limit, direction: Direction::Above }
    }

    /// Whether a value crosses the limit
    pub fn crosses(&self, value: f64) -> bool {
        match self.direction {
            Direction::Below => value < self.limit,
            Direction::Above => value > self.limit,
        }
    }

    /// Scan a view
    pub fn scan(&self, view: ChannelView<'_>) -> Vec<AnomalyEvent> {
        let events: Vec<AnomalyEvent> = view
            .samples()
            .iter()
            .filter(|s| self.crosses(s.value))
            .map(|s| AnomalyEvent {
                timestamp: s.timestamp,
                kind: self.kind,
                magnitude: s.value,
                channel: view.name().to_string(),
            })
            .collect();
        log::info!("'{}': {} {} events", view.name(), events.len(), self.kind.as_str());
        events
    }
}

/// Flag consecutive samples whose value falls by more than `threshold`
///
/// Pairs further apart than `max_gap` straddle a data outage and are not
/// compared.
pub fn sudden_drop_scan(view: ChannelView<'_>, threshold: f64, max_gap: Duration) -> Vec<AnomalyEvent> {
    view.samples()
        .windows(2)
        .filter(|w| w[1].timestamp - w[0].timestamp <= max_gap)
        .filter_map(|w| {
            let delta = w[1].value - w[0].value;
            (delta < -threshold).then(|| AnomalyEvent {
                timestamp: w[1].timestamp,
                kind: AnomalyKind::SuddenDrop,
                magnitude: delta,
                channel: view.name().to_string(),
            })
        })
        .collect()
}

/// `mean ± kσ` envelope
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatisticalBound {
    /// Centre
    pub mean: f64,
    /// Standard deviation
    pub std_dev: f64,
    /// Sigma multiplier
    pub k: f64,
}

impl StatisticalBound {
    /// Explicit bound
    pub fn new(mean: f64, std_dev: f64, k: f64) -> AnalysisResult<Self> {
        if k <= 0.0 {
            return Err(AnalysisError::config("sigma multiplier must be positive"));
        }
        if std_dev <= 0.0 {
            return Err(AnalysisError::DegenerateWindow { what: "statistical bound with zero spread" });
        }
        Ok(Self { mean, std_dev, k })
    }

    /// Bound learned from a reference view (sample std-dev)
    pub fn from_reference(reference: ChannelView<'_>, k: f64) -> AnalysisResult<Self> {
        let values = reference.values();
        Self::new(stats::mean(&values)?, stats::sample_std(&values)?, k)
    }

    /// `mean - kσ`
    pub fn lower(&self) -> f64 {
        self.mean - self.k * self.std_dev
    }

    /// `mean + kσ`
    pub fn upper(&self) -> f64 {
        self.mean + self.k * self.std_dev
    }

    /// Signed distance from the mean in standard deviations
    pub fn z_score(&self, value: f64) -> f64 {
        (value - self.mean) / self.std_dev
    }

    /// Outside the envelope
    pub fn is_outlier(&self, value: f64) -> bool {
        value < self.lower() || value > self.upper()
    }

    /// Flag every sample of `view` outside the envelope
    pub fn scan(&self, view: ChannelView<'_>) -> Vec<AnomalyEvent> {
        view.samples()
            .iter()
            .filter(|s| self.is_outlier(s.value))
            .map(|s| AnomalyEvent {
                timestamp: s.timestamp,
                kind: AnomalyKind::StatisticalOutlier,
                magnitude: self.z_score(s.value),
                channel: view.name().to_string(),
            })
            .collect()
    }
}

/// Target statistics within one confound band `[low, high)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandSpread {
    /// Inclusive lower edge
    pub low: f64,
    /// Exclusive upper edge
    pub high: f64,
    /// Mean of the target in this band
    pub mean: f64,
    /// Sample std-dev (0.0 for one value)
    pub std_dev: f64,
    /// Paired values in this band
    pub count: usize,
}

/// Mean target per confound band; bands without data are omitted
pub fn spread_by_band(target: &[f64], confound: &[f64], edges: &[f64]) -> AnalysisResult<Vec<BandSpread>> {
    if target.len() != confound.len() {
        return Err(AnalysisError::LengthMismatch { left: target.len(), right: confound.len() });
    }
    if edges.len() < 2 || edges.windows(2).any(|w| w[1] <= w[0]) {
        return Err(AnalysisError::config("band edges must be at least two strictly increasing values"));
    }
    let mut bands = Vec::new();
    for w in edges.windows(2) {
        let values: Vec<f64> = target
            .iter()
            .zip(confound)
            .filter(|(_, c)| **c >= w[0] && **c < w[1])
            .map(|(t, _)| *t)
            .collect();
        if values.is_empty() {
            continue;
        }
        let s = Summary::of(&values)?;
        bands.push(BandSpread { low: w[0], high: w[1], mean: s.mean, std_dev: s.std_dev, count: s.count });
    }
    Ok(bands)
}

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Period {
    /// Inclusive start
    pub start: Timestamp,
    /// Exclusive end
    pub end: Timestamp,
}

impl Period {
    /// Membership
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// Parameters of the divergence disambiguation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DivergenceConfig {
    /// Period over which the confound correlation is measured
    pub reference: Period,
    /// Earlier comparison period
    pub early: Period,
    /// Later comparison period
    pub late: Period,
    /// Inclusive lower edge of the confound band
    pub band_low: f64,
    /// Inclusive upper edge of the confound band
    pub band_high: f64,
    /// `|r|` above which the confound explains the behaviour
    pub correlation_threshold: f64,
    /// Significance level of the band comparison
    pub alpha: f64,
    /// Minimum samples per comparison group
    pub min_group: usize,
}

/// Outcome of the disambiguation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Change explained by the confound; no same-band difference
    Artifact,
    /// Same-band difference is significant
    Divergence,
    /// No confound and no same-band difference
    Stable,
    /// Same-band comparison could not be made
    Inconclusive,
}

/// Full record of a divergence assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceAssessment {
    /// Target/confound correlation over the reference period
    pub reference_correlation: f64,
    /// `|reference_correlation| > threshold`
    pub confounded: bool,
    /// Raw target mean in the early period
    pub early_mean: f64,
    /// Raw target mean in the late period
    pub late_mean: f64,
    /// `late_mean - early_mean`
    pub raw_change: f64,
    /// Early samples inside the confound band
    pub early_band_count: usize,
    /// Late samples inside the confound band
    pub late_band_count: usize,
    /// Same-band t-test, when both groups are large enough
    pub band_test: Option<TTest>,
    /// Classification
    pub verdict: Verdict,
}

/// Decide whether a change in `target` is a real divergence or explained by `confound`
///
/// Target and confound are paired on identical timestamps.
pub fn assess_divergence(
    target: &Channel,
    confound: &Channel,
    config: &DivergenceConfig,
) -> AnalysisResult<DivergenceAssessment> {
    let paired = Alignment::new(target).merge(confound, Duration::zero())?;
    let pairs: Vec<(Timestamp, f64, f64)> = paired
        .records()
        .iter()
        .filter_map(|r| r.secondary(confound.name()).map(|c| (r.timestamp, r.primary, c)))
        .collect();

    let select = |period: &Period, banded: bool| -> Vec<(f64, f64)> {
        pairs
            .iter()
            .filter(|(ts, _, c)| {
                period.contains(*ts) && (!banded || (*c >= config.band_low && *c <= config.band_high))
            })
            .map(|(_, t, c)| (*t, *c))
            .collect()
    };

    // Step 1: confound check
    let (ref_target, ref_confound): (Vec<f64>, Vec<f64>) = select(&config.reference, false).into_iter().unzip();
    let reference_correlation = stats::pearson(&ref_target, &ref_confound)?;
    let confounded = reference_correlation.abs() > config.correlation_threshold;

    let early_mean = stats::mean(&target.range(Some(config.early.start), Some(config.early.end)).values())?;
    let late_mean = stats::mean(&target.range(Some(config.late.start), Some(config.late.end)).values())?;

    // Step 2: same-band comparison
    let early_band: Vec<f64> = select(&config.early, true).into_iter().map(|(t, _)| t).collect();
    let late_band: Vec<f64> = select(&config.late, true).into_iter().map(|(t, _)| t).collect();

    let band_test = if early_band.len() < config.min_group || late_band.len() < config.min_group {
        log::warn!(
            "same-band comparison unavailable: {} early, {} late samples (need {})",
            early_band.len(),
            late_band.len(),
            config.min_group
        );
        None
    } else {
        match stats::t_test_ind(&early_band, &late_band) {
            Ok(test) => Some(test),
            Err(e) => {
                log::warn!("same-band comparison unavailable: {e}");
                None
            }
        }
    };

    let verdict = match band_test {
        None => Verdict::Inconclusive,
        Some(test) if test.is_significant(config.alpha) => Verdict::Divergence,
        Some(_) if confounded => Verdict::Artifact,
        Some(_) => Verdict::Stable,
    };
    log::info!(
        "divergence of '{}' vs '{}': r = {:.3}, verdict {:?}",
        target.name(),
        confound.name(),
        reference_correlation,
        verdict
    );

    Ok(DivergenceAssessment {
        reference_correlation,
        confounded,
        early_mean,
        late_mean,
        raw_change: late_mean - early_mean,
        early_band_count: early_band.len(),
        late_band_count: late_band.len(),
        band_test,
        verdict,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn nov(h: i64) -> Timestamp {
        NaiveDate::from_ymd_opt(2025, 11, 8).unwrap().and_hms_opt(0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn jan(h: i64) -> Timestamp {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap() + Duration::hours(h)
    }

    #[test]
    fn threshold_rules() {
        let ch = Channel::from_pairs("voltage_min", vec![(nov(0), 13.25), (nov(1), 13.19), (nov(2), 13.20)]);
        let dips = ThresholdRule::below(AnomalyKind::VoltageDip, 13.20).scan(ch.view());
        assert_eq!(dips.len(), 1);
        assert_eq!((dips[0].timestamp, dips[0].magnitude), (nov(1), 13.19));
        assert_eq!(dips[0].channel, "voltage_min");

        let spread = Channel::from_pairs("spread", vec![(nov(0), 0.05), (nov(1), 0.07)]);
        let wide = ThresholdRule::above(AnomalyKind::HighSpread, 0.06).scan(spread.view());
        assert_eq!(wide.len(), 1);
        assert_eq!(wide[0].kind, AnomalyKind::HighSpread);
    }

    #[test]
    fn sudden_drops_respect_gaps() {
        let ch = Channel::from_pairs(
            "voltage_min",
            vec![(nov(0), 13.30), (nov(1), 13.26), (nov(2), 13.25), (nov(10), 13.10)],
        );
        let drops = sudden_drop_scan(ch.view(), 0.030, Duration::hours(1));
        assert_eq!(drops.len(), 1);
        assert_eq!(drops[0].timestamp, nov(1));
        assert!((drops[0].magnitude + 0.04).abs() < 1e-9);
    }

    #[test]
    fn two_sigma_bound() {
        let bound = StatisticalBound::new(13.25, 0.01, 2.0).unwrap();
        assert!(bound.is_outlier(13.20));
        assert!(!bound.is_outlier(13.24));
        assert!((bound.lower() - 13.23).abs() < 1e-12);

        let ch = Channel::from_pairs("v", vec![(nov(0), 13.20), (nov(1), 13.24), (nov(2), 13.30)]);
        let events = bound.scan(ch.view());
        assert_eq!(events.len(), 2);
        assert!((events[0].magnitude + 5.0).abs() < 1e-9);
        assert!((events[1].magnitude - 5.0).abs() < 1e-9);

        assert!(StatisticalBound::new(13.25, 0.0, 2.0).is_err());
        assert!(StatisticalBound::new(13.25, 0.01, 0.0).is_err());
    }

    #[test]
    fn bound_from_reference_phase() {
        let reference = Channel::from_pairs("v", (0..10).map(|h| (nov(h), if h % 2 == 0 { 13.24 } else { 13.26 })));
        let bound = StatisticalBound::from_reference(reference.view(), 2.0).unwrap();
        assert!((bound.mean - 13.25).abs() < 1e-12);
        assert!(bound.is_outlier(13.20));
        assert!(!bound.is_outlier(13.25));
    }

    #[test]
    fn band_table() {
        let spread = [0.02, 0.03, 0.05, 0.06, 0.07];
        let volts = [13.35, 13.32, 13.25, 13.15, 13.22];
        let bands = spread_by_band(&spread, &volts, &[13.0, 13.2, 13.3, 13.4]).unwrap();
        assert_eq!(bands.len(), 3);
        assert_eq!((bands[0].count, bands[1].count, bands[2].count), (1, 2, 2));
        assert!((bands[1].mean - 0.06).abs() < 1e-12);
        assert!(spread_by_band(&spread, &volts, &[13.0]).is_err());
        assert!(spread_by_band(&spread, &volts[..2], &[13.0, 14.0]).is_err());
    }

    /// Spread = 0.5 × (13.40 − V) exactly, early voltages 13.20-13.30 V,
    /// late voltages 13.10-13.30 V; `bump` shifts late spreads at equal voltage
    fn voltage_dependent_spread(bump: f64) -> (Channel, Channel) {
        let early = (0..110).map(|i| (nov(i), f64::from(13_200 + 10 * (i % 11) as i32) / 1000.0));
        let late = (0..210).map(|i| (jan(i), f64::from(13_100 + 10 * (i % 21) as i32) / 1000.0));
        let volts: Vec<(Timestamp, f64, f64)> = early
            .map(|(t, v)| (t, v, 0.0))
            .chain(late.map(|(t, v)| (t, v, bump)))
            .collect();

        let voltage = Channel::from_pairs("voltage_mid", volts.iter().map(|(t, v, _)| (*t, *v)));
        let spread = Channel::from_pairs("spread", volts.iter().map(|(t, v, b)| (*t, 0.5 * (13.40 - v) + b)));
        (spread, voltage)
    }

    fn config(min_group: usize) -> DivergenceConfig {
        DivergenceConfig {
            reference: Period { start: nov(0), end: jan(24 * 30) },
            early: Period { start: nov(0), end: nov(24 * 30) },
            late: Period { start: jan(0), end: jan(24 * 30) },
            band_low: 13.195,
            band_high: 13.305,
            correlation_threshold: 0.3,
            alpha: 0.05,
            min_group,
        }
    }

    #[test]
    fn voltage_dependent_spread_is_artifact() {
        let (spread, voltage) = voltage_dependent_spread(0.0);
        let a = assess_divergence(&spread, &voltage, &config(10)).unwrap();

        assert!((a.reference_correlation + 1.0).abs() < 1e-9);
        assert!(a.confounded);
        // Raw before/after comparison alone would suggest growth
        assert!(a.raw_change > 0.02);
        assert_eq!((a.early_band_count, a.late_band_count), (110, 110));
        let test = a.band_test.unwrap();
        assert!(!test.is_significant(0.05));
        assert_eq!(a.verdict, Verdict::Artifact);
    }

    #[test]
    fn same_band_shift_is_divergence() {
        let (spread, voltage) = voltage_dependent_spread(0.02);
        let a = assess_divergence(&spread, &voltage, &config(10)).unwrap();
        assert!(a.band_test.unwrap().p_value < 1e-6);
        assert_eq!(a.verdict, Verdict::Divergence);
    }

    #[test]
    fn single_level_band_is_artifact() {
        let (spread, voltage) = voltage_dependent_spread(0.0);
        let narrow = DivergenceConfig { band_low: 13.245, band_high: 13.255, ..config(5) };
        let a = assess_divergence(&spread, &voltage, &narrow).unwrap();

        assert!(a.confounded);
        assert_eq!((a.early_band_count, a.late_band_count), (10, 10));
        let test = a.band_test.unwrap();
        assert_eq!(test.p_value, 1.0);
        assert_eq!(a.verdict, Verdict::Artifact);
    }

    #[test]
    fn small_groups_are_inconclusive() {
        let (spread, voltage) = voltage_dependent_spread(0.0);
        let a = assess_divergence(&spread, &voltage, &config(200)).unwrap();
        assert_eq!(a.band_test, None);
        assert_eq!(a.verdict, Verdict::Inconclusive);
    }
}
