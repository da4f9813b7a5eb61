//! Drift and regression engine
//!
//! ## Overview
//!
//! Ordinary least squares is the only fitting method. It is applied in
//! three shapes:
//!
//! - **Global**: one trend over a phase or sub-range ([`trend_over`])
//! - **Rolling**: a fixed-count window advanced one sample at a time
//!   ([`rolling_trend`]), exposing how the drift rate itself changes
//! - **Windowed**: consecutive non-overlapping calendar windows such as
//!   weeks ([`windowed_trends`])
//!
//! The same fit gives thermal and humidity coefficients by regressing the
//! primary channel against an aligned secondary ([`coefficient`]).
//!
//! ## Units
//!
//! A slope is always expressed per unit of the regressor chosen by
//! [`XAxis`]. Converting to e.g. mV/day is an explicit multiplication at the
//! boundary ([`DriftEstimate::rate_per`], [`DriftEstimate::scaled`]).
//!
//! ## Significance
//!
//! `p_value` is the two-sided probability of the observed correlation under
//! a zero-slope hypothesis, from Student's t with `n - 2` degrees of freedom.
//! With exactly two points the fit is exact: `p = 0` unless both y values
//! are equal, in which case `p = 1`.

use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::align::Alignment;
use crate::channel::{Channel, ChannelView, Sample};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::stats::{self, student_t_two_sided};
use crate::time::{elapsed_in, Timestamp};

/// Degrees Fahrenheit per degree Celsius
const FAHRENHEIT_PER_CELSIUS: f64 = 1.8;

/// OLS fit result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearTrend {
    /// Change in y per unit x
    pub slope: f64,
    /// y at x = 0
    pub intercept: f64,
    /// Pearson correlation
    pub r: f64,
    /// Coefficient of determination
    pub r_squared: f64,
    /// Two-sided p-value for a non-zero slope
    pub p_value: f64,
    /// Standard error of the slope
    pub std_err: f64,
    /// Points used
    pub n: usize,
}

impl LinearTrend {
    /// Predicted y at `x`
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Ordinary least squares of `ys` on `xs`
pub fn linear_trend(xs: &[f64], ys: &[f64]) -> AnalysisResult<LinearTrend> {
    if xs.len() != ys.len() {
        return Err(AnalysisError::LengthMismatch { left: xs.len(), right: ys.len() });
    }
    let n = xs.len();
    if n < 2 {
        return Err(AnalysisError::insufficient("linear regression", 2, n));
    }

    let mx = stats::mean(xs)?;
    let my = stats::mean(ys)?;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mx;
        let dy = y - my;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if sxx == 0.0 {
        return Err(AnalysisError::DegenerateWindow { what: "regressor has zero variance" });
    }

    let slope = sxy / sxx;
    let intercept = my - slope * mx;
    let r = if syy == 0.0 { 0.0 } else { (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0) };
    let r_squared = r * r;

    let (p_value, std_err) = if n == 2 {
        (if ys[0] == ys[1] { 1.0 } else { 0.0 }, 0.0)
    } else {
        let df = (n - 2) as f64;
        let unexplained = (1.0 - r) * (1.0 + r);
        let p = if unexplained <= 0.0 {
            0.0
        } else {
            student_t_two_sided(r * (df / unexplained).sqrt(), df)
        };
        (p, (unexplained.max(0.0) * syy / sxx / df).sqrt())
    };

    Ok(LinearTrend { slope, intercept, r, r_squared, p_value, std_err, n })
}

/// Regressor used when fitting a channel against time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum XAxis {
    /// Position within the window (0, 1, 2, ...)
    SampleIndex,
    /// Time since the window's first sample, in units of `unit_secs`
    Elapsed {
        /// Length of one x unit in seconds
        unit_secs: i64,
    },
}

impl XAxis {
    /// Elapsed time measured in `unit`
    pub fn elapsed(unit: Duration) -> Self {
        Self::Elapsed { unit_secs: unit.num_seconds() }
    }

    fn regressors(&self, samples: &[Sample]) -> AnalysisResult<Vec<f64>> {
        match *self {
            Self::SampleIndex => Ok((0..samples.len()).map(|i| i as f64).collect()),
            Self::Elapsed { unit_secs } => {
                let Some(origin) = samples.first().map(|s| s.timestamp) else {
                    return Ok(Vec::new());
                };
                samples
                    .iter()
                    .map(|s| elapsed_in(origin, s.timestamp, Duration::seconds(unit_secs)))
                    .collect()
            }
        }
    }
}

/// A trend over one window of a channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftEstimate {
    /// The fit
    pub trend: LinearTrend,
    /// First sample in the window
    pub window_start: Timestamp,
    /// Last sample in the window
    pub window_end: Timestamp,
    /// Regressor the slope is expressed against
    pub axis: XAxis,
}

impl DriftEstimate {
    /// Slope multiplied by a pure unit factor (e.g. 24 * 1000 for hourly
    /// samples to mV/day)
    pub fn scaled(&self, factor: f64) -> f64 {
        self.trend.slope * factor
    }

    /// Slope per `per` of elapsed time, times `scale`
    ///
    /// Only meaningful for an `Elapsed` axis; a sample-index slope has no
    /// time unit and is rejected.
    pub fn rate_per(&self, per: Duration, scale: f64) -> AnalysisResult<f64> {
        match self.axis {
            XAxis::Elapsed { unit_secs } if unit_secs > 0 => {
                Ok(self.trend.slope * per.num_seconds() as f64 / unit_secs as f64 * scale)
            }
            XAxis::Elapsed { .. } => Err(AnalysisError::DivisionByZero { what: "elapsed axis unit" }),
            XAxis::SampleIndex => Err(AnalysisError::config("sample-index slope has no time unit")),
        }
    }
}

fn fit_samples(samples: &[Sample], axis: XAxis) -> AnalysisResult<DriftEstimate> {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return Err(AnalysisError::insufficient("linear regression", 2, 0));
    };
    let xs = axis.regressors(samples)?;
    let ys: Vec<f64> = samples.iter().map(|s| s.value).collect();
    Ok(DriftEstimate {
        trend: linear_trend(&xs, &ys)?,
        window_start: first.timestamp,
        window_end: last.timestamp,
        axis,
    })
}

/// One global trend over a view
pub fn trend_over(view: ChannelView<'_>, axis: XAxis) -> AnalysisResult<DriftEstimate> {
    fit_samples(view.samples(), axis)
}

/// Trend of every full `window`-sample window, advanced one sample at a time
pub fn rolling_trend(view: ChannelView<'_>, window: usize, axis: XAxis) -> AnalysisResult<Vec<DriftEstimate>> {
    if window < 2 {
        return Err(AnalysisError::DegenerateWindow { what: "rolling window needs at least two samples" });
    }
    if view.len() < window {
        return Err(AnalysisError::insufficient("rolling regression", window, view.len()));
    }
    let trends = view
        .samples()
        .windows(window)
        .map(|w| fit_samples(w, axis))
        .collect::<AnalysisResult<Vec<_>>>()?;
    log::info!("'{}': {} rolling fits of {} samples", view.name(), trends.len(), window);
    Ok(trends)
}

/// Trends over consecutive calendar windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowedTrends {
    /// Fits for windows with enough samples
    pub trends: Vec<DriftEstimate>,
    /// Windows omitted for too few samples
    pub skipped: usize,
}

/// Fit consecutive non-overlapping windows of length `window`, starting at
/// midnight of the first sample's day
pub fn windowed_trends(
    view: ChannelView<'_>,
    window: Duration,
    min_samples: usize,
    axis: XAxis,
) -> AnalysisResult<WindowedTrends> {
    if window <= Duration::zero() {
        return Err(AnalysisError::DegenerateWindow { what: "trend window must be positive" });
    }
    let Some((first, last)) = view.time_range() else {
        return Err(AnalysisError::insufficient("windowed regression", min_samples.max(2), 0));
    };

    let mut start = first.date().and_time(NaiveTime::MIN);
    let mut result = WindowedTrends { trends: Vec::new(), skipped: 0 };
    while start <= last {
        let end = start + window;
        let slice = view.range(Some(start), Some(end));
        if slice.len() >= min_samples.max(2) {
            match trend_over(slice, axis) {
                Ok(est) => result.trends.push(est),
                Err(e) => {
                    log::warn!("window starting {start} unavailable: {e}");
                    result.skipped += 1;
                }
            }
        } else {
            result.skipped += 1;
        }
        start = end;
    }
    Ok(result)
}

/// Regress the primary channel of an alignment against one merged secondary
///
/// The slope is the coefficient (primary units per secondary unit). Fewer
/// than `min_points` complete pairs suppresses the estimate.
pub fn coefficient(alignment: &Alignment, secondary: &str, min_points: usize) -> AnalysisResult<LinearTrend> {
    let (ys, xs) = alignment.complete_pairs(secondary);
    if xs.len() < min_points.max(2) {
        log::warn!(
            "coefficient of '{}' on '{}' suppressed: {} aligned points",
            alignment.primary_name(),
            secondary,
            xs.len()
        );
        return Err(AnalysisError::insufficient("aligned points", min_points.max(2), xs.len()));
    }
    linear_trend(&xs, &ys)
}

/// Convert a per-°F coefficient to per-°C
pub fn fahrenheit_to_celsius_coefficient(per_fahrenheit: f64) -> f64 {
    per_fahrenheit * FAHRENHEIT_PER_CELSIUS
}

/// Every sample minus the first sample
pub fn cumulative_drift(view: ChannelView<'_>, name: &str) -> Channel {
    let origin = view.first().map_or(0.0, |s| s.value);
    Channel::new(
        name,
        view.samples().iter().map(|s| Sample::new(s.timestamp, s.value - origin)).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: i64) -> Timestamp {
        NaiveDate::from_ymd_opt(2025, 11, 8).unwrap().and_hms_opt(0, 0, 0).unwrap() + Duration::hours(h)
    }

    #[test]
    fn perfectly_linear() {
        let xs: Vec<f64> = (0..10).map(f64::from).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 13.3 - 0.002 * x).collect();
        let t = linear_trend(&xs, &ys).unwrap();
        assert!((t.slope + 0.002).abs() < 1e-12);
        assert!((t.intercept - 13.3).abs() < 1e-12);
        assert!((t.r + 1.0).abs() < 1e-12);
        assert!((t.r_squared - 1.0).abs() < 1e-12);
        assert!(t.p_value < 1e-12);
        assert!(t.std_err < 1e-9);
        assert_eq!(t.n, 10);
        assert!((t.predict(5.0) - 13.29).abs() < 1e-12);
    }

    #[test]
    fn known_noisy_fit() {
        // y = [2, 4, 5, 4, 5] on x = 1..5: slope 0.6, intercept 2.2, r^2 = 0.6
        let t = linear_trend(&[1.0, 2.0, 3.0, 4.0, 5.0], &[2.0, 4.0, 5.0, 4.0, 5.0]).unwrap();
        assert!((t.slope - 0.6).abs() < 1e-12);
        assert!((t.intercept - 2.2).abs() < 1e-12);
        assert!((t.r_squared - 0.6).abs() < 1e-12);
        // std_err = sqrt(0.4 * 6 / 10 / 3)
        assert!((t.std_err - 0.08f64.sqrt()).abs() < 1e-12);
        assert!((t.p_value - 0.124_027).abs() < 1e-4);
    }

    #[test]
    fn failure_modes() {
        assert!(matches!(
            linear_trend(&[1.0], &[2.0]),
            Err(AnalysisError::InsufficientData { required: 2, available: 1, .. })
        ));
        assert!(matches!(linear_trend(&[1.0, 2.0], &[2.0]), Err(AnalysisError::LengthMismatch { .. })));
        assert!(matches!(
            linear_trend(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]),
            Err(AnalysisError::DegenerateWindow { .. })
        ));

        let two = linear_trend(&[0.0, 1.0], &[5.0, 5.0]).unwrap();
        assert_eq!((two.slope, two.p_value), (0.0, 1.0));
        assert_eq!(linear_trend(&[0.0, 1.0], &[5.0, 6.0]).unwrap().p_value, 0.0);
    }

    #[test]
    fn time_axis_and_unit_conversion() {
        // -1 mV per hour for two days
        let ch = Channel::from_pairs("v", (0..48).map(|h| (at(h), 13.3 - 0.001 * h as f64)));
        let hourly = trend_over(ch.view(), XAxis::elapsed(Duration::hours(1))).unwrap();
        assert!((hourly.trend.slope + 0.001).abs() < 1e-12);
        let mv_per_day = hourly.rate_per(Duration::days(1), 1000.0).unwrap();
        assert!((mv_per_day + 24.0).abs() < 1e-9);

        let by_index = trend_over(ch.view(), XAxis::SampleIndex).unwrap();
        assert!((by_index.scaled(24.0 * 1000.0) + 24.0).abs() < 1e-9);
        assert!(by_index.rate_per(Duration::days(1), 1000.0).is_err());
        assert_eq!((by_index.window_start, by_index.window_end), (at(0), at(47)));
    }

    #[test]
    fn rolling_slopes_track_rate_change() {
        // Flat for 24 h, then falling 2 mV/h
        let ch = Channel::from_pairs(
            "v",
            (0..48).map(|h| (at(h), if h < 24 { 13.3 } else { 13.3 - 0.002 * (h - 23) as f64 })),
        );
        let rolling = rolling_trend(ch.view(), 12, XAxis::SampleIndex).unwrap();
        assert_eq!(rolling.len(), 48 - 12 + 1);
        assert!(rolling[0].trend.slope.abs() < 1e-12);
        assert!((rolling.last().unwrap().trend.slope + 0.002).abs() < 1e-12);

        assert!(rolling_trend(ch.view(), 1, XAxis::SampleIndex).is_err());
        assert!(matches!(
            rolling_trend(ch.view(), 100, XAxis::SampleIndex),
            Err(AnalysisError::InsufficientData { required: 100, available: 48, .. })
        ));
    }

    #[test]
    fn weekly_windows_skip_sparse() {
        // 9 days hourly: one full week, then a 48-sample remainder
        let ch = Channel::from_pairs("v", (0..9 * 24).map(|h| (at(h), 13.3 - 0.0001 * h as f64)));
        let weekly = windowed_trends(ch.view(), Duration::days(7), 48, XAxis::elapsed(Duration::days(1))).unwrap();
        assert_eq!((weekly.trends.len(), weekly.skipped), (2, 0));
        assert_eq!(weekly.trends[0].window_start, at(0));
        assert_eq!(weekly.trends[1].window_start, at(7 * 24));
        assert!((weekly.trends[0].trend.slope + 0.0024).abs() < 1e-9);

        let strict = windowed_trends(ch.view(), Duration::days(7), 100, XAxis::SampleIndex).unwrap();
        assert_eq!((strict.trends.len(), strict.skipped), (1, 1));
    }

    #[test]
    fn thermal_coefficient_from_alignment() {
        let v = Channel::from_pairs("v", (0..12).map(|h| (at(h), 13.25 + 0.004 * (h % 4) as f64)));
        let temp = Channel::from_pairs("t", (0..12).map(|h| (at(h), 5.0 + 2.0 * (h % 4) as f64)));
        let alignment = Alignment::new(&v).merge(&temp, Duration::hours(1)).unwrap();

        let c = coefficient(&alignment, "t", 10).unwrap();
        assert!((c.slope - 0.002).abs() < 1e-12);
        assert!((c.r - 1.0).abs() < 1e-12);

        assert!(matches!(
            coefficient(&alignment, "t", 20),
            Err(AnalysisError::InsufficientData { required: 20, available: 12, .. })
        ));
        assert!((fahrenheit_to_celsius_coefficient(0.001) - 0.0018).abs() < 1e-15);
    }

    #[test]
    fn cumulative_from_first_sample() {
        let ch = Channel::from_pairs("v", vec![(at(0), 13.30), (at(1), 13.29), (at(2), 13.31)]);
        let cum = cumulative_drift(ch.view(), "v_cum");
        assert_eq!(cum.name(), "v_cum");
        assert_eq!(cum.samples()[0].value, 0.0);
        assert!((cum.samples()[1].value + 0.01).abs() < 1e-12);
    }
}
