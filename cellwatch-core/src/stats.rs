//! Descriptive and inferential statistics shared by the analysis components
//!
//! ## Overview
//!
//! Every higher-level component (filtering, segmentation, regression,
//! divergence detection) reduces to a handful of primitives: mean, sample
//! standard deviation, Pearson correlation and a two-sample Student t-test.
//! They live here so the evidence policy is applied in exactly one place:
//! a statistic that lacks samples returns `InsufficientData` instead of NaN.
//!
//! ## Conventions
//!
//! - Standard deviations are *sample* deviations (`n - 1` denominator)
//! - Two-sided p-values come from the Student t distribution, evaluated via
//!   the regularised incomplete beta function
//! - Non-finite inputs are the caller's responsibility; ingestion never
//!   produces them

use serde::{Deserialize, Serialize};

use crate::errors::{AnalysisError, AnalysisResult};

/// Continued-fraction iteration cap for the incomplete beta
const BETA_MAX_ITERATIONS: usize = 300;
/// Convergence tolerance for the continued fraction
const BETA_EPSILON: f64 = 3.0e-16;
/// Guard against division by zero in Lentz's method
const BETA_FPMIN: f64 = 1.0e-300;

/// Arithmetic mean
pub fn mean(values: &[f64]) -> AnalysisResult<f64> {
    if values.is_empty() {
        return Err(AnalysisError::insufficient("mean", 1, 0));
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample variance (n - 1 denominator)
pub fn sample_variance(values: &[f64]) -> AnalysisResult<f64> {
    if values.len() < 2 {
        return Err(AnalysisError::insufficient("sample variance", 2, values.len()));
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Ok(ss / (values.len() - 1) as f64)
}

/// Sample standard deviation (n - 1 denominator)
pub fn sample_std(values: &[f64]) -> AnalysisResult<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// Median of an unsorted slice
pub fn median(values: &[f64]) -> AnalysisResult<f64> {
    if values.is_empty() {
        return Err(AnalysisError::insufficient("median", 1, 0));
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Ok(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Descriptive summary of a sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Number of values
    pub count: usize,
    /// Arithmetic mean
    pub mean: f64,
    /// Sample standard deviation, 0.0 for a single value
    pub std_dev: f64,
    /// Smallest value
    pub min: f64,
    /// Largest value
    pub max: f64,
}

impl Summary {
    /// Summarise a non-empty slice
    pub fn of(values: &[f64]) -> AnalysisResult<Self> {
        let mean = mean(values)?;
        let std_dev = if values.len() > 1 { sample_std(values)? } else { 0.0 };
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        Ok(Self { count: values.len(), mean, std_dev, min, max })
    }

    /// Max minus min
    pub fn range(&self) -> f64 {
        self.max - self.min
    }
}

/// Pearson product-moment correlation
///
/// Fails with `DegenerateWindow` when either input has zero variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> AnalysisResult<f64> {
    if xs.len() != ys.len() {
        return Err(AnalysisError::LengthMismatch { left: xs.len(), right: ys.len() });
    }
    if xs.len() < 2 {
        return Err(AnalysisError::insufficient("correlation", 2, xs.len()));
    }
    let mx = mean(xs)?;
    let my = mean(ys)?;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mx;
        let dy = y - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return Err(AnalysisError::DegenerateWindow { what: "zero variance in correlation input" });
    }
    Ok((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// Outcome of a two-sample Student t-test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TTest {
    /// t statistic (positive when the first group's mean is larger)
    pub t: f64,
    /// Two-sided p-value
    pub p_value: f64,
    /// Degrees of freedom (n1 + n2 - 2)
    pub df: f64,
    /// Size of the first group
    pub n1: usize,
    /// Size of the second group
    pub n2: usize,
}

impl TTest {
    /// Significant at level `alpha`
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}

/// Relative size below which a standard error or mean difference counts as zero
const ZERO_SPREAD_REL: f64 = 1e-12;

/// Independent two-sample t-test assuming equal variances (pooled)
///
/// Zero pooled variance is not an error: equal means give `p = 1`,
/// different means give `p = 0`.
pub fn t_test_ind(a: &[f64], b: &[f64]) -> AnalysisResult<TTest> {
    if a.len() < 2 {
        return Err(AnalysisError::insufficient("t-test group", 2, a.len()));
    }
    if b.len() < 2 {
        return Err(AnalysisError::insufficient("t-test group", 2, b.len()));
    }
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let df = n1 + n2 - 2.0;
    let pooled = ((n1 - 1.0) * sample_variance(a)? + (n2 - 1.0) * sample_variance(b)?) / df;
    let se = (pooled * (1.0 / n1 + 1.0 / n2)).sqrt();
    let (mean_a, mean_b) = (mean(a)?, mean(b)?);
    let (n1, n2) = (a.len(), b.len());

    // Both groups constant
    let scale = mean_a.abs().max(mean_b.abs()).max(1.0) * ZERO_SPREAD_REL;
    if se <= scale {
        let diff = mean_a - mean_b;
        return Ok(if diff.abs() <= scale {
            TTest { t: 0.0, p_value: 1.0, df, n1, n2 }
        } else {
            TTest { t: f64::INFINITY.copysign(diff), p_value: 0.0, df, n1, n2 }
        });
    }
    let t = (mean_a - mean_b) / se;
    Ok(TTest { t, p_value: student_t_two_sided(t, df), df, n1, n2 })
}

/// Two-sided tail probability `P(|T| >= |t|)` for Student's t with `df` degrees of freedom
pub fn student_t_two_sided(t: f64, df: f64) -> f64 {
    if !t.is_finite() {
        return 0.0;
    }
    let x = df / (df + t * t);
    regularized_incomplete_beta(x, df / 2.0, 0.5).clamp(0.0, 1.0)
}

/// Regularised incomplete beta `I_x(a, b)`
pub fn regularized_incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front =
        libm::lgamma(a + b) - libm::lgamma(a) - libm::lgamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    // Continued fraction converges fastest on this side of the mode
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(x, a, b) / a
    } else {
        1.0 - front * beta_continued_fraction(1.0 - x, b, a) / b
    }
}

/// Modified Lentz evaluation of the incomplete beta continued fraction
fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    let guard = |v: f64| if v.abs() < BETA_FPMIN { BETA_FPMIN } else { v };

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 / guard(1.0 - qab * x / qap);
    let mut h = d;

    for m in 1..=BETA_MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / guard(1.0 + aa * d);
        c = guard(1.0 + aa / c);
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / guard(1.0 + aa * d);
        c = guard(1.0 + aa / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < BETA_EPSILON {
            break;
        }
    }
    h
}
