//! Phase segmentation
//!
//! ## Overview
//!
//! A long voltage record is divided into named physical phases (pre-test,
//! settlement, drift, post-event) by caller-supplied boundary timestamps.
//! Phase *i* covers `[boundary[i], boundary[i+1])`; the last phase runs to
//! the end of the data and the first phase also absorbs any samples before
//! its boundary. Membership depends on the timestamp only, never the value.
//!
//! ```text
//! data:       |-------------------------------------------|
//! boundaries:      b0 settlement   b1 drift        b2 post
//! phases:     [ settlement        )[ drift         )[ post ...
//! ```
//!
//! Phases are views: [`Phase::view`] borrows the channel's storage for the
//! phase range and statistics are computed on demand.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::channel::{Channel, ChannelView};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::stats::{self, Summary};
use crate::time::{hours_between, Timestamp};

/// Start of a named phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseBoundary {
    /// Phase name
    pub name: String,
    /// First instant of the phase
    pub start: Timestamp,
}

/// Validated, strictly increasing list of phase boundaries
#[derive(Debug, Clone, PartialEq)]
pub struct PhasePlan {
    boundaries: Vec<PhaseBoundary>,
}

impl PhasePlan {
    /// Validate boundaries: non-empty, strictly increasing
    pub fn new(boundaries: Vec<PhaseBoundary>) -> AnalysisResult<Self> {
        if boundaries.is_empty() {
            return Err(AnalysisError::config("phase plan needs at least one boundary"));
        }
        if let Some(w) = boundaries.windows(2).find(|w| w[1].start <= w[0].start) {
            return Err(AnalysisError::config(format!(
                "phase '{}' does not start after phase '{}'",
                w[1].name, w[0].name
            )));
        }
        Ok(Self { boundaries })
    }

    /// Boundaries in order
    pub fn boundaries(&self) -> &[PhaseBoundary] {
        &self.boundaries
    }

    /// Resolve the plan against a channel's time range
    pub fn segment(&self, channel: &Channel) -> Vec<Phase> {
        let data_start = channel.samples().first().map(|s| s.timestamp);
        let phases: Vec<Phase> = self
            .boundaries
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let start = match (i, data_start) {
                    (0, Some(first)) => b.start.min(first),
                    _ => b.start,
                };
                Phase {
                    name: b.name.clone(),
                    start,
                    end: self.boundaries.get(i + 1).map(|next| next.start),
                }
            })
            .collect();
        log::info!("'{}' segmented into {} phases", channel.name(), phases.len());
        phases
    }

    /// Phase by name
    pub fn phase(&self, channel: &Channel, name: &str) -> Option<Phase> {
        self.segment(channel).into_iter().find(|p| p.name == name)
    }
}

/// One resolved phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Phase name
    pub name: String,
    /// Inclusive start
    pub start: Timestamp,
    /// Exclusive end; `None` runs to the end of the data
    pub end: Option<Timestamp>,
}

impl Phase {
    /// Membership predicate
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && self.end.map_or(true, |end| ts < end)
    }

    /// The channel restricted to this phase
    pub fn view<'a>(&self, channel: &'a Channel) -> ChannelView<'a> {
        channel.range(Some(self.start), self.end)
    }

    /// Statistics of the channel within this phase
    ///
    /// `edge` is the number of samples averaged at each end for the drift
    /// figure; it shrinks to the phase length for short phases.
    pub fn stats(&self, channel: &Channel, edge: usize) -> AnalysisResult<PhaseStats> {
        let view = self.view(channel);
        if view.is_empty() {
            log::warn!("phase '{}' has no samples in '{}'", self.name, channel.name());
            return Err(AnalysisError::EmptyPhase { phase: self.name.clone() });
        }
        if edge == 0 {
            return Err(AnalysisError::DegenerateWindow { what: "phase edge window of size zero" });
        }
        let values = view.values();
        let summary = Summary::of(&values)?;
        let edge = edge.min(values.len());
        let first_edge_mean = stats::mean(&values[..edge])?;
        let last_edge_mean = stats::mean(&values[values.len() - edge..])?;
        let (first, last) = view
            .time_range()
            .ok_or_else(|| AnalysisError::EmptyPhase { phase: self.name.clone() })?;

        Ok(PhaseStats {
            name: self.name.clone(),
            count: summary.count,
            mean: summary.mean,
            min: summary.min,
            max: summary.max,
            std_dev: summary.std_dev,
            first_edge_mean,
            last_edge_mean,
            drift: last_edge_mean - first_edge_mean,
            first_sample: first,
            last_sample: last,
            span_hours: hours_between(first, last),
        })
    }
}

/// Per-phase statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
    /// Phase name
    pub name: String,
    /// Samples in the phase
    pub count: usize,
    /// Mean value
    pub mean: f64,
    /// Minimum value
    pub min: f64,
    /// Maximum value
    pub max: f64,
    /// Sample std-dev (0.0 for a single sample)
    pub std_dev: f64,
    /// Mean of the first `edge` samples
    pub first_edge_mean: f64,
    /// Mean of the last `edge` samples
    pub last_edge_mean: f64,
    /// `last_edge_mean - first_edge_mean`
    pub drift: f64,
    /// Timestamp of the first sample
    pub first_sample: Timestamp,
    /// Timestamp of the last sample
    pub last_sample: Timestamp,
    /// Hours between first and last sample
    pub span_hours: f64,
}

/// Baseline offset across a step event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepShift {
    /// Mean over `[event - window, event)`
    pub before_mean: f64,
    /// Mean over `[event, event + window)`
    pub after_mean: f64,
    /// `after_mean - before_mean`
    pub shift: f64,
    /// Samples before the event
    pub before_count: usize,
    /// Samples after the event
    pub after_count: usize,
}

/// Mean level change across an event such as a device-setting change
pub fn step_shift(channel: &Channel, event: Timestamp, window: Duration) -> AnalysisResult<StepShift> {
    if window <= Duration::zero() {
        return Err(AnalysisError::DegenerateWindow { what: "step shift window must be positive" });
    }
    let before = channel.range(Some(event - window), Some(event));
    let after = channel.range(Some(event), Some(event + window));
    if before.is_empty() {
        return Err(AnalysisError::insufficient("samples before step event", 1, 0));
    }
    if after.is_empty() {
        return Err(AnalysisError::insufficient("samples after step event", 1, 0));
    }
    let before_mean = before.mean()?;
    let after_mean = after.mean()?;
    Ok(StepShift {
        before_mean,
        after_mean,
        shift: after_mean - before_mean,
        before_count: before.len(),
        after_count: after.len(),
    })
}

/// Drift between two calendar-day means
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayDrift {
    /// Mean on the first day
    pub from_mean: f64,
    /// Mean on the second day
    pub to_mean: f64,
    /// Whole days between them
    pub days: i64,
    /// `to_mean - from_mean`
    pub delta: f64,
    /// `delta / days`
    pub per_day: f64,
}

/// Compare the mean of one calendar day against another
pub fn day_mean_drift(channel: &Channel, from_day: NaiveDate, to_day: NaiveDate) -> AnalysisResult<DayDrift> {
    let days = (to_day - from_day).num_days();
    if days == 0 {
        return Err(AnalysisError::DivisionByZero { what: "day drift over zero days" });
    }
    let day_mean = |day: NaiveDate| -> AnalysisResult<f64> {
        let start = day.and_hms_opt(0, 0, 0).ok_or(AnalysisError::DegenerateWindow { what: "invalid day" })?;
        let view = channel.range(Some(start), Some(start + Duration::days(1)));
        if view.is_empty() {
            return Err(AnalysisError::insufficient("samples on day", 1, 0));
        }
        view.mean()
    };
    let from_mean = day_mean(from_day)?;
    let to_mean = day_mean(to_day)?;
    let delta = to_mean - from_mean;
    Ok(DayDrift { from_mean, to_mean, days, delta, per_day: delta / days as f64 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, d).unwrap()
    }

    fn at(d: u32, h: u32) -> Timestamp {
        day(d).and_hms_opt(h, 0, 0).unwrap()
    }

    fn boundary(name: &str, ts: Timestamp) -> PhaseBoundary {
        PhaseBoundary { name: name.into(), start: ts }
    }

    /// Hourly samples from Nov 1 00:00 for `days` days, value = hour index in mV above 13.2 V
    fn hourly(days: u32) -> Channel {
        Channel::from_pairs(
            "v",
            (0..days * 24).map(|i| (at(1, 0) + Duration::hours(i64::from(i)), 13.2 + f64::from(i) * 0.001)),
        )
    }

    #[test]
    fn plan_validation() {
        assert!(PhasePlan::new(vec![]).is_err());
        let err = PhasePlan::new(vec![boundary("a", at(2, 0)), boundary("b", at(2, 0))]).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidConfig { .. }));
    }

    #[test]
    fn every_sample_in_exactly_one_phase() {
        let ch = hourly(6);
        let plan = PhasePlan::new(vec![
            boundary("settlement", at(2, 0)),
            boundary("drift", at(3, 12)),
            boundary("post", at(5, 0)),
        ])
        .unwrap();
        let phases = plan.segment(&ch);

        // First phase absorbs the samples before its boundary
        assert_eq!(phases[0].start, at(1, 0));
        assert_eq!(phases[2].end, None);

        let counts: Vec<usize> = phases.iter().map(|p| p.view(&ch).len()).collect();
        assert_eq!(counts, vec![60, 36, 48]);
        assert_eq!(counts.iter().sum::<usize>(), ch.len());
        for s in ch.samples() {
            assert_eq!(phases.iter().filter(|p| p.contains(s.timestamp)).count(), 1);
        }
    }

    #[test]
    fn phase_statistics_and_drift() {
        let ch = hourly(4);
        let plan = PhasePlan::new(vec![boundary("drift", at(2, 0))]).unwrap();
        let phase = &plan.segment(&ch)[0];
        let stats = phase.stats(&ch, 24).unwrap();

        assert_eq!(stats.count, 96);
        assert!((stats.min - 13.2).abs() < 1e-12);
        assert!((stats.max - 13.295).abs() < 1e-9);
        // Edge means are 72 samples apart at 1 mV each
        assert!((stats.drift - 0.072).abs() < 1e-9);
        assert_eq!(stats.span_hours, 95.0);

        // Edge window larger than the phase shrinks to the phase
        let tiny = Channel::from_pairs("v", vec![(at(1, 0), 1.0), (at(1, 1), 3.0)]);
        let st = Phase { name: "t".into(), start: at(1, 0), end: None }.stats(&tiny, 24).unwrap();
        assert_eq!(st.drift, 0.0);
    }

    #[test]
    fn empty_phase_is_reported() {
        let ch = hourly(1);
        let plan = PhasePlan::new(vec![boundary("pre", at(1, 0)), boundary("later", at(20, 0))]).unwrap();
        let phases = plan.segment(&ch);
        match phases[1].stats(&ch, 24) {
            Err(AnalysisError::EmptyPhase { phase }) => assert_eq!(phase, "later"),
            other => panic!("expected empty phase, got {other:?}"),
        }
    }

    #[test]
    fn step_shift_across_event() {
        let ch = Channel::from_pairs(
            "v",
            (0..48).map(|h| (at(1, 0) + Duration::hours(h), if h < 24 { 13.25 } else { 13.241 })),
        );
        let shift = step_shift(&ch, at(2, 0), Duration::hours(24)).unwrap();
        assert!((shift.shift + 0.009).abs() < 1e-9);
        assert_eq!((shift.before_count, shift.after_count), (24, 24));
        assert!(step_shift(&ch, at(1, 0), Duration::hours(24)).is_err());
        assert!(step_shift(&ch, at(2, 0), Duration::zero()).is_err());
    }

    #[test]
    fn calendar_day_drift() {
        let ch = hourly(5);
        let drift = day_mean_drift(&ch, day(1), day(5)).unwrap();
        assert_eq!(drift.days, 4);
        // 96 hours apart at 1 mV per hour
        assert!((drift.delta - 0.096).abs() < 1e-9);
        assert!((drift.per_day - 0.024).abs() < 1e-9);
        assert!(day_mean_drift(&ch, day(1), day(1)).is_err());
        assert!(day_mean_drift(&ch, day(1), day(9)).is_err());
    }
}
