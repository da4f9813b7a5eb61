//! Pipeline runner
//!
//! Runs every analysis component over a loaded dataset in dependency order:
//!
//! ```text
//! inventory -> filtering -> alignment -> segmentation -> regression -> capacity
//!                                                    \-> anomalies -> divergence
//! ```
//!
//! Nothing in here aborts. Each stage takes what it needs from the dataset
//! and the configuration, and every failed or unconfigured quantity becomes
//! an [`Unavailable`](crate::report::Unavailable) entry. Resting-voltage
//! analyses (phases, capacity, dips) run on the per-interval minimum; level
//! and trend analyses run on the midpoint.

use chrono::Duration;
use serde_json::{json, Value};

use cellwatch_core::align::{as_of, Alignment};
use cellwatch_core::anomaly::{
    assess_divergence, spread_by_band, sudden_drop_scan, AnomalyKind, Period, StatisticalBound, ThresholdRule,
};
use cellwatch_core::capacity::{coulomb_loss_ah, endurance_hours, estimate_between};
use cellwatch_core::channel::names;
use cellwatch_core::constants::time::MV_PER_V;
use cellwatch_core::filter::{bucketize, diurnal_swing, hour_of_day_profile, noise_reduction, smooth};
use cellwatch_core::phase::{day_mean_drift, step_shift, Phase, PhasePlan, StepShift};
use cellwatch_core::regression::{
    coefficient, cumulative_drift, fahrenheit_to_celsius_coefficient, rolling_trend, trend_over, windowed_trends,
    XAxis,
};
use cellwatch_core::{AnalysisError, Channel, Dataset};

use crate::config::AnalysisConfig;
use crate::report::{Report, SummaryTable};
use crate::sources::Loaded;

/// Channel the resting-voltage analyses run on
pub const RESTING_CHANNEL: &str = names::VOLTAGE_MIN;

/// Channel the level and trend analyses run on
pub const LEVEL_CHANNEL: &str = names::VOLTAGE_MID;

const HOURS_PER_YEAR: f64 = 24.0 * 365.0;

/// Results later stages build on
#[derive(Debug, Default)]
struct Carry {
    phases: Vec<Phase>,
    step: Option<StepShift>,
}

/// Run every component and collect the results
pub fn run(dataset: &Dataset, config: &AnalysisConfig) -> Report {
    let mut report = Report::new();

    inventory(dataset, &mut report);
    filtering(dataset, config, &mut report);
    alignment(dataset, config, &mut report);
    let carry = segmentation(dataset, config, &mut report);
    regression(dataset, config, &carry, &mut report);
    capacity(dataset, config, &carry, &mut report);
    anomalies(dataset, config, &carry, &mut report);
    divergence(dataset, config, &mut report);

    log::info!(
        "Report complete: {} tables, {} findings, {} anomalies, {} unavailable",
        report.tables.len(),
        report.findings.len(),
        report.anomalies.len(),
        report.unavailable.len()
    );
    report
}

/// Run over a loaded dataset, leading with the per-source ingestion table
pub fn run_loaded(loaded: &Loaded, config: &AnalysisConfig) -> Report {
    let mut report = run(&loaded.dataset, config);

    let rows = loaded
        .sources
        .iter()
        .flat_map(|source| {
            source.ingest.channels.iter().map(move |(name, stats)| {
                vec![
                    json!(source.path.display().to_string()),
                    json!(name),
                    json!(source.ingest.rows_total),
                    json!(stats.kept),
                    json!(stats.placeholders),
                    json!(stats.unparseable),
                    json!(stats.precision_filtered),
                    json!(stats.duplicates_collapsed),
                ]
            })
        })
        .collect();
    let columns =
        ["source", "channel", "rows", "kept", "placeholders", "unparseable", "precision_filtered", "duplicates"];
    if let Some(table) = report.record("ingestion", SummaryTable::from_rows("ingestion", &columns, rows)) {
        report.tables.insert(0, table);
    }
    report
}

fn emit(report: &mut Report, name: &str, columns: &[&str], rows: Vec<Vec<Value>>) {
    if let Some(table) = report.record(name, SummaryTable::from_rows(name, columns, rows)) {
        report.add_table(table);
    }
}

fn require<'a>(dataset: &'a Dataset, name: &str, quantity: &str, report: &mut Report) -> Option<&'a Channel> {
    let channel = dataset.get(name);
    if channel.is_none() {
        report.mark_missing_channel(quantity, name);
    }
    channel
}

fn mv(volts: f64) -> f64 {
    volts * MV_PER_V
}

fn temperature_celsius(channel: &Channel, fahrenheit: bool) -> Channel {
    if fahrenheit {
        channel.map_values("temperature_c", |f| (f - 32.0) * 5.0 / 9.0)
    } else {
        channel.renamed("temperature_c")
    }
}

fn inventory(dataset: &Dataset, report: &mut Report) {
    let rows = dataset
        .channels()
        .map(|channel| {
            let view = channel.view();
            let (first, last) = match view.time_range() {
                Some((first, last)) => (json!(first), json!(last)),
                None => (Value::Null, Value::Null),
            };
            let interval = view.sampling_interval().ok();
            let missing = interval.and_then(|i| {
                let step = Duration::seconds(i.median_secs.round() as i64);
                view.missing_slots(step).ok().map(|slots| slots.len())
            });
            vec![
                json!(channel.name()),
                json!(channel.len()),
                first,
                last,
                json!(interval.map(|i| i.median_secs)),
                json!(interval.map(|i| i.max_gap_secs)),
                json!(missing),
                json!(view.quantization_step()),
            ]
        })
        .collect();
    emit(
        report,
        "channels",
        &["channel", "samples", "first", "last", "median_interval_secs", "max_gap_secs", "missing_slots", "quantization_step"],
        rows,
    );
}

fn filtering(dataset: &Dataset, config: &AnalysisConfig, report: &mut Report) {
    let f = &config.filtering;
    if let Some(raw) = require(dataset, names::RAW_VOLTAGE, "filtering", report) {
        if let Some(table) = report.record("filtering.buckets", bucketize(raw.view(), f.bucket())) {
            let rows = table
                .qualified(f.min_bucket_samples)
                .map(|b| {
                    vec![
                        json!(b.bucket_start),
                        json!(b.mean),
                        json!(b.std_dev),
                        json!(b.min),
                        json!(b.max),
                        json!(b.count),
                    ]
                })
                .collect();
            emit(report, "buckets", &["bucket_start", "mean", "std_dev", "min", "max", "count"], rows);

            if let Some(profile) = report.record("filtering.noise_profile", table.summary(f.min_bucket_samples)) {
                report.add_finding("noise.within_bucket", mv(profile.within_bucket_noise), "mV");
                report.add_finding("noise.between_bucket", mv(profile.between_bucket_noise), "mV");
                report.add_finding("noise.mean_bucket_range", mv(profile.mean_range), "mV");
                report.add_finding("noise.buckets_used", profile.buckets_used as f64, "buckets");
                report.add_finding("noise.buckets_excluded", profile.buckets_excluded as f64, "buckets");
            }

            let coarse = table.rebucket(f.summary_bucket(), f.min_bucket_samples);
            if let Some(coarse) = report.record("filtering.summary_buckets", coarse) {
                let rows = coarse
                    .buckets()
                    .iter()
                    .map(|b| vec![json!(b.bucket_start), json!(b.mean), json!(b.std_dev), json!(b.count)])
                    .collect();
                emit(report, "summary_buckets", &["bucket_start", "mean", "std_dev", "buckets"], rows);
            }
        }

        let smoothed = smooth(raw.view(), f.sliding_window, "raw_voltage_smoothed");
        if let Some(smoothed) = report.record("filtering.smoothed", smoothed) {
            let reduction = noise_reduction(&raw.view().values(), &smoothed.view().values());
            if let Some(reduction) = report.record("filtering.noise_reduction", reduction) {
                report.add_finding("noise.raw_std", mv(reduction.raw_std), "mV");
                report.add_finding("noise.smoothed_std", mv(reduction.smoothed_std), "mV");
                report.add_finding("noise.reduction", reduction.reduction, "fraction");
            }
        }
    }

    if let Some(level) = require(dataset, LEVEL_CHANNEL, "diurnal", report) {
        if let Some(profile) = report.record("diurnal.profile", hour_of_day_profile(level.view())) {
            let rows = profile
                .iter()
                .map(|h| vec![json!(h.hour), json!(h.mean), json!(h.std_dev), json!(h.count)])
                .collect();
            emit(report, "hour_of_day", &["hour", "mean", "std_dev", "count"], rows);

            let swing = diurnal_swing(&profile, &config.anomaly.day_hours, &config.anomaly.night_hours);
            if let Some(swing) = report.record("diurnal.swing", swing) {
                report.add_finding("diurnal.swing", mv(swing), "mV");
            }
        }
    }
}

fn alignment(dataset: &Dataset, config: &AnalysisConfig, report: &mut Report) {
    let a = &config.alignment;
    let Some(level) = require(dataset, LEVEL_CHANNEL, "alignment", report) else {
        return;
    };

    let mut aligned = Alignment::new(level);
    let mut merged = Vec::new();
    for name in [names::TEMPERATURE_MID, names::HUMIDITY] {
        let Some(secondary) = require(dataset, name, &format!("alignment.{name}"), report) else {
            continue;
        };
        aligned = match aligned.merge(secondary, a.tolerance()) {
            Ok(next) => next,
            Err(e) => {
                report.mark_unavailable("alignment", &e);
                return;
            }
        };
        merged.push(name);
    }

    let rows = merged
        .iter()
        .map(|name| {
            let coverage = aligned.coverage(name);
            vec![json!(name), json!(coverage.matched), json!(coverage.total), json!(coverage.fraction())]
        })
        .collect();
    emit(report, "alignment_coverage", &["channel", "matched", "total", "fraction"], rows);

    if merged.contains(&names::TEMPERATURE_MID) {
        let fit = coefficient(&aligned, names::TEMPERATURE_MID, a.min_coefficient_points);
        if let Some(fit) = report.record("coefficient.temperature", fit) {
            let per_c = if a.temperature_in_fahrenheit {
                fahrenheit_to_celsius_coefficient(fit.slope)
            } else {
                fit.slope
            };
            report.add_finding("coefficient.temperature", mv(per_c), "mV/°C");
            report.add_finding("coefficient.temperature_r", fit.r, "");
            report.add_finding("coefficient.temperature_p", fit.p_value, "");
        }
    }
    if merged.contains(&names::HUMIDITY) {
        let fit = coefficient(&aligned, names::HUMIDITY, a.min_coefficient_points);
        if let Some(fit) = report.record("coefficient.humidity", fit) {
            report.add_finding("coefficient.humidity", mv(fit.slope), "mV/%RH");
            report.add_finding("coefficient.humidity_r", fit.r, "");
            report.add_finding("coefficient.humidity_p", fit.p_value, "");
        }
    }
}

fn segmentation(dataset: &Dataset, config: &AnalysisConfig, report: &mut Report) -> Carry {
    let s = &config.segmentation;
    let mut carry = Carry::default();
    let Some(resting) = require(dataset, RESTING_CHANNEL, "segmentation", report) else {
        return carry;
    };

    if s.phases.is_empty() {
        report.mark_not_configured("segmentation.phases", "phase boundaries");
    } else if let Some(plan) = report.record("segmentation.phases", PhasePlan::new(s.phases.clone())) {
        carry.phases = plan.segment(resting);
        let mut rows = Vec::with_capacity(carry.phases.len());
        for phase in &carry.phases {
            let quantity = format!("phase.{}", phase.name);
            if let Some(st) = report.record(&quantity, phase.stats(resting, s.edge_samples)) {
                rows.push(vec![
                    json!(st.name),
                    json!(st.count),
                    json!(st.first_sample),
                    json!(st.last_sample),
                    json!(st.span_hours),
                    json!(st.mean),
                    json!(st.min),
                    json!(st.max),
                    json!(st.std_dev),
                    json!(st.first_edge_mean),
                    json!(st.last_edge_mean),
                    json!(mv(st.drift)),
                ]);
            }
        }
        emit(
            report,
            "phases",
            &[
                "phase", "count", "first", "last", "span_hours", "mean", "min", "max", "std_dev", "first_edge_mean",
                "last_edge_mean", "drift_mv",
            ],
            rows,
        );
    }

    match s.step_event {
        None => report.mark_not_configured("segmentation.step_shift", "step event"),
        Some(event) => {
            if let Some(shift) = report.record("segmentation.step_shift", step_shift(resting, event, s.step_window())) {
                report.add_finding("step_shift.before_mean", shift.before_mean, "V");
                report.add_finding("step_shift.after_mean", shift.after_mean, "V");
                report.add_finding("step_shift.shift", mv(shift.shift), "mV");
                carry.step = Some(shift);
            }
        }
    }

    match s.drift_days {
        None => report.mark_not_configured("segmentation.day_drift", "drift days"),
        Some(days) => {
            if let Some(level) = require(dataset, LEVEL_CHANNEL, "segmentation.day_drift", report) {
                let drift = day_mean_drift(level, days.from, days.to);
                if let Some(drift) = report.record("segmentation.day_drift", drift) {
                    report.add_finding("day_drift.delta", mv(drift.delta), "mV");
                    report.add_finding("day_drift.rate", mv(drift.per_day), "mV/day");
                }
            }
        }
    }
    carry
}

fn regression(dataset: &Dataset, config: &AnalysisConfig, carry: &Carry, report: &mut Report) {
    let r = &config.regression;
    let Some(level) = require(dataset, LEVEL_CHANNEL, "regression", report) else {
        return;
    };
    let day = Duration::days(1);
    let per_day = XAxis::elapsed(day);

    if let Some(est) = report.record("regression.overall", trend_over(level.view(), per_day)) {
        if let Some(rate) = report.record("regression.overall_rate", est.rate_per(day, MV_PER_V)) {
            report.add_finding("drift.rate", rate, "mV/day");
        }
        report.add_finding("drift.r_squared", est.trend.r_squared, "");
        report.add_finding("drift.p_value", est.trend.p_value, "");
    }

    let rolling = rolling_trend(level.view(), r.rolling_window, XAxis::elapsed(Duration::hours(1)));
    if let Some(rolling) = report.record("regression.rolling", rolling) {
        let rows = rolling
            .iter()
            .map(|est| {
                vec![
                    json!(est.window_start),
                    json!(est.window_end),
                    json!(est.rate_per(day, MV_PER_V).ok()),
                    json!(est.trend.r_squared),
                    json!(est.trend.n),
                ]
            })
            .collect();
        emit(report, "rolling_trends", &["window_start", "window_end", "slope_mv_per_day", "r_squared", "n"], rows);
    }

    let windowed = windowed_trends(level.view(), r.trend_window(), r.min_window_samples, per_day);
    if let Some(windowed) = report.record("regression.windowed", windowed) {
        let rows = windowed
            .trends
            .iter()
            .map(|est| {
                vec![
                    json!(est.window_start),
                    json!(est.window_end),
                    json!(est.rate_per(day, MV_PER_V).ok()),
                    json!(est.trend.r_squared),
                    json!(est.trend.p_value),
                    json!(est.trend.n),
                ]
            })
            .collect();
        emit(
            report,
            "windowed_trends",
            &["window_start", "window_end", "slope_mv_per_day", "r_squared", "p_value", "n"],
            rows,
        );
        report.add_finding("drift.windows_skipped", windowed.skipped as f64, "windows");
    }

    let mut rows = Vec::with_capacity(carry.phases.len());
    for phase in &carry.phases {
        let quantity = format!("phase_trend.{}", phase.name);
        let Some(est) = report.record(&quantity, trend_over(phase.view(level), per_day)) else {
            continue;
        };
        rows.push(vec![
            json!(phase.name),
            json!(est.rate_per(day, MV_PER_V).ok()),
            json!(est.trend.r_squared),
            json!(est.trend.p_value),
            json!(est.trend.n),
        ]);
    }
    if !carry.phases.is_empty() {
        emit(report, "phase_trends", &["phase", "slope_mv_per_day", "r_squared", "p_value", "n"], rows);
    }

    let cumulative = cumulative_drift(level.view(), "cumulative_drift");
    if let Some(last) = cumulative.view().last() {
        report.add_finding("drift.cumulative", mv(last.value), "mV");
    }
}

fn capacity(dataset: &Dataset, config: &AnalysisConfig, carry: &Carry, report: &mut Report) {
    let c = &config.capacity;
    let Some(anchors) = c.anchors else {
        report.mark_not_configured("capacity", "capacity anchors");
        return;
    };
    let Some(resting) = require(dataset, RESTING_CHANNEL, "capacity", report) else {
        return;
    };

    let mut corrections = c.corrections();

    let celsius = dataset
        .get(names::TEMPERATURE_MID)
        .map(|t| temperature_celsius(t, config.alignment.temperature_in_fahrenheit));
    let tolerance = config.alignment.tolerance();
    let lookup = |given: Option<f64>, ts| {
        given.or_else(|| celsius.as_ref().and_then(|ch| as_of(ch.samples(), ts, tolerance)))
    };
    match (lookup(anchors.start_temp_c, anchors.start), lookup(anchors.end_temp_c, anchors.end)) {
        (Some(start), Some(end)) => corrections = corrections.with_temperatures(start, end),
        (start, end) => {
            let available = usize::from(start.is_some()) + usize::from(end.is_some());
            let missing = AnalysisError::InsufficientData { what: "anchor temperatures", required: 2, available };
            report.mark_unavailable("capacity.thermal_correction", &missing);
        }
    }

    let measured_offset = || {
        let event = config.segmentation.step_event?;
        let shift = carry.step?;
        (anchors.start < event && event <= anchors.end).then_some(-shift.shift)
    };
    if let Some(offset) = c.step_offset_v.or_else(measured_offset) {
        corrections = corrections.with_step_offset(offset);
    }

    let model = c.model();
    let est = estimate_between(resting, anchors.start, anchors.end, &model, &corrections);
    let Some(est) = report.record("capacity.estimate", est) else {
        return;
    };
    report.add_finding("capacity.duration", est.duration_hours, "h");
    report.add_finding("capacity.step_offset", mv(corrections.step_offset_v), "mV");
    report.add_finding("capacity.observed_dv", mv(est.observed_dv), "mV");
    report.add_finding("capacity.instrument_corrected_dv", mv(est.instrument_corrected_dv), "mV");
    report.add_finding("capacity.corrected_dv", mv(est.corrected_dv), "mV");
    report.add_finding("capacity.delta_soc", est.delta_soc_percent, "%");
    report.add_finding("capacity.resulting_soc", est.resulting_soc_percent, "%");
    report.add_finding("capacity.delta_ah", est.delta_ah, "Ah");
    report.add_finding("capacity.current", est.current_ma, "mA");
    report.add_finding("capacity.best_case_current", est.best_case_ma, "mA");
    report.add_finding("capacity.worst_case_current", est.worst_case_ma, "mA");
    report.add_finding("capacity.uncertainty", est.uncertainty_ma, "mA");
    report.add_finding("capacity.annual_loss", coulomb_loss_ah(est.current_ma, HOURS_PER_YEAR), "Ah");

    let usable = model.usable_ah(c.usable_fraction);
    if let Some(hours) = report.record("capacity.endurance", endurance_hours(usable, est.current_ma)) {
        report.add_finding("capacity.endurance", hours / 24.0, "days");
    }
}

fn anomalies(dataset: &Dataset, config: &AnalysisConfig, carry: &Carry, report: &mut Report) {
    let a = &config.anomaly;
    let mut events = Vec::new();

    if let Some(resting) = require(dataset, RESTING_CHANNEL, "anomaly.voltage", report) {
        events.extend(ThresholdRule::below(AnomalyKind::VoltageDip, a.voltage_dip_v).scan(resting.view()));
        events.extend(sudden_drop_scan(
            resting.view(),
            a.sudden_drop_v,
            Duration::seconds(a.sudden_drop_max_gap_secs),
        ));

        let reference = match &a.reference_phase {
            Some(name) => carry.phases.iter().find(|p| &p.name == name),
            None => carry.phases.first(),
        };
        match reference {
            None => report.mark_not_configured("anomaly.statistical", "reference phase"),
            Some(phase) => {
                let bound = StatisticalBound::from_reference(phase.view(resting), a.sigma_multiplier);
                if let Some(bound) = report.record("anomaly.statistical", bound) {
                    report.add_finding("anomaly.bound_lower", bound.lower(), "V");
                    report.add_finding("anomaly.bound_upper", bound.upper(), "V");
                    events.extend(bound.scan(resting.view()));
                }
            }
        }
    }

    if let Some(spread) = require(dataset, names::SPREAD, "anomaly.spread", report) {
        events.extend(ThresholdRule::above(AnomalyKind::HighSpread, a.high_spread_v).scan(spread.view()));
    }

    events.sort_by(|x, y| x.timestamp.cmp(&y.timestamp).then_with(|| x.kind.as_str().cmp(y.kind.as_str())));
    log::info!("{} anomaly events flagged", events.len());
    report.anomalies = events;
}

fn divergence(dataset: &Dataset, config: &AnalysisConfig, report: &mut Report) {
    let level = require(dataset, LEVEL_CHANNEL, "divergence", report);
    let spread = require(dataset, names::SPREAD, "divergence", report);
    let (Some(level), Some(spread)) = (level, spread) else {
        return;
    };

    if let Some(paired) = report.record("spread_by_band", Alignment::new(spread).merge(level, Duration::zero())) {
        let (spreads, levels) = paired.complete_pairs(LEVEL_CHANNEL);
        let bands = spread_by_band(&spreads, &levels, &config.anomaly.spread_band_edges);
        if let Some(bands) = report.record("spread_by_band", bands) {
            let rows = bands
                .iter()
                .map(|b| vec![json!(b.low), json!(b.high), json!(mv(b.mean)), json!(mv(b.std_dev)), json!(b.count)])
                .collect();
            emit(report, "spread_by_band", &["band_low", "band_high", "mean_mv", "std_dev_mv", "count"], rows);
        }
    }

    let Some((first, last)) = level.view().time_range() else {
        let empty = AnalysisError::InsufficientData { what: "divergence reference period", required: 1, available: 0 };
        report.mark_unavailable("divergence", &empty);
        return;
    };
    let span = Period { start: first, end: last + Duration::seconds(1) };
    let Some(settings) = config.divergence.resolve(span) else {
        report.mark_not_configured("divergence", "comparison periods");
        return;
    };

    if let Some(assessment) = report.record("divergence", assess_divergence(spread, level, &settings)) {
        let row = vec![
            json!(assessment.reference_correlation),
            json!(assessment.confounded),
            json!(mv(assessment.early_mean)),
            json!(mv(assessment.late_mean)),
            json!(mv(assessment.raw_change)),
            json!(assessment.early_band_count),
            json!(assessment.late_band_count),
            json!(assessment.band_test.as_ref().map(|t| t.t)),
            json!(assessment.band_test.as_ref().map(|t| t.p_value)),
            json!(assessment.verdict),
        ];
        emit(
            report,
            "divergence",
            &[
                "reference_correlation", "confounded", "early_mean_mv", "late_mean_mv", "raw_change_mv",
                "early_band_count", "late_band_count", "t", "p_value", "verdict",
            ],
            vec![row],
        );
    }
}
