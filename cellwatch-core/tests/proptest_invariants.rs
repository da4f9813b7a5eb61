//! Property tests for the core analysis invariants

#![forbid(unsafe_code)]

use cellwatch_core::align::align;
use cellwatch_core::capacity::{estimate, CapacityModel, Corrections};
use cellwatch_core::channel::Channel;
use cellwatch_core::filter::{bucketize, sliding_mean};
use cellwatch_core::phase::{PhaseBoundary, PhasePlan};
use cellwatch_core::regression::linear_trend;
use cellwatch_core::Timestamp;
use chrono::{Duration, NaiveDate};
use proptest::prelude::*;

const ABS_TOL: f64 = 1e-9;
const REL_TOL: f64 = 1e-9;

fn origin() -> Timestamp {
    NaiveDate::from_ymd_opt(2025, 11, 8)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("valid origin")
}

fn close(actual: f64, expected: f64) -> bool {
    let diff = (actual - expected).abs();
    diff <= ABS_TOL || diff <= REL_TOL * (1.0 + expected.abs())
}

/// Channel from second offsets (in any order) and values
fn channel_from_offsets(offsets: &[i64], values: &[f64]) -> Channel {
    Channel::from_pairs(
        "prop",
        offsets.iter().zip(values).map(|(o, v)| (origin() + Duration::seconds(*o), *v)),
    )
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

    #[test]
    fn ols_recovers_exact_lines(
        slope in -10.0f64..10.0,
        intercept in -100.0f64..100.0,
        xs in prop::collection::btree_set(-1_000i32..1_000, 3..64),
    ) {
        let xs: Vec<f64> = xs.into_iter().map(f64::from).collect();
        let ys: Vec<f64> = xs.iter().map(|x| intercept + slope * x).collect();
        let trend = linear_trend(&xs, &ys).expect("distinct xs");

        prop_assert!((trend.slope - slope).abs() <= 1e-9 * (1.0 + slope.abs()));
        prop_assert!((trend.intercept - intercept).abs() <= 1e-6 * (1.0 + intercept.abs()));
        if slope.abs() > 1e-6 {
            prop_assert!((trend.r_squared - 1.0).abs() <= 1e-9);
        }
    }

    #[test]
    fn self_alignment_with_zero_tolerance_is_identity(
        offsets in prop::collection::vec(0i64..500, 1..128),
        seed in any::<u64>(),
    ) {
        // Offsets repeat often in this range; values differ per sample
        let values: Vec<f64> = (0..offsets.len() as u64).map(|i| ((i ^ seed) % 10_000) as f64 / 1000.0).collect();
        let ch = channel_from_offsets(&offsets, &values);

        let records = align(&ch, &ch, Duration::zero()).expect("zero tolerance is valid");
        prop_assert_eq!(records.len(), ch.len());
        for (record, sample) in records.iter().zip(ch.samples()) {
            prop_assert_eq!(record.timestamp, sample.timestamp);
            prop_assert_eq!(record.secondary("prop"), Some(sample.value));
        }
    }

    #[test]
    fn buckets_are_disjoint_and_cover_input(
        offsets in prop::collection::vec(0i64..200_000, 1..256),
        bucket_secs in 1i64..7_200,
    ) {
        let values: Vec<f64> = offsets.iter().map(|o| (*o % 97) as f64).collect();
        let ch = channel_from_offsets(&offsets, &values);
        let table = bucketize(ch.view(), Duration::seconds(bucket_secs)).expect("positive bucket");

        prop_assert_eq!(table.total_count(), ch.len());
        for pair in table.buckets().windows(2) {
            prop_assert!(pair[0].bucket_start < pair[1].bucket_start);
        }
        for b in table.buckets() {
            prop_assert!(b.count >= 1);
            prop_assert!(b.min <= b.mean + ABS_TOL && b.mean <= b.max + ABS_TOL);
        }
    }

    #[test]
    fn sliding_mean_of_constant_is_constant(
        value in -50.0f64..50.0,
        len in 0usize..200,
        window in 1usize..64,
    ) {
        let means = sliding_mean(&vec![value; len], window).expect("non-zero window");
        prop_assert_eq!(means.len(), len);
        for (i, m) in means.into_iter().enumerate() {
            if i + 1 < window {
                prop_assert!(m.is_none());
            } else {
                prop_assert!(m.is_some_and(|m| close(m, value)));
            }
        }
    }

    #[test]
    fn phases_are_exhaustive_and_exclusive(
        offsets in prop::collection::vec(0i64..1_000_000, 1..128),
        cuts in prop::collection::btree_set(0i64..1_000_000, 1..6),
    ) {
        let values = vec![13.25; offsets.len()];
        let ch = channel_from_offsets(&offsets, &values);
        let boundaries = cuts
            .iter()
            .enumerate()
            .map(|(i, c)| PhaseBoundary { name: format!("p{i}"), start: origin() + Duration::seconds(*c) })
            .collect();
        let plan = PhasePlan::new(boundaries).expect("btree set is strictly increasing");
        let phases = plan.segment(&ch);

        let total: usize = phases.iter().map(|p| p.view(&ch).len()).sum();
        prop_assert_eq!(total, ch.len());
        for s in ch.samples() {
            prop_assert_eq!(phases.iter().filter(|p| p.contains(s.timestamp)).count(), 1);
        }
    }

    #[test]
    fn best_and_worst_case_bracket_the_estimate(
        v_start in 12.8f64..13.6,
        dv in -0.2f64..0.05,
        hours in 1.0f64..5_000.0,
        start_temp in -10.0f64..30.0,
        end_temp in -10.0f64..30.0,
        instrument in 0.0f64..0.005,
        battery in 0.0f64..0.005,
        voltage_u in 0.0f64..0.02,
        temp_u in 0.0f64..3.0,
    ) {
        let corrections = Corrections {
            instrument_coeff_v_per_c: instrument,
            battery_coeff_v_per_c: battery,
            measurement_uncertainty_v: voltage_u,
            temperature_uncertainty_c: temp_u,
            ..Corrections::default().with_temperatures(start_temp, end_temp)
        };
        let est = estimate(v_start, v_start + dv, hours, &CapacityModel::default(), &corrections)
            .expect("positive duration");
        let tol = ABS_TOL * (1.0 + est.current_ma.abs());
        prop_assert!(est.worst_case_ma <= est.current_ma + tol, "{} > {}", est.worst_case_ma, est.current_ma);
        prop_assert!(est.current_ma <= est.best_case_ma + tol, "{} > {}", est.current_ma, est.best_case_ma);
        prop_assert!(close(est.resulting_soc_percent - est.delta_soc_percent, 100.0));
    }
}
