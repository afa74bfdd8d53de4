use ecl_pd_core::calibration::{calibrate, weighted_average_pd, CalibrationPoint};
use ecl_pd_core::config::{CalibrationConfig, RoundingConfig};
use ecl_pd_core::forward_pd::{compute_pd_curves, pit_pd};
use proptest::prelude::*;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_survival_and_marginal_conserve_mass(
        ttc in 0.001f64..0.999,
        rho in 0.01f64..0.99,
        z_path in proptest::collection::vec(-3.0f64..3.0, 1..10),
    ) {
        let curve = compute_pd_curves(ttc, rho, &z_path).unwrap();
        let h = z_path.len();
        prop_assert_eq!(curve.survival.len(), h + 1);
        prop_assert_eq!(curve.survival[0], 1.0);
        for i in 0..h {
            prop_assert!(curve.pit[i] >= 0.0 && curve.pit[i] <= 1.0);
            prop_assert!(curve.survival[i + 1] <= curve.survival[i]);
        }
        let mass: f64 = curve.marginal.iter().sum::<f64>() + curve.survival[h];
        prop_assert!((mass - 1.0).abs() < 1e-12, "mass = {}", mass);
    }

    #[test]
    fn prop_pit_rises_as_shock_worsens(
        ttc in 0.001f64..0.5,
        rho in 0.01f64..0.5,
        z in -3.0f64..3.0,
        delta in 0.01f64..2.0,
    ) {
        let better = pit_pd(ttc, rho, z + delta).unwrap();
        let worse = pit_pd(ttc, rho, z).unwrap();
        prop_assert!(worse >= better);
    }

    #[test]
    fn prop_calibration_round_trip(
        intercept in -6.0f64..-1.0,
        slope in 0.2f64..1.5,
        counts in proptest::collection::vec(1u64..5_000, 3),
    ) {
        let points: Vec<CalibrationPoint> = (1..=3u8)
            .zip(counts.iter())
            .map(|(grade, &count)| CalibrationPoint {
                grade,
                pd: sigmoid(intercept + slope * grade as f64),
                count,
            })
            .collect();
        let target = weighted_average_pd(&points, slope, intercept);
        let result = calibrate(
            "prop",
            2020,
            &points,
            target,
            &CalibrationConfig::default(),
            &RoundingConfig::default(),
        )
        .unwrap();
        prop_assert!(result.warnings.is_empty());
        prop_assert!(
            (result.calibrated_intercept - intercept).abs() < 1e-4,
            "offset = {}",
            result.calibrated_intercept - intercept
        );
    }
}
