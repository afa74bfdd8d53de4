//! Logistic PD calibration.
//!
//! Covers:
//! 1. **Log-odds regression** -- unweighted OLS of `ln(p / (1 - p))` on grade.
//! 2. **Intercept calibration** -- bisection on the intercept so the
//!    count-weighted average PD matches a target portfolio PD.
//! 3. **Summaries** -- calibration rows grouped per (pool, year), and the
//!    latest calibrated year kept per (pool, grade).
//!
//! Regression and root-finding run in `f64`; every reported figure is
//! rounded into `Decimal`.

pub mod engine;
pub mod regression;
pub mod solver;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Grade, Percent, PoolId};

pub use engine::{calibrate, weighted_average_pd, CalibrationResult, CalibrationRow};
pub use regression::{fit_log_odds, CalibrationPoint, LogOddsFit};
pub use solver::{bisect, BisectionOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationGrade {
    pub grade: Grade,
    pub odr_pct: Percent,
    pub log_odds: Decimal,
    pub fitted_log_odds: Decimal,
    pub fitted_pd_pct: Percent,
    pub calibrated_log_odds: Decimal,
    pub calibrated_pd_pct: Percent,
    pub count: u64,
}

/// Regression parameters of one (pool, year) with its grade rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSummary {
    pub pool_id: PoolId,
    pub year: i32,
    pub intercept: Decimal,
    pub slope: Decimal,
    pub calibrated_intercept: Decimal,
    pub portfolio_pd_pct: Percent,
    pub total_count: u64,
    pub grades: Vec<CalibrationGrade>,
}

pub fn calibration_summaries(rows: &[CalibrationRow]) -> Vec<CalibrationSummary> {
    let mut groups: BTreeMap<(&str, i32), Vec<&CalibrationRow>> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.pool_id.as_str(), row.year))
            .or_default()
            .push(row);
    }

    groups
        .into_iter()
        .filter_map(|((pool_id, year), mut group)| {
            group.sort_by_key(|r| r.grade);
            let first = *group.first()?;
            Some(CalibrationSummary {
                pool_id: pool_id.to_string(),
                year,
                intercept: first.intercept,
                slope: first.slope,
                calibrated_intercept: first.calibrated_intercept,
                portfolio_pd_pct: first.portfolio_pd_pct,
                total_count: first.total_count,
                grades: group
                    .iter()
                    .map(|r| CalibrationGrade {
                        grade: r.grade,
                        odr_pct: r.odr_pct,
                        log_odds: r.log_odds,
                        fitted_log_odds: r.fitted_log_odds,
                        fitted_pd_pct: r.fitted_pd_pct,
                        calibrated_log_odds: r.calibrated_log_odds,
                        calibrated_pd_pct: r.calibrated_pd_pct,
                        count: r.count,
                    })
                    .collect(),
            })
        })
        .collect()
}

/// For each (pool, grade) keep the row of the latest year.
pub fn latest_per_grade(rows: Vec<CalibrationRow>) -> Vec<CalibrationRow> {
    let mut latest: BTreeMap<(PoolId, Grade), CalibrationRow> = BTreeMap::new();
    for row in rows {
        let key = (row.pool_id.clone(), row.grade);
        let newer = latest
            .get(&key)
            .map_or(true, |existing| row.year > existing.year);
        if newer {
            latest.insert(key, row);
        }
    }
    latest.into_values().collect()
}
