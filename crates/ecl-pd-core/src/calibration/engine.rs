use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::regression::{
    clamp_probability, fit_log_odds, log_odds, sigmoid, unique_grades, CalibrationPoint,
    LogOddsFit,
};
use super::solver::{bisect, BisectionOutcome};
use crate::config::{CalibrationConfig, RoundingConfig};
use crate::error::PdModelError;
use crate::types::{round_f64, to_percent, Grade, Percent, PoolId};
use crate::PdResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One calibrated grade. Regression parameters are repeated on every row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRow {
    pub pool_id: PoolId,
    pub year: i32,
    pub grade: Grade,
    pub count: u64,
    /// Clamped input PD.
    pub odr_pct: Percent,
    pub log_odds: Decimal,
    pub fitted_log_odds: Decimal,
    pub fitted_pd_pct: Percent,
    pub calibrated_log_odds: Decimal,
    pub calibrated_pd_pct: Percent,
    pub intercept: Decimal,
    pub slope: Decimal,
    pub calibrated_intercept: Decimal,
    pub portfolio_pd_pct: Percent,
    pub total_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub rows: Vec<CalibrationRow>,
    pub fit: LogOddsFit,
    pub calibrated_intercept: f64,
    /// Clamped target the intercept was solved against.
    pub target_pd: f64,
    /// Count-weighted average calibrated PD, unrounded.
    pub realized_pd: f64,
    pub solver: BisectionOutcome,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

/// Count-weighted mean of `sigmoid(c + slope * grade)`.
pub fn weighted_average_pd(points: &[CalibrationPoint], slope: f64, c: f64) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for p in points {
        let w = p.count as f64;
        num += sigmoid(c + slope * p.grade as f64) * w;
        den += w;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Fit log-odds across grades, then shift the intercept so the
/// count-weighted average PD hits `target_pd`.
pub fn calibrate(
    pool_id: &str,
    year: i32,
    points: &[CalibrationPoint],
    target_pd: f64,
    config: &CalibrationConfig,
    rounding: &RoundingConfig,
) -> PdResult<CalibrationResult> {
    let eps = config.clamp_epsilon;
    let points = unique_grades(points);
    if points.is_empty() {
        return Err(PdModelError::InsufficientData(format!(
            "pool {pool_id} year {year}: no grade data to calibrate"
        )));
    }

    let fit = fit_log_odds(&points, eps)?;

    let total_count: u64 = points.iter().map(|p| p.count).sum();
    if total_count == 0 {
        return Err(PdModelError::InsufficientData(format!(
            "pool {pool_id} year {year}: grade counts sum to zero"
        )));
    }

    let mut warnings = Vec::new();
    let target = clamp_probability(target_pd, eps);
    if target != target_pd {
        warnings.push(format!(
            "Target PD {target_pd} clamped to {target} (epsilon {eps})"
        ));
    }

    let solver = bisect(&config.bisection, target, |c| {
        weighted_average_pd(&points, fit.slope, c)
    });
    if !solver.bracketed {
        warnings.push(format!(
            "Target PD {target} outside the reachable range on [{}, {}]; intercept pinned at {:.6}",
            config.bisection.lower, config.bisection.upper, solver.root
        ));
    }
    let c = solver.root;

    let mut rows: Vec<CalibrationRow> = points
        .iter()
        .map(|p| {
            let pd = clamp_probability(p.pd, eps);
            let fitted = fit.fitted_log_odds(p.grade);
            let calibrated = c + fit.slope * p.grade as f64;
            CalibrationRow {
                pool_id: pool_id.to_string(),
                year,
                grade: p.grade,
                count: p.count,
                odr_pct: to_percent(pd, rounding.rate_dp),
                log_odds: round_f64(log_odds(pd), rounding.log_odds_dp),
                fitted_log_odds: round_f64(fitted, rounding.log_odds_dp),
                fitted_pd_pct: to_percent(sigmoid(fitted), rounding.calibrated_pd_dp),
                calibrated_log_odds: round_f64(calibrated, rounding.log_odds_dp),
                calibrated_pd_pct: to_percent(sigmoid(calibrated), rounding.calibrated_pd_dp),
                intercept: round_f64(fit.intercept, rounding.log_odds_dp),
                slope: round_f64(fit.slope, rounding.log_odds_dp),
                calibrated_intercept: round_f64(c, rounding.log_odds_dp),
                portfolio_pd_pct: Decimal::ZERO,
                total_count,
            }
        })
        .collect();

    // Portfolio PD is built from the reported (rounded) calibrated percentages
    let weighted: Decimal = rows
        .iter()
        .map(|r| r.calibrated_pd_pct * Decimal::from(r.count))
        .sum();
    let portfolio_pd_pct =
        (weighted / Decimal::from(total_count)).round_dp(rounding.portfolio_pd_dp);
    for row in &mut rows {
        row.portfolio_pd_pct = portfolio_pd_pct;
    }

    Ok(CalibrationResult {
        rows,
        fit,
        calibrated_intercept: c,
        target_pd: target,
        realized_pd: weighted_average_pd(&points, fit.slope, c),
        solver,
        warnings,
    })
}
