use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::PdModelError;
use crate::types::Grade;
use crate::PdResult;

/// Denominators below this are treated as a singular design.
const MIN_DENOMINATOR: f64 = 1e-12;

/// One grade's long-run PD and weight as fed to calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub grade: Grade,
    /// Raw probability in [0, 1]; clamped before use.
    pub pd: f64,
    pub count: u64,
}

/// Ordinary least squares fit `ln(p / (1 - p)) = intercept + slope * grade`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogOddsFit {
    pub intercept: f64,
    pub slope: f64,
}

impl LogOddsFit {
    pub fn fitted_log_odds(&self, grade: Grade) -> f64 {
        self.intercept + self.slope * grade as f64
    }
}

pub fn clamp_probability(p: f64, epsilon: f64) -> f64 {
    p.clamp(epsilon, 1.0 - epsilon)
}

pub fn log_odds(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Keep the first point seen for each grade, ordered by grade.
pub fn unique_grades(points: &[CalibrationPoint]) -> Vec<CalibrationPoint> {
    let mut by_grade: BTreeMap<Grade, CalibrationPoint> = BTreeMap::new();
    for p in points {
        by_grade.entry(p.grade).or_insert(*p);
    }
    by_grade.into_values().collect()
}

/// Unweighted OLS of clamped log-odds on grade rank.
///
/// Counts are not used by the fit; they only weight the portfolio
/// average used to place the calibrated intercept.
pub fn fit_log_odds(points: &[CalibrationPoint], epsilon: f64) -> PdResult<LogOddsFit> {
    let pts = unique_grades(points);
    if pts.len() < 2 {
        return Err(PdModelError::DegenerateRegression(format!(
            "need at least 2 distinct grades, got {}",
            pts.len()
        )));
    }

    let n = pts.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xx = 0.0;
    let mut sum_xy = 0.0;
    for p in &pts {
        let x = p.grade as f64;
        let y = log_odds(clamp_probability(p.pd, epsilon));
        sum_x += x;
        sum_y += y;
        sum_xx += x * x;
        sum_xy += x * y;
    }

    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() < MIN_DENOMINATOR {
        return Err(PdModelError::DegenerateRegression(format!(
            "regression denominator {denom:e} is numerically zero"
        )));
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;
    Ok(LogOddsFit { intercept, slope })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    fn point(grade: Grade, pd: f64) -> CalibrationPoint {
        CalibrationPoint {
            grade,
            pd,
            count: 10,
        }
    }

    #[test]
    fn test_exact_line_recovered() {
        let pts: Vec<_> = (1..=3)
            .map(|g| point(g, sigmoid(-5.0 + 1.5 * g as f64)))
            .collect();
        let fit = fit_log_odds(&pts, 1e-4).unwrap();
        assert!(approx_eq(fit.intercept, -5.0, 1e-9), "a = {}", fit.intercept);
        assert!(approx_eq(fit.slope, 1.5, 1e-9), "b = {}", fit.slope);
        assert!(approx_eq(fit.fitted_log_odds(2), -2.0, 1e-9));
    }

    #[test]
    fn test_clamp_keeps_log_odds_finite() {
        let fit = fit_log_odds(&[point(1, 0.0), point(2, 1.0)], 1e-4).unwrap();
        assert!(fit.intercept.is_finite());
        assert!(fit.slope.is_finite());
        let y1 = log_odds(1e-4);
        let y2 = log_odds(1.0 - 1e-4);
        assert!(approx_eq(fit.slope, y2 - y1, 1e-9));
    }

    #[test]
    fn test_single_grade_is_degenerate() {
        let err = fit_log_odds(&[point(2, 0.1)], 1e-4).unwrap_err();
        assert!(matches!(err, PdModelError::DegenerateRegression(_)));
    }

    #[test]
    fn test_duplicate_grades_collapse_to_first() {
        let pts = vec![point(1, 0.01), point(1, 0.5), point(1, 0.9)];
        let err = fit_log_odds(&pts, 1e-4).unwrap_err();
        assert!(matches!(err, PdModelError::DegenerateRegression(_)));

        let unique = unique_grades(&[point(2, 0.2), point(1, 0.01), point(2, 0.7)]);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].grade, 1);
        assert!(approx_eq(unique[1].pd, 0.2, 1e-15));
    }
}
