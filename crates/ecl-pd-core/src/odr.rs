//! Observed default rates.
//!
//! The yearly ODR is the share of averaged transitions out of non-default
//! grades that land in the default grade:
//!
//! ```text
//! ODR(year) = Σ_{g ≠ D} m[g][D] / Σ_{g ≠ D} Σ_j m[g][j]
//! ```
//!
//! Reported as a percentage. A year with no transitions has ODR 0.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::GradeScale;
use crate::transition::{AnnualAverageMatrix, GradeMatrix};
use crate::types::{Percent, PoolId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedDefaultRate {
    pub pool_id: PoolId,
    pub year: i32,
    pub rate_pct: Percent,
}

/// Numerator and denominator of the ODR for one averaged matrix.
pub fn default_exposure(matrix: &GradeMatrix<Decimal>, scale: &GradeScale) -> (Decimal, Decimal) {
    let default_idx = scale.default_index();
    (0..matrix.size())
        .filter(|&row| row != default_idx)
        .fold((Decimal::ZERO, Decimal::ZERO), |(defaults, total), row| {
            (
                defaults + matrix.cells[row][default_idx],
                total + matrix.row_total(row),
            )
        })
}

pub fn observed_default_rate(matrix: &GradeMatrix<Decimal>, scale: &GradeScale, dp: u32) -> Percent {
    let (defaults, total) = default_exposure(matrix, scale);
    if total.is_zero() {
        return Decimal::ZERO;
    }
    (defaults / total * Decimal::ONE_HUNDRED).round_dp(dp)
}

/// One ODR per annual matrix, ordered by year.
pub fn observed_default_rates(
    pool_id: &str,
    annual: &[AnnualAverageMatrix],
    scale: &GradeScale,
    dp: u32,
) -> Vec<ObservedDefaultRate> {
    let mut rates: Vec<ObservedDefaultRate> = annual
        .iter()
        .map(|a| ObservedDefaultRate {
            pool_id: pool_id.to_string(),
            year: a.year,
            rate_pct: observed_default_rate(&a.matrix, scale, dp),
        })
        .collect();
    rates.sort_by_key(|r| r.year);
    rates
}
