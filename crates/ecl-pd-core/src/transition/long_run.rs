use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::annual::AnnualAverageMatrix;
use super::GradeMatrix;
use crate::config::{GradeScale, RoundingConfig};
use crate::error::PdModelError;
use crate::types::{Grade, Percent, PoolId};
use crate::PdResult;

/// Long-run averaged grade summary, the per-grade input of calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongRunGradeSummary {
    pub from_grade: Grade,
    /// Averaged number of transitions out of the grade.
    pub total: Decimal,
    pub year_count: u32,
    /// `total` rounded half-to-even to a whole obligor count.
    pub average_clients: u64,
    pub default_rate_pct: Percent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongRunMatrix {
    pub cutoff_year: i32,
    /// Seasoned years averaged, ascending.
    pub years: Vec<i32>,
    pub matrix: GradeMatrix<Decimal>,
    pub grade_summaries: Vec<LongRunGradeSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongRunCell {
    pub pool_id: PoolId,
    pub from_grade: Grade,
    pub to_grade: Grade,
    pub mean_count: Decimal,
}

impl LongRunMatrix {
    pub fn summary(&self, grade: Grade) -> Option<&LongRunGradeSummary> {
        self.grade_summaries.iter().find(|s| s.from_grade == grade)
    }

    pub fn cells(&self, pool_id: &str) -> Vec<LongRunCell> {
        self.matrix
            .entries()
            .map(|(from_grade, to_grade, mean_count)| LongRunCell {
                pool_id: pool_id.to_string(),
                from_grade,
                to_grade,
                mean_count,
            })
            .collect()
    }
}

/// Last seasoned year: the configured cutoff, or the last observed year
/// minus one when none is configured.
pub fn resolve_cutoff_year(annual: &[AnnualAverageMatrix], configured: Option<i32>) -> Option<i32> {
    configured.or_else(|| annual.iter().map(|a| a.year).max().map(|y| y - 1))
}

/// Average the seasoned annual matrices cell by cell.
///
/// The divisor is the number of distinct seasoned years found, so a short
/// history is averaged over what it actually contains.
pub fn long_run_average(
    annual: &[AnnualAverageMatrix],
    scale: &GradeScale,
    cutoff_year: Option<i32>,
    rounding: &RoundingConfig,
) -> PdResult<LongRunMatrix> {
    let cutoff = resolve_cutoff_year(annual, cutoff_year).ok_or_else(|| {
        PdModelError::InsufficientData("no annual matrices to average".into())
    })?;

    let seasoned: Vec<&AnnualAverageMatrix> =
        annual.iter().filter(|a| a.year <= cutoff).collect();
    let years: BTreeSet<i32> = seasoned.iter().map(|a| a.year).collect();
    if years.is_empty() {
        return Err(PdModelError::InsufficientData(format!(
            "no seasoned year on or before {cutoff}"
        )));
    }

    let n = scale.size();
    let divisor = Decimal::from(years.len() as u64);
    let mut matrix: GradeMatrix<Decimal> = GradeMatrix::zeros(scale);
    for i in 0..n {
        for j in 0..n {
            let sum: Decimal = seasoned.iter().map(|a| a.matrix.cells[i][j]).sum();
            matrix.cells[i][j] = (sum / divisor).round_dp(rounding.matrix_dp);
        }
    }

    let default_col = scale.default_index();
    let year_count = years.len() as u32;
    let grade_summaries = (0..n)
        .map(|row| {
            let total = matrix.row_total(row);
            LongRunGradeSummary {
                from_grade: scale.grade_at(row),
                total: total.round_dp(rounding.matrix_dp),
                year_count,
                average_clients: total.round().to_u64().unwrap_or(0),
                default_rate_pct: matrix.row_default_rate_pct(
                    row,
                    default_col,
                    rounding.long_run_pd_dp,
                ),
            }
        })
        .collect();

    Ok(LongRunMatrix {
        cutoff_year: cutoff,
        years: years.into_iter().collect(),
        matrix,
        grade_summaries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn annual(year: i32, stay: Decimal, default: Decimal) -> AnnualAverageMatrix {
        let scale = GradeScale::default();
        let mut matrix: GradeMatrix<Decimal> = GradeMatrix::zeros(&scale);
        matrix.cells[0][0] = stay;
        matrix.cells[0][3] = default;
        matrix.cells[3][3] = dec!(5);
        AnnualAverageMatrix {
            year,
            months_averaged: 12,
            matrix,
        }
    }

    #[test]
    fn test_excludes_unseasoned_years() {
        let data = vec![
            annual(2018, dec!(90), dec!(10)),
            annual(2019, dec!(70), dec!(30)),
            annual(2020, dec!(0), dec!(1000)),
        ];
        let lr = long_run_average(&data, &GradeScale::default(), Some(2019), &RoundingConfig::default())
            .unwrap();
        assert_eq!(lr.years, vec![2018, 2019]);
        assert_eq!(lr.matrix.get(1, 1), dec!(80));
        assert_eq!(lr.matrix.get(1, 4), dec!(20));
        let g1 = lr.summary(1).unwrap();
        assert_eq!(g1.total, dec!(100));
        assert_eq!(g1.default_rate_pct, dec!(20));
        assert_eq!(g1.average_clients, 100);
        assert_eq!(g1.year_count, 2);
    }

    #[test]
    fn test_cutoff_derived_from_last_year() {
        let data = vec![annual(2018, dec!(90), dec!(10)), annual(2019, dec!(0), dec!(50))];
        let lr = long_run_average(&data, &GradeScale::default(), None, &RoundingConfig::default())
            .unwrap();
        assert_eq!(lr.cutoff_year, 2018);
        assert_eq!(lr.years, vec![2018]);
        assert_eq!(lr.matrix.get(1, 4), dec!(10));
    }

    #[test]
    fn test_divisor_adapts_to_years_found() {
        let data = vec![annual(2016, dec!(30), dec!(0)), annual(2018, dec!(60), dec!(0))];
        let lr = long_run_average(&data, &GradeScale::default(), Some(2020), &RoundingConfig::default())
            .unwrap();
        assert_eq!(lr.years.len(), 2);
        assert_eq!(lr.matrix.get(1, 1), dec!(45));
    }

    #[test]
    fn test_no_seasoned_year_is_insufficient() {
        let data = vec![annual(2021, dec!(10), dec!(0))];
        let err = long_run_average(&data, &GradeScale::default(), Some(2020), &RoundingConfig::default())
            .unwrap_err();
        assert!(matches!(err, PdModelError::InsufficientData(_)));
    }

    #[test]
    fn test_empty_row_summary_is_zero() {
        let data = vec![annual(2018, dec!(10), dec!(0))];
        let lr = long_run_average(&data, &GradeScale::default(), Some(2018), &RoundingConfig::default())
            .unwrap();
        let g2 = lr.summary(2).unwrap();
        assert_eq!(g2.total, Decimal::ZERO);
        assert_eq!(g2.default_rate_pct, Decimal::ZERO);
        assert_eq!(g2.average_clients, 0);
    }

    #[test]
    fn test_average_clients_rounds_half_to_even() {
        let data = vec![annual(2018, dec!(2.5), dec!(0))];
        let lr = long_run_average(&data, &GradeScale::default(), Some(2018), &RoundingConfig::default())
            .unwrap();
        assert_eq!(lr.summary(1).unwrap().average_clients, 2);
    }

    #[test]
    fn test_long_run_default_rate_six_places() {
        let data = vec![annual(2018, dec!(2), dec!(1))];
        let lr = long_run_average(&data, &GradeScale::default(), Some(2018), &RoundingConfig::default())
            .unwrap();
        assert_eq!(lr.summary(1).unwrap().default_rate_pct, dec!(33.333333));
    }
}
