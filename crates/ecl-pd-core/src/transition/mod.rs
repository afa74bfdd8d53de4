//! Empirical grade-transition estimation.
//!
//! Covers:
//! 1. **Monthly blocks** -- 12-month-ahead transition counts for every month
//!    of the observed span, zero-filled where no look-ahead exists.
//! 2. **Annual averages** -- mean monthly counts per calendar year.
//! 3. **Long-run matrix** -- mean of the seasoned annual matrices plus the
//!    per-grade summary that feeds calibration.
//! 4. **Pooled sequential counts** -- consecutive-observation transitions.
//! 5. **Quality checks** -- monotonicity and absorbing-default warnings.

pub mod annual;
pub mod long_run;
pub mod monthly;
pub mod pooled;
pub mod quality;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::Add;

use crate::config::GradeScale;
use crate::types::{Grade, Percent};

pub use annual::{average_by_year, AnnualAverageCell, AnnualAverageMatrix};
pub use long_run::{long_run_average, LongRunCell, LongRunGradeSummary, LongRunMatrix};
pub use monthly::{
    estimate_monthly_transitions, GradeHistory, MonthlyRowStat, MonthlyTransitionBlock,
    TransitionCell,
};
pub use pooled::{pooled_sequential_transitions, PooledTransitionSummary};
pub use quality::{assess_long_run_quality, MatrixQuality};

/// Dense N×N matrix indexed by grade. Row = from-grade, column = to-grade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeMatrix<T> {
    pub min_grade: Grade,
    pub cells: Vec<Vec<T>>,
}

impl<T> GradeMatrix<T>
where
    T: Copy + Default + Add<Output = T>,
{
    pub fn zeros(scale: &GradeScale) -> Self {
        let n = scale.size();
        Self {
            min_grade: scale.min_grade,
            cells: vec![vec![T::default(); n]; n],
        }
    }

    pub fn size(&self) -> usize {
        self.cells.len()
    }

    pub fn get(&self, from: Grade, to: Grade) -> T {
        self.cells[(from - self.min_grade) as usize][(to - self.min_grade) as usize]
    }

    /// Sum of a row over every to-grade.
    pub fn row_total(&self, row: usize) -> T {
        self.cells[row]
            .iter()
            .fold(T::default(), |acc, &v| acc + v)
    }

    pub fn column_total(&self, col: usize) -> T {
        self.cells
            .iter()
            .fold(T::default(), |acc, row| acc + row[col])
    }

    /// (from-grade, to-grade, value) in row-major order.
    pub fn entries(&self) -> impl Iterator<Item = (Grade, Grade, T)> + '_ {
        let min = self.min_grade;
        self.cells.iter().enumerate().flat_map(move |(i, row)| {
            row.iter()
                .enumerate()
                .map(move |(j, &v)| (min + i as Grade, min + j as Grade, v))
        })
    }
}

impl<T> GradeMatrix<T>
where
    T: Copy + Default + Add<Output = T> + Into<Decimal>,
{
    /// Share of a row landing in `default_col`, as a rounded percentage.
    /// An empty row has rate 0.
    pub fn row_default_rate_pct(&self, row: usize, default_col: usize, dp: u32) -> Percent {
        let total: Decimal = self.row_total(row).into();
        if total.is_zero() {
            return Decimal::ZERO;
        }
        let defaults: Decimal = self.cells[row][default_col].into();
        (defaults / total * Decimal::ONE_HUNDRED).round_dp(dp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> GradeMatrix<u64> {
        GradeMatrix {
            min_grade: 1,
            cells: vec![
                vec![8, 1, 0, 1],
                vec![2, 5, 2, 1],
                vec![0, 0, 0, 0],
                vec![0, 0, 0, 3],
            ],
        }
    }

    #[test]
    fn test_row_and_column_totals() {
        let m = sample();
        assert_eq!(m.row_total(0), 10);
        assert_eq!(m.row_total(2), 0);
        assert_eq!(m.column_total(3), 5);
    }

    #[test]
    fn test_row_default_rate() {
        let m = sample();
        assert_eq!(m.row_default_rate_pct(0, 3, 4), dec!(10));
        assert_eq!(m.row_default_rate_pct(1, 3, 4), dec!(10));
    }

    #[test]
    fn test_empty_row_rate_is_zero_not_nan() {
        let m = sample();
        assert_eq!(m.row_default_rate_pct(2, 3, 4), Decimal::ZERO);
    }

    #[test]
    fn test_entries_are_row_major_with_grades() {
        let m = sample();
        let entries: Vec<_> = m.entries().collect();
        assert_eq!(entries.len(), 16);
        assert_eq!(entries[0], (1, 1, 8));
        assert_eq!(entries[7], (2, 4, 1));
        assert_eq!(m.get(2, 4), 1);
    }
}
