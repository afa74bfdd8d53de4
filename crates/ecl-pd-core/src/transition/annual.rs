use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::monthly::MonthlyTransitionBlock;
use super::GradeMatrix;
use crate::config::{GradeScale, SingleMonthYearOverride};
use crate::types::{Grade, PoolId};

/// Mean monthly transition counts of one calendar year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnualAverageMatrix {
    pub year: i32,
    /// Divisor applied to the summed monthly counts.
    pub months_averaged: u32,
    pub matrix: GradeMatrix<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnualAverageCell {
    pub pool_id: PoolId,
    pub year: i32,
    pub from_grade: Grade,
    pub to_grade: Grade,
    pub mean_count: Decimal,
}

/// Average monthly blocks per calendar year.
///
/// The divisor is the number of distinct months present for the year, not a
/// fixed 12. When `single_month_year` names the year, only that month's
/// block is used and the divisor is forced to 1.
pub fn average_by_year(
    blocks: &[MonthlyTransitionBlock],
    scale: &GradeScale,
    single_month_year: Option<SingleMonthYearOverride>,
    dp: u32,
) -> Vec<AnnualAverageMatrix> {
    let mut by_year: BTreeMap<i32, Vec<&MonthlyTransitionBlock>> = BTreeMap::new();
    for block in blocks {
        by_year.entry(block.period.year).or_default().push(block);
    }

    by_year
        .into_iter()
        .map(|(year, year_blocks)| {
            let override_month = single_month_year
                .filter(|ov| ov.year == year)
                .map(|ov| ov.month);

            let selected: Vec<&MonthlyTransitionBlock> = match override_month {
                Some(month) => year_blocks
                    .into_iter()
                    .filter(|b| b.period.month == month)
                    .collect(),
                None => year_blocks,
            };

            let months_averaged = match override_month {
                Some(_) => 1,
                None => {
                    let distinct: BTreeSet<u32> = selected.iter().map(|b| b.period.month).collect();
                    distinct.len().max(1) as u32
                }
            };

            let mut sums: GradeMatrix<u64> = GradeMatrix::zeros(scale);
            for block in &selected {
                for (i, row) in block.counts.cells.iter().enumerate() {
                    for (j, &count) in row.iter().enumerate() {
                        sums.cells[i][j] += count;
                    }
                }
            }

            let divisor = Decimal::from(months_averaged);
            let mut matrix: GradeMatrix<Decimal> = GradeMatrix::zeros(scale);
            for (i, row) in sums.cells.iter().enumerate() {
                for (j, &sum) in row.iter().enumerate() {
                    matrix.cells[i][j] = (Decimal::from(sum) / divisor).round_dp(dp);
                }
            }

            AnnualAverageMatrix {
                year,
                months_averaged,
                matrix,
            }
        })
        .collect()
}

pub fn annual_cells(pool_id: &str, annual: &[AnnualAverageMatrix]) -> Vec<AnnualAverageCell> {
    annual
        .iter()
        .flat_map(|a| {
            a.matrix
                .entries()
                .map(move |(from_grade, to_grade, mean_count)| AnnualAverageCell {
                    pool_id: pool_id.to_string(),
                    year: a.year,
                    from_grade,
                    to_grade,
                    mean_count,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::YearMonth;
    use rust_decimal_macros::dec;

    fn block(year: i32, month: u32, one_to_one: u64, one_to_four: u64) -> MonthlyTransitionBlock {
        let scale = GradeScale::default();
        let mut counts = GradeMatrix::zeros(&scale);
        counts.cells[0][0] = one_to_one;
        counts.cells[0][3] = one_to_four;
        MonthlyTransitionBlock {
            period: YearMonth::new(year, month).unwrap(),
            has_look_ahead: true,
            counts,
        }
    }

    #[test]
    fn test_divides_by_months_present_not_twelve() {
        let blocks = vec![block(2018, 10, 10, 1), block(2018, 11, 20, 2), block(2018, 12, 30, 0)];
        let annual = average_by_year(&blocks, &GradeScale::default(), None, 4);
        assert_eq!(annual.len(), 1);
        assert_eq!(annual[0].months_averaged, 3);
        assert_eq!(annual[0].matrix.get(1, 1), dec!(20));
        assert_eq!(annual[0].matrix.get(1, 4), dec!(1));
    }

    #[test]
    fn test_rounds_to_configured_places() {
        let blocks = vec![block(2018, 1, 1, 0), block(2018, 2, 0, 0), block(2018, 3, 0, 0)];
        let annual = average_by_year(&blocks, &GradeScale::default(), None, 4);
        assert_eq!(annual[0].matrix.get(1, 1), dec!(0.3333));
    }

    #[test]
    fn test_zero_blocks_still_count_as_months() {
        let mut empty = block(2019, 2, 0, 0);
        empty.has_look_ahead = false;
        let blocks = vec![block(2019, 1, 10, 0), empty];
        let annual = average_by_year(&blocks, &GradeScale::default(), None, 4);
        assert_eq!(annual[0].months_averaged, 2);
        assert_eq!(annual[0].matrix.get(1, 1), dec!(5));
    }

    #[test]
    fn test_single_month_year_override() {
        let blocks = vec![
            block(2019, 12, 99, 9),
            block(2020, 1, 12, 2),
            block(2020, 2, 40, 8),
            block(2020, 3, 60, 0),
        ];
        let ov = SingleMonthYearOverride {
            year: 2020,
            month: 1,
        };
        let annual = average_by_year(&blocks, &GradeScale::default(), Some(ov), 4);
        assert_eq!(annual.len(), 2);
        let y2019 = &annual[0];
        assert_eq!(y2019.months_averaged, 1);
        assert_eq!(y2019.matrix.get(1, 1), dec!(99));
        let y2020 = &annual[1];
        assert_eq!(y2020.months_averaged, 1);
        assert_eq!(y2020.matrix.get(1, 1), dec!(12));
        assert_eq!(y2020.matrix.get(1, 4), dec!(2));
    }

    #[test]
    fn test_override_month_absent_gives_zero_matrix() {
        let blocks = vec![block(2020, 5, 12, 2)];
        let ov = SingleMonthYearOverride {
            year: 2020,
            month: 1,
        };
        let annual = average_by_year(&blocks, &GradeScale::default(), Some(ov), 4);
        assert_eq!(annual[0].months_averaged, 1);
        assert!(annual[0].matrix.cells.iter().flatten().all(|v| v.is_zero()));
    }

    #[test]
    fn test_cells_flatten_per_year() {
        let blocks = vec![block(2018, 1, 3, 1), block(2019, 1, 4, 0)];
        let annual = average_by_year(&blocks, &GradeScale::default(), None, 4);
        let cells = annual_cells("sme", &annual);
        assert_eq!(cells.len(), 32);
        assert_eq!(cells[16].year, 2019);
        assert_eq!(cells[16].mean_count, dec!(4));
    }
}
