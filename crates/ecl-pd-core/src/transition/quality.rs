use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::long_run::LongRunMatrix;
use crate::config::GradeScale;
use crate::types::Grade;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixQuality {
    /// Worse non-default grades never default less often than better ones
    pub is_monotone: bool,
    /// Default row keeps everything it holds in the default grade
    pub default_row_absorbing: bool,
    /// From-grades with no averaged transitions
    pub empty_rows: Vec<Grade>,
}

/// Sanity checks on a long-run matrix. Findings are warnings, never errors.
pub fn assess_long_run_quality(
    long_run: &LongRunMatrix,
    scale: &GradeScale,
) -> (MatrixQuality, Vec<String>) {
    let mut warnings = Vec::new();
    let matrix = &long_run.matrix;
    let default_idx = scale.default_index();

    let empty_rows: Vec<Grade> = (0..matrix.size())
        .filter(|&row| matrix.row_total(row).is_zero())
        .map(|row| scale.grade_at(row))
        .collect();
    for grade in &empty_rows {
        warnings.push(format!("Grade {grade} has no long-run transitions"));
    }

    // Default row: every non-zero cell must sit in the default column
    let leaked: Decimal = matrix.cells[default_idx]
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != default_idx)
        .map(|(_, v)| *v)
        .sum();
    let default_row_absorbing = leaked.is_zero();
    if !default_row_absorbing {
        warnings.push(format!(
            "Default grade {} is not absorbing ({} averaged transitions leave it)",
            scale.default_grade, leaked
        ));
    }

    let mut is_monotone = true;
    let rated: Vec<(Grade, Decimal)> = long_run
        .grade_summaries
        .iter()
        .filter(|s| s.from_grade != scale.default_grade && !s.total.is_zero())
        .map(|s| (s.from_grade, s.default_rate_pct))
        .collect();
    for pair in rated.windows(2) {
        let (g_i, pd_i) = pair[0];
        let (g_next, pd_next) = pair[1];
        if pd_next < pd_i - dec!(0.0001) {
            is_monotone = false;
            warnings.push(format!(
                "Non-monotone: grade {g_i} default rate {pd_i}% > grade {g_next} default rate {pd_next}%"
            ));
        }
    }

    (
        MatrixQuality {
            is_monotone,
            default_row_absorbing,
            empty_rows,
        },
        warnings,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoundingConfig;
    use crate::transition::annual::AnnualAverageMatrix;
    use crate::transition::long_run::long_run_average;
    use crate::transition::GradeMatrix;

    fn long_run_from(cells: Vec<Vec<Decimal>>) -> LongRunMatrix {
        let annual = vec![AnnualAverageMatrix {
            year: 2019,
            months_averaged: 12,
            matrix: GradeMatrix {
                min_grade: 1,
                cells,
            },
        }];
        long_run_average(
            &annual,
            &GradeScale::default(),
            Some(2019),
            &RoundingConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_well_behaved_matrix() {
        let lr = long_run_from(vec![
            vec![dec!(95), dec!(4), dec!(0), dec!(1)],
            vec![dec!(10), dec!(70), dec!(10), dec!(10)],
            vec![dec!(5), dec!(10), dec!(45), dec!(40)],
            vec![dec!(0), dec!(0), dec!(0), dec!(20)],
        ]);
        let (quality, warnings) = assess_long_run_quality(&lr, &GradeScale::default());
        assert!(quality.is_monotone);
        assert!(quality.default_row_absorbing);
        assert!(quality.empty_rows.is_empty());
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[test]
    fn test_flags_non_monotone_and_cure() {
        let lr = long_run_from(vec![
            vec![dec!(80), dec!(0), dec!(0), dec!(20)],
            vec![dec!(10), dec!(85), dec!(0), dec!(5)],
            vec![dec!(0), dec!(0), dec!(0), dec!(0)],
            vec![dec!(3), dec!(0), dec!(0), dec!(17)],
        ]);
        let (quality, warnings) = assess_long_run_quality(&lr, &GradeScale::default());
        assert!(!quality.is_monotone);
        assert!(!quality.default_row_absorbing);
        assert_eq!(quality.empty_rows, vec![3]);
        assert_eq!(warnings.len(), 3);
    }
}
