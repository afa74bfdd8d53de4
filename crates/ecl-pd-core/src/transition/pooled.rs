use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::GradeMatrix;
use crate::config::GradeScale;
use crate::types::{GradeObservation, Percent};

/// Counts over consecutive observations of each obligor, with the totals
/// row and column the portfolio report shows next to the matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PooledTransitionSummary {
    pub matrix: GradeMatrix<u64>,
    pub row_totals: Vec<u64>,
    pub row_default_rate_pct: Vec<Percent>,
    pub column_totals: Vec<u64>,
    pub grand_total: u64,
    /// Share of all counted transitions that land in the default grade.
    pub overall_default_rate_pct: Percent,
}

pub fn pooled_sequential_transitions(
    observations: &[GradeObservation],
    scale: &GradeScale,
    dp: u32,
) -> PooledTransitionSummary {
    let mut by_obligor: BTreeMap<&str, Vec<&GradeObservation>> = BTreeMap::new();
    for obs in observations {
        by_obligor.entry(obs.obligor_id.as_str()).or_default().push(obs);
    }

    let mut matrix: GradeMatrix<u64> = GradeMatrix::zeros(scale);
    for history in by_obligor.values_mut() {
        // stable: same-month observations keep input order
        history.sort_by_key(|o| o.month);
        for pair in history.windows(2) {
            let (from, to) = (pair[0].grade, pair[1].grade);
            if scale.contains(from) && scale.contains(to) {
                matrix.cells[scale.index_of(from)][scale.index_of(to)] += 1;
            }
        }
    }

    let n = matrix.size();
    let default_col = scale.default_index();
    let row_totals: Vec<u64> = (0..n).map(|r| matrix.row_total(r)).collect();
    let row_default_rate_pct = (0..n)
        .map(|r| matrix.row_default_rate_pct(r, default_col, dp))
        .collect();
    let column_totals: Vec<u64> = (0..n).map(|c| matrix.column_total(c)).collect();
    let grand_total: u64 = column_totals.iter().sum();
    let overall_default_rate_pct = if grand_total == 0 {
        Decimal::ZERO
    } else {
        (Decimal::from(column_totals[default_col]) / Decimal::from(grand_total)
            * Decimal::ONE_HUNDRED)
            .round_dp(dp)
    };

    PooledTransitionSummary {
        matrix,
        row_totals,
        row_default_rate_pct,
        column_totals,
        grand_total,
        overall_default_rate_pct,
    }
}
