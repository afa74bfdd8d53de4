use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::GradeMatrix;
use crate::config::GradeScale;
use crate::error::PdModelError;
use crate::types::{Grade, GradeObservation, Percent, PoolId, YearMonth};
use crate::PdResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Transition counts from `period` to `period + look_ahead`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyTransitionBlock {
    pub period: YearMonth,
    /// False when the look-ahead month lies beyond the observed span; the
    /// block is then all zeros but still present.
    pub has_look_ahead: bool,
    pub counts: GradeMatrix<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionCell {
    pub pool_id: PoolId,
    pub period: YearMonth,
    pub from_grade: Grade,
    pub to_grade: Grade,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyRowStat {
    pub pool_id: PoolId,
    pub period: YearMonth,
    pub from_grade: Grade,
    pub total_count: u64,
    pub default_rate_pct: Percent,
}

// ---------------------------------------------------------------------------
// Grade history index
// ---------------------------------------------------------------------------

/// Immutable month → obligor → grade index built once per pool.
///
/// When an obligor carries several grades in the same month, the first one
/// in input order is kept.
#[derive(Debug, Clone, Default)]
pub struct GradeHistory {
    by_month: BTreeMap<YearMonth, BTreeMap<String, Grade>>,
}

impl GradeHistory {
    pub fn build(observations: &[GradeObservation]) -> Self {
        let mut by_month: BTreeMap<YearMonth, BTreeMap<String, Grade>> = BTreeMap::new();
        for obs in observations {
            by_month
                .entry(obs.month)
                .or_default()
                .entry(obs.obligor_id.clone())
                .or_insert(obs.grade);
        }
        Self { by_month }
    }

    pub fn is_empty(&self) -> bool {
        self.by_month.is_empty()
    }

    pub fn first_month(&self) -> Option<YearMonth> {
        self.by_month.keys().next().copied()
    }

    pub fn last_month(&self) -> Option<YearMonth> {
        self.by_month.keys().next_back().copied()
    }

    /// Contiguous month span from first to last observed month.
    pub fn month_span(&self) -> Vec<YearMonth> {
        match (self.first_month(), self.last_month()) {
            (Some(first), Some(last)) => YearMonth::span(first, last),
            _ => Vec::new(),
        }
    }

    pub fn grades_in(&self, month: YearMonth) -> Option<&BTreeMap<String, Grade>> {
        self.by_month.get(&month)
    }

    pub fn distinct_grades(&self, scale: &GradeScale) -> BTreeSet<Grade> {
        self.by_month
            .values()
            .flat_map(|m| m.values().copied())
            .filter(|g| scale.contains(*g))
            .collect()
    }

    /// Count obligors graded in both months. Out-of-range grades are skipped.
    pub fn count_transitions(
        &self,
        from: YearMonth,
        to: YearMonth,
        scale: &GradeScale,
    ) -> GradeMatrix<u64> {
        let mut counts = GradeMatrix::zeros(scale);
        let (Some(from_grades), Some(to_grades)) =
            (self.by_month.get(&from), self.by_month.get(&to))
        else {
            return counts;
        };
        for (obligor, &g_from) in from_grades {
            let Some(&g_to) = to_grades.get(obligor) else {
                continue;
            };
            if !scale.contains(g_from) || !scale.contains(g_to) {
                continue;
            }
            counts.cells[scale.index_of(g_from)][scale.index_of(g_to)] += 1;
        }
        counts
    }
}

// ---------------------------------------------------------------------------
// Estimation
// ---------------------------------------------------------------------------

/// Build one transition block per month of the observed span.
///
/// Months whose look-ahead month falls outside the span yield a zero block
/// rather than being skipped, so that annual averages divide by every month
/// present in the year.
pub fn estimate_monthly_transitions(
    history: &GradeHistory,
    scale: &GradeScale,
    look_ahead_months: u32,
) -> PdResult<Vec<MonthlyTransitionBlock>> {
    if history.is_empty() {
        return Err(PdModelError::InsufficientData(
            "no grade observations supplied".into(),
        ));
    }
    let distinct = history.distinct_grades(scale);
    if distinct.len() < 2 {
        return Err(PdModelError::InsufficientData(format!(
            "at least 2 distinct grades within {}..={} are required, found {}",
            scale.min_grade,
            scale.max_grade,
            distinct.len()
        )));
    }

    let span = history.month_span();
    let last = span[span.len() - 1];
    let blocks = span
        .iter()
        .map(|&period| {
            let target = period.add_months(look_ahead_months as i64);
            let has_look_ahead = target <= last;
            let counts = if has_look_ahead {
                history.count_transitions(period, target, scale)
            } else {
                GradeMatrix::zeros(scale)
            };
            MonthlyTransitionBlock {
                period,
                has_look_ahead,
                counts,
            }
        })
        .collect();

    Ok(blocks)
}

/// Flatten blocks into dense transition cells, zero cells included.
pub fn transition_cells(pool_id: &str, blocks: &[MonthlyTransitionBlock]) -> Vec<TransitionCell> {
    blocks
        .iter()
        .flat_map(|b| {
            b.counts
                .entries()
                .map(move |(from_grade, to_grade, count)| TransitionCell {
                    pool_id: pool_id.to_string(),
                    period: b.period,
                    from_grade,
                    to_grade,
                    count,
                })
        })
        .collect()
}

/// Per-month, per-from-grade totals and default rates.
pub fn monthly_row_stats(
    pool_id: &str,
    blocks: &[MonthlyTransitionBlock],
    scale: &GradeScale,
    dp: u32,
) -> Vec<MonthlyRowStat> {
    let default_col = scale.default_index();
    blocks
        .iter()
        .flat_map(|b| {
            (0..b.counts.size()).map(move |row| MonthlyRowStat {
                pool_id: pool_id.to_string(),
                period: b.period,
                from_grade: scale.grade_at(row),
                total_count: b.counts.row_total(row),
                default_rate_pct: b.counts.row_default_rate_pct(row, default_col, dp),
            })
        })
        .collect()
}

/// Total transitions counted across all blocks.
pub fn total_transitions(blocks: &[MonthlyTransitionBlock]) -> u64 {
    blocks
        .iter()
        .map(|b| (0..b.counts.size()).map(|r| b.counts.row_total(r)).sum::<u64>())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn ym(year: i32, month: u32) -> YearMonth {
        YearMonth::new(year, month).unwrap()
    }

    fn obs(id: &str, year: i32, month: u32, grade: Grade) -> GradeObservation {
        GradeObservation {
            obligor_id: id.into(),
            month: ym(year, month),
            grade,
        }
    }

    #[test]
    fn test_empty_history_is_insufficient() {
        let history = GradeHistory::build(&[]);
        let err = estimate_monthly_transitions(&history, &GradeScale::default(), 12).unwrap_err();
        assert!(matches!(err, PdModelError::InsufficientData(_)));
    }

    #[test]
    fn test_single_grade_is_insufficient() {
        let history = GradeHistory::build(&[obs("a", 2019, 1, 2), obs("b", 2020, 1, 2)]);
        let err = estimate_monthly_transitions(&history, &GradeScale::default(), 12).unwrap_err();
        assert!(matches!(err, PdModelError::InsufficientData(_)));
    }

    #[test]
    fn test_out_of_range_grades_do_not_count_as_distinct() {
        let history = GradeHistory::build(&[obs("a", 2019, 1, 2), obs("b", 2020, 1, 9)]);
        assert!(estimate_monthly_transitions(&history, &GradeScale::default(), 12).is_err());
    }

    #[test]
    fn test_twelve_month_transitions_counted() {
        let data = vec![
            obs("a", 2019, 1, 1),
            obs("a", 2020, 1, 2),
            obs("b", 2019, 1, 2),
            obs("b", 2020, 1, 4),
            obs("c", 2019, 1, 1),
            obs("c", 2020, 1, 1),
        ];
        let history = GradeHistory::build(&data);
        let blocks = estimate_monthly_transitions(&history, &GradeScale::default(), 12).unwrap();
        // Jan 2019 .. Jan 2020 inclusive
        assert_eq!(blocks.len(), 13);
        let jan = &blocks[0];
        assert!(jan.has_look_ahead);
        assert_eq!(jan.counts.get(1, 2), 1);
        assert_eq!(jan.counts.get(2, 4), 1);
        assert_eq!(jan.counts.get(1, 1), 1);
        assert_eq!(total_transitions(&blocks), 3);
    }

    #[test]
    fn test_months_without_look_ahead_are_zero_filled() {
        let data = vec![obs("a", 2019, 6, 1), obs("a", 2020, 3, 2)];
        let history = GradeHistory::build(&data);
        let blocks = estimate_monthly_transitions(&history, &GradeScale::default(), 12).unwrap();
        assert_eq!(blocks.len(), 10);
        assert!(blocks.iter().all(|b| !b.has_look_ahead));
        assert!(blocks
            .iter()
            .all(|b| b.counts.cells.iter().flatten().all(|&c| c == 0)));
        assert_eq!(blocks[0].counts.size(), 4);
    }

    #[test]
    fn test_out_of_range_grade_discarded_silently() {
        let data = vec![
            obs("a", 2019, 1, 1),
            obs("a", 2020, 1, 7),
            obs("b", 2019, 1, 0),
            obs("b", 2020, 1, 1),
            obs("c", 2019, 1, 2),
            obs("c", 2020, 1, 3),
        ];
        let history = GradeHistory::build(&data);
        let blocks = estimate_monthly_transitions(&history, &GradeScale::default(), 12).unwrap();
        let total: u64 = (0..4).map(|r| blocks[0].counts.row_total(r)).sum();
        assert_eq!(total, 1);
        assert_eq!(blocks[0].counts.get(2, 3), 1);
    }

    #[test]
    fn test_first_grade_in_month_wins() {
        let data = vec![
            obs("a", 2019, 1, 1),
            obs("a", 2019, 1, 3),
            obs("a", 2020, 1, 2),
        ];
        let history = GradeHistory::build(&data);
        let counts = history.count_transitions(ym(2019, 1), ym(2020, 1), &GradeScale::default());
        assert_eq!(counts.get(1, 2), 1);
        assert_eq!(counts.get(3, 2), 0);
    }

    #[test]
    fn test_obligor_missing_in_target_month_not_counted() {
        let data = vec![obs("a", 2019, 1, 1), obs("b", 2020, 1, 2)];
        let history = GradeHistory::build(&data);
        let counts = history.count_transitions(ym(2019, 1), ym(2020, 1), &GradeScale::default());
        assert!(counts.cells.iter().flatten().all(|&c| c == 0));
    }

    #[test]
    fn test_cells_are_dense() {
        let data = vec![obs("a", 2019, 1, 1), obs("a", 2020, 1, 4)];
        let history = GradeHistory::build(&data);
        let blocks = estimate_monthly_transitions(&history, &GradeScale::default(), 12).unwrap();
        let cells = transition_cells("retail", &blocks);
        assert_eq!(cells.len(), blocks.len() * 16);
        assert_eq!(cells[3].count, 1);
        assert_eq!(cells[3].from_grade, 1);
        assert_eq!(cells[3].to_grade, 4);
    }

    #[test]
    fn test_row_stats_default_rate() {
        let data = vec![
            obs("a", 2019, 1, 1),
            obs("a", 2020, 1, 4),
            obs("b", 2019, 1, 1),
            obs("b", 2020, 1, 1),
            obs("c", 2019, 1, 1),
            obs("c", 2020, 1, 1),
        ];
        let scale = GradeScale::default();
        let history = GradeHistory::build(&data);
        let blocks = estimate_monthly_transitions(&history, &scale, 12).unwrap();
        let stats = monthly_row_stats("retail", &blocks, &scale, 4);
        let first = &stats[0];
        assert_eq!(first.from_grade, 1);
        assert_eq!(first.total_count, 3);
        assert_eq!(first.default_rate_pct, dec!(33.3333));
        assert_eq!(stats[1].default_rate_pct, Decimal::ZERO);
    }
}
