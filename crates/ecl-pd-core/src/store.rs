//! Result publication.
//!
//! Every output table is published with one call to
//! [`ResultSink::replace_table`], which swaps the whole table at once.
//! Readers of a sink see either the previous table or the new one, never a
//! mix. Tables are replaced one after another, so a run that stops halfway
//! can leave later tables from the previous run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::calibration::{CalibrationRow, CalibrationSummary};
use crate::forward_pd::ScenarioPdCurve;
use crate::macro_scenarios::MacroScenarioPoint;
use crate::odr::ObservedDefaultRate;
use crate::transition::{
    AnnualAverageCell, LongRunCell, LongRunGradeSummary, MonthlyRowStat,
    PooledTransitionSummary, TransitionCell,
};
use crate::types::PoolId;
use crate::PdResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TableKind {
    TransitionCells,
    MonthlyRowStats,
    AnnualAverages,
    LongRunCells,
    LongRunSummaries,
    PooledTransitions,
    ObservedDefaultRates,
    Calibration,
    CalibrationSummaries,
    MacroScenarios,
    ScenarioPdCurves,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableKind::TransitionCells => "transition_cells",
            TableKind::MonthlyRowStats => "monthly_row_stats",
            TableKind::AnnualAverages => "annual_averages",
            TableKind::LongRunCells => "long_run_cells",
            TableKind::LongRunSummaries => "long_run_summaries",
            TableKind::PooledTransitions => "pooled_transitions",
            TableKind::ObservedDefaultRates => "observed_default_rates",
            TableKind::Calibration => "calibration",
            TableKind::CalibrationSummaries => "calibration_summaries",
            TableKind::MacroScenarios => "macro_scenarios",
            TableKind::ScenarioPdCurves => "scenario_pd_curves",
        };
        f.write_str(s)
    }
}

/// A complete output table as produced by one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutputTable {
    TransitionCells(Vec<TransitionCell>),
    MonthlyRowStats(Vec<MonthlyRowStat>),
    AnnualAverages(Vec<AnnualAverageCell>),
    LongRunCells(Vec<LongRunCell>),
    LongRunSummaries(BTreeMap<PoolId, Vec<LongRunGradeSummary>>),
    PooledTransitions(BTreeMap<PoolId, PooledTransitionSummary>),
    ObservedDefaultRates(Vec<ObservedDefaultRate>),
    Calibration(Vec<CalibrationRow>),
    CalibrationSummaries(Vec<CalibrationSummary>),
    MacroScenarios(Vec<MacroScenarioPoint>),
    ScenarioPdCurves(Vec<ScenarioPdCurve>),
}

impl OutputTable {
    pub fn kind(&self) -> TableKind {
        match self {
            OutputTable::TransitionCells(_) => TableKind::TransitionCells,
            OutputTable::MonthlyRowStats(_) => TableKind::MonthlyRowStats,
            OutputTable::AnnualAverages(_) => TableKind::AnnualAverages,
            OutputTable::LongRunCells(_) => TableKind::LongRunCells,
            OutputTable::LongRunSummaries(_) => TableKind::LongRunSummaries,
            OutputTable::PooledTransitions(_) => TableKind::PooledTransitions,
            OutputTable::ObservedDefaultRates(_) => TableKind::ObservedDefaultRates,
            OutputTable::Calibration(_) => TableKind::Calibration,
            OutputTable::CalibrationSummaries(_) => TableKind::CalibrationSummaries,
            OutputTable::MacroScenarios(_) => TableKind::MacroScenarios,
            OutputTable::ScenarioPdCurves(_) => TableKind::ScenarioPdCurves,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            OutputTable::TransitionCells(v) => v.len(),
            OutputTable::MonthlyRowStats(v) => v.len(),
            OutputTable::AnnualAverages(v) => v.len(),
            OutputTable::LongRunCells(v) => v.len(),
            OutputTable::LongRunSummaries(m) => m.values().map(Vec::len).sum(),
            OutputTable::PooledTransitions(m) => m.len(),
            OutputTable::ObservedDefaultRates(v) => v.len(),
            OutputTable::Calibration(v) => v.len(),
            OutputTable::CalibrationSummaries(v) => v.len(),
            OutputTable::MacroScenarios(v) => v.len(),
            OutputTable::ScenarioPdCurves(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Destination of published tables.
///
/// Implementations must make `replace_table` atomic per table and
/// idempotent: publishing the same table twice leaves the same state.
pub trait ResultSink: Send + Sync {
    fn replace_table(&self, table: OutputTable) -> PdResult<()>;
}

/// Sink keeping the latest version of every table in memory.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    tables: RwLock<BTreeMap<TableKind, Arc<OutputTable>>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: TableKind) -> Option<Arc<OutputTable>> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<TableKind> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        tables.keys().copied().collect()
    }

    pub fn calibration_rows(&self) -> Vec<CalibrationRow> {
        match self.get(TableKind::Calibration).as_deref() {
            Some(OutputTable::Calibration(rows)) => rows.clone(),
            _ => Vec::new(),
        }
    }

    pub fn scenario_curves(&self) -> Vec<ScenarioPdCurve> {
        match self.get(TableKind::ScenarioPdCurves).as_deref() {
            Some(OutputTable::ScenarioPdCurves(curves)) => curves.clone(),
            _ => Vec::new(),
        }
    }

    pub fn observed_default_rates(&self) -> Vec<ObservedDefaultRate> {
        match self.get(TableKind::ObservedDefaultRates).as_deref() {
            Some(OutputTable::ObservedDefaultRates(rates)) => rates.clone(),
            _ => Vec::new(),
        }
    }
}

impl ResultSink for InMemoryResultStore {
    fn replace_table(&self, table: OutputTable) -> PdResult<()> {
        let kind = table.kind();
        let table = Arc::new(table);
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.insert(kind, table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn odr(year: i32) -> ObservedDefaultRate {
        ObservedDefaultRate {
            pool_id: "sme".into(),
            year,
            rate_pct: dec!(2.5),
        }
    }

    #[test]
    fn test_replace_swaps_whole_table() {
        let store = InMemoryResultStore::new();
        store
            .replace_table(OutputTable::ObservedDefaultRates(vec![odr(2018), odr(2019)]))
            .unwrap();
        let before = store.get(TableKind::ObservedDefaultRates).unwrap();
        store
            .replace_table(OutputTable::ObservedDefaultRates(vec![odr(2020)]))
            .unwrap();

        // A reader holding the old table keeps a consistent snapshot
        assert_eq!(before.len(), 2);
        let rates = store.observed_default_rates();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].year, 2020);
    }

    #[test]
    fn test_replace_is_idempotent() {
        let store = InMemoryResultStore::new();
        let table = OutputTable::ObservedDefaultRates(vec![odr(2019)]);
        store.replace_table(table.clone()).unwrap();
        store.replace_table(table.clone()).unwrap();
        assert_eq!(store.kinds(), vec![TableKind::ObservedDefaultRates]);
        assert_eq!(*store.get(TableKind::ObservedDefaultRates).unwrap(), table);
    }

    #[test]
    fn test_missing_table_reads_empty() {
        let store = InMemoryResultStore::new();
        assert!(store.get(TableKind::Calibration).is_none());
        assert!(store.calibration_rows().is_empty());
        assert_eq!(TableKind::ScenarioPdCurves.to_string(), "scenario_pd_curves");
    }
}
