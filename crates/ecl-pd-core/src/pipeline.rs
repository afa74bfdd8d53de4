//! Batch run orchestration.
//!
//! A run is one [`PipelineRun`] over a complete [`PortfolioSnapshot`]:
//!
//! 1. transition estimation per pool (monthly, annual, long-run, pooled,
//!    ODR),
//! 2. calibration per (pool, seasoned year),
//! 3. macro scenario generation,
//! 4. forward PD curves per scenario and grade.
//!
//! Stages 1→2 and 3→4 are independent chains. A stage called before its
//! prerequisite fails with `PartialPipelineFailure`. Per-unit failures
//! (a pool, a pool-year, a scenario) are recorded in the [`RunReport`] and
//! the unit is skipped. [`PdEngine`] serialises runs and publishes every
//! table through a [`ResultSink`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::calibration::{
    calibrate, calibration_summaries, latest_per_grade, CalibrationPoint, CalibrationRow,
    CalibrationSummary,
};
use crate::config::PdModelConfig;
use crate::error::PdModelError;
use crate::forward_pd::{compute_forward_pd, ScenarioPdCurve};
use crate::macro_scenarios::{generate_macro_scenarios, z_index_table, MacroScenarioPoint};
use crate::odr::{observed_default_rates, ObservedDefaultRate};
use crate::store::{OutputTable, ResultSink};
use crate::transition::annual::annual_cells;
use crate::transition::monthly::{monthly_row_stats, total_transitions, transition_cells};
use crate::transition::{
    assess_long_run_quality, average_by_year, estimate_monthly_transitions, long_run_average,
    pooled_sequential_transitions, AnnualAverageCell, AnnualAverageMatrix, GradeHistory,
    LongRunCell, LongRunGradeSummary, LongRunMatrix, MatrixQuality, MonthlyRowStat,
    MonthlyTransitionBlock, PooledTransitionSummary, TransitionCell,
};
use crate::types::{
    decimal_to_f64, with_metadata, ComputationOutput, GradeObservation, MacroObservation, PoolId,
};
use crate::PdResult;

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Everything one run reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub pools: BTreeMap<PoolId, Vec<GradeObservation>>,
    pub macro_series: Vec<MacroObservation>,
}

impl PortfolioSnapshot {
    pub fn observation_count(&self) -> usize {
        self.pools.values().map(Vec::len).sum()
    }
}

/// Transition-stage results of one pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolTransitions {
    pub pool_id: PoolId,
    pub blocks: Vec<MonthlyTransitionBlock>,
    pub annual: Vec<AnnualAverageMatrix>,
    pub long_run: LongRunMatrix,
    pub pooled: PooledTransitionSummary,
    pub quality: MatrixQuality,
    pub observed_default_rates: Vec<ObservedDefaultRate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFailure {
    /// e.g. `pool sme`, `pool sme year 2019`, `scenario Best`
    pub unit: String,
    pub error: PdModelError,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub failures: Vec<UnitFailure>,
    pub warnings: Vec<String>,
}

impl RunReport {
    fn fail(&mut self, unit: String, error: PdModelError) {
        warn!(unit = %unit, error = %error, "unit skipped");
        self.failures.push(UnitFailure { unit, error });
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

/// All tables produced by one run, in publication form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdRunOutput {
    pub transition_cells: Vec<TransitionCell>,
    pub monthly_row_stats: Vec<MonthlyRowStat>,
    pub annual_averages: Vec<AnnualAverageCell>,
    pub long_run_cells: Vec<LongRunCell>,
    pub long_run_summaries: BTreeMap<PoolId, Vec<LongRunGradeSummary>>,
    pub pooled_transitions: BTreeMap<PoolId, PooledTransitionSummary>,
    pub observed_default_rates: Vec<ObservedDefaultRate>,
    /// Latest calibrated year per (pool, grade).
    pub calibration: Vec<CalibrationRow>,
    pub calibration_summaries: Vec<CalibrationSummary>,
    pub macro_scenarios: Vec<MacroScenarioPoint>,
    pub scenario_curves: Vec<ScenarioPdCurve>,
    /// False when the macro chain did not run; its two tables are then left
    /// out of publication so a sink keeps the previous contents.
    pub macro_chain_completed: bool,
    pub report: RunReport,
}

impl PdRunOutput {
    /// Tables in publication order, upstream first.
    pub fn tables(&self) -> Vec<OutputTable> {
        let mut tables = vec![
            OutputTable::TransitionCells(self.transition_cells.clone()),
            OutputTable::MonthlyRowStats(self.monthly_row_stats.clone()),
            OutputTable::AnnualAverages(self.annual_averages.clone()),
            OutputTable::LongRunCells(self.long_run_cells.clone()),
            OutputTable::LongRunSummaries(self.long_run_summaries.clone()),
            OutputTable::PooledTransitions(self.pooled_transitions.clone()),
            OutputTable::ObservedDefaultRates(self.observed_default_rates.clone()),
            OutputTable::Calibration(self.calibration.clone()),
            OutputTable::CalibrationSummaries(self.calibration_summaries.clone()),
        ];
        if self.macro_chain_completed {
            tables.push(OutputTable::MacroScenarios(self.macro_scenarios.clone()));
            tables.push(OutputTable::ScenarioPdCurves(self.scenario_curves.clone()));
        }
        tables
    }
}

// ---------------------------------------------------------------------------
// Staged run
// ---------------------------------------------------------------------------

fn prerequisite(stage: &str, missing: &str) -> PdModelError {
    PdModelError::PartialPipelineFailure {
        stage: stage.into(),
        missing: missing.into(),
    }
}

pub struct PipelineRun<'a> {
    config: &'a PdModelConfig,
    snapshot: &'a PortfolioSnapshot,
    pools: Option<BTreeMap<PoolId, PoolTransitions>>,
    calibration: Option<Vec<CalibrationRow>>,
    macro_points: Option<Vec<MacroScenarioPoint>>,
    curves: Option<Vec<ScenarioPdCurve>>,
    report: RunReport,
}

impl<'a> PipelineRun<'a> {
    pub fn new(config: &'a PdModelConfig, snapshot: &'a PortfolioSnapshot) -> Self {
        Self {
            config,
            snapshot,
            pools: None,
            calibration: None,
            macro_points: None,
            curves: None,
            report: RunReport::default(),
        }
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn pool(&self, pool_id: &str) -> Option<&PoolTransitions> {
        self.pools.as_ref()?.get(pool_id)
    }

    fn pool_transitions(
        &self,
        pool_id: &str,
        observations: &[GradeObservation],
    ) -> PdResult<(PoolTransitions, Vec<String>)> {
        let cfg = self.config;
        let scale = &cfg.grades;
        let history = GradeHistory::build(observations);
        let blocks =
            estimate_monthly_transitions(&history, scale, cfg.transitions.look_ahead_months)?;
        debug!(
            pool = pool_id,
            months = blocks.len(),
            transitions = total_transitions(&blocks),
            "monthly transition blocks built"
        );

        let annual = average_by_year(
            &blocks,
            scale,
            cfg.transitions.single_month_year,
            cfg.rounding.matrix_dp,
        );
        let long_run = long_run_average(
            &annual,
            scale,
            cfg.transitions.long_run_cutoff_year,
            &cfg.rounding,
        )?;
        let (quality, quality_warnings) = assess_long_run_quality(&long_run, scale);
        let pooled = pooled_sequential_transitions(observations, scale, cfg.rounding.rate_dp);
        let observed_default_rates =
            observed_default_rates(pool_id, &annual, scale, cfg.rounding.rate_dp);

        let warnings = quality_warnings
            .into_iter()
            .map(|w| format!("pool {pool_id}: {w}"))
            .collect();
        Ok((
            PoolTransitions {
                pool_id: pool_id.to_string(),
                blocks,
                annual,
                long_run,
                pooled,
                quality,
                observed_default_rates,
            },
            warnings,
        ))
    }

    /// Stage 1. Fails only when the snapshot holds no observations or no
    /// pool could be estimated; single failing pools are skipped.
    pub fn estimate_transitions(&mut self) -> PdResult<()> {
        if self.snapshot.observation_count() == 0 {
            return Err(PdModelError::InsufficientData(
                "snapshot contains no grade observations".into(),
            ));
        }

        let snapshot = self.snapshot;
        let mut pools = BTreeMap::new();
        for (pool_id, observations) in &snapshot.pools {
            match self.pool_transitions(pool_id, observations) {
                Ok((pool, warnings)) => {
                    for w in warnings {
                        self.report.warn(w);
                    }
                    pools.insert(pool_id.clone(), pool);
                }
                Err(e) => self.report.fail(format!("pool {pool_id}"), e),
            }
        }

        if pools.is_empty() {
            return Err(PdModelError::InsufficientData(
                "no pool has enough data to estimate transitions".into(),
            ));
        }
        info!(pools = pools.len(), "transition matrices estimated");
        self.pools = Some(pools);
        Ok(())
    }

    /// Stage 2. Every seasoned year with an ODR is calibrated against the
    /// pool's long-run grade summary.
    pub fn calibrate(&mut self) -> PdResult<()> {
        let pools = self
            .pools
            .as_ref()
            .ok_or_else(|| prerequisite("calibration", "transition matrices"))?;
        let cfg = self.config;

        let mut rows = Vec::new();
        let mut failures = Vec::new();
        let mut warnings = Vec::new();
        for (pool_id, pool) in pools {
            let points: Vec<CalibrationPoint> = pool
                .long_run
                .grade_summaries
                .iter()
                .filter(|s| s.from_grade != cfg.grades.default_grade)
                .map(|s| CalibrationPoint {
                    grade: s.from_grade,
                    pd: decimal_to_f64(s.default_rate_pct) / 100.0,
                    count: s.average_clients,
                })
                .collect();

            for odr in pool
                .observed_default_rates
                .iter()
                .filter(|o| o.year <= pool.long_run.cutoff_year)
            {
                let target = decimal_to_f64(odr.rate_pct) / 100.0;
                match calibrate(
                    pool_id,
                    odr.year,
                    &points,
                    target,
                    &cfg.calibration,
                    &cfg.rounding,
                ) {
                    Ok(result) => {
                        warnings.extend(
                            result
                                .warnings
                                .into_iter()
                                .map(|w| format!("pool {pool_id} year {}: {w}", odr.year)),
                        );
                        rows.extend(result.rows);
                    }
                    Err(e) => failures.push((format!("pool {pool_id} year {}", odr.year), e)),
                }
            }
        }

        for (unit, e) in failures {
            self.report.fail(unit, e);
        }
        for w in warnings {
            self.report.warn(w);
        }
        info!(rows = rows.len(), "calibration complete");
        self.calibration = Some(rows);
        Ok(())
    }

    /// Stage 3.
    pub fn generate_macro_scenarios(&mut self) -> PdResult<()> {
        let points = generate_macro_scenarios(
            &self.snapshot.macro_series,
            &self.config.macro_scenarios,
            &self.config.rounding,
        )?;
        info!(rows = points.len(), "macro scenarios generated");
        self.macro_points = Some(points);
        Ok(())
    }

    /// Stage 4. A scenario with an incomplete Z-path is skipped whole.
    pub fn compute_forward_pd(&mut self) -> PdResult<()> {
        let points = self
            .macro_points
            .as_ref()
            .ok_or_else(|| prerequisite("forward_pd", "macro scenarios"))?;
        let table = z_index_table(points);
        let outcome = compute_forward_pd(
            &table,
            &self.config.grade_profiles,
            &self.config.forecast_years(),
            self.config.macro_scenarios.correlation_sign,
            self.config.rounding.curve_dp,
        );
        for e in outcome.failures {
            let unit = match &e {
                PdModelError::MissingScenarioInput { scenario, .. } => format!("scenario {scenario}"),
                _ => "forward_pd".to_string(),
            };
            self.report.fail(unit, e);
        }
        info!(curves = outcome.curves.len(), "forward PD curves computed");
        self.curves = Some(outcome.curves);
        Ok(())
    }

    /// Assemble publication tables. Transition and calibration stages are
    /// required; a macro chain that did not run yields empty tables.
    pub fn finish(self) -> PdResult<PdRunOutput> {
        let pools = self
            .pools
            .ok_or_else(|| prerequisite("finish", "transition matrices"))?;
        let calibration_rows = self
            .calibration
            .ok_or_else(|| prerequisite("finish", "calibration"))?;

        let macro_chain_completed = self.macro_points.is_some() && self.curves.is_some();
        let mut out = PdRunOutput {
            transition_cells: Vec::new(),
            monthly_row_stats: Vec::new(),
            annual_averages: Vec::new(),
            long_run_cells: Vec::new(),
            long_run_summaries: BTreeMap::new(),
            pooled_transitions: BTreeMap::new(),
            observed_default_rates: Vec::new(),
            calibration: Vec::new(),
            calibration_summaries: Vec::new(),
            macro_scenarios: self.macro_points.unwrap_or_default(),
            scenario_curves: self.curves.unwrap_or_default(),
            macro_chain_completed,
            report: self.report,
        };

        let dp = self.config.rounding.rate_dp;
        for (pool_id, pool) in pools {
            out.transition_cells
                .extend(transition_cells(&pool_id, &pool.blocks));
            out.monthly_row_stats.extend(monthly_row_stats(
                &pool_id,
                &pool.blocks,
                &self.config.grades,
                dp,
            ));
            out.annual_averages.extend(annual_cells(&pool_id, &pool.annual));
            out.long_run_cells.extend(pool.long_run.cells(&pool_id));
            out.observed_default_rates
                .extend(pool.observed_default_rates);
            out.long_run_summaries
                .insert(pool_id.clone(), pool.long_run.grade_summaries);
            out.pooled_transitions.insert(pool_id, pool.pooled);
        }

        out.calibration = latest_per_grade(calibration_rows);
        out.calibration_summaries = calibration_summaries(&out.calibration);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs full batches and publishes their tables. Concurrent callers are
/// serialised: one run computes and publishes before the next starts.
pub struct PdEngine {
    config: PdModelConfig,
    run_lock: Mutex<()>,
}

impl PdEngine {
    pub fn new(config: PdModelConfig) -> PdResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            run_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &PdModelConfig {
        &self.config
    }

    /// Compute every table from `snapshot` without publishing.
    pub fn compute(&self, snapshot: &PortfolioSnapshot) -> PdResult<PdRunOutput> {
        info!(
            pools = snapshot.pools.len(),
            observations = snapshot.observation_count(),
            macro_rows = snapshot.macro_series.len(),
            "PD run started"
        );
        let mut run = PipelineRun::new(&self.config, snapshot);

        run.estimate_transitions()?;
        run.calibrate()?;

        if let Err(e) = run.generate_macro_scenarios() {
            run.report.fail("macro scenarios".into(), e);
        } else {
            run.compute_forward_pd()?;
        }

        run.finish()
    }

    /// Compute, then replace every output table in `sink`.
    pub fn run(
        &self,
        snapshot: &PortfolioSnapshot,
        sink: &dyn ResultSink,
    ) -> PdResult<ComputationOutput<PdRunOutput>> {
        let _guard = self.run_lock.lock().unwrap_or_else(|e| e.into_inner());
        let start = Instant::now();

        let output = self.compute(snapshot)?;
        for table in output.tables() {
            let kind = table.kind();
            let rows = table.len();
            sink.replace_table(table)?;
            debug!(table = %kind, rows, "table replaced");
        }

        let mut warnings = output.report.warnings.clone();
        if !output.macro_chain_completed {
            warnings.push(
                "macro scenario and PD curve tables not replaced; previous contents kept".into(),
            );
        }
        warnings.extend(
            output
                .report
                .failures
                .iter()
                .map(|f| format!("{} skipped: {}", f.unit, f.error)),
        );
        let elapsed = start.elapsed().as_micros() as u64;
        info!(
            elapsed_us = elapsed,
            failures = output.report.failures.len(),
            "PD run published"
        );

        Ok(with_metadata(
            "Empirical 12-month grade transitions, log-odds calibration to observed \
             default rates, single-factor macro-conditioned PIT and marginal PD curves",
            &self.config,
            warnings,
            elapsed,
            output,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibrate_before_transitions_is_partial_failure() {
        let config = PdModelConfig::default();
        let snapshot = PortfolioSnapshot::default();
        let mut run = PipelineRun::new(&config, &snapshot);
        let err = run.calibrate().unwrap_err();
        assert!(matches!(
            err,
            PdModelError::PartialPipelineFailure { ref stage, .. } if stage == "calibration"
        ));
    }

    #[test]
    fn test_forward_pd_before_macro_is_partial_failure() {
        let config = PdModelConfig::default();
        let snapshot = PortfolioSnapshot::default();
        let mut run = PipelineRun::new(&config, &snapshot);
        assert!(matches!(
            run.compute_forward_pd().unwrap_err(),
            PdModelError::PartialPipelineFailure { .. }
        ));
    }

    #[test]
    fn test_finish_requires_transitions() {
        let config = PdModelConfig::default();
        let snapshot = PortfolioSnapshot::default();
        let run = PipelineRun::new(&config, &snapshot);
        assert!(run.finish().is_err());
    }

    #[test]
    fn test_empty_snapshot_is_insufficient() {
        let config = PdModelConfig::default();
        let snapshot = PortfolioSnapshot::default();
        let mut run = PipelineRun::new(&config, &snapshot);
        assert!(matches!(
            run.estimate_transitions().unwrap_err(),
            PdModelError::InsufficientData(_)
        ));
    }

    #[test]
    fn test_macro_tables_withheld_when_chain_missing() {
        let config = PdModelConfig::default();
        let snapshot = PortfolioSnapshot::default();
        let mut run = PipelineRun::new(&config, &snapshot);
        run.pools = Some(BTreeMap::new());
        run.calibration = Some(Vec::new());
        let out = run.finish().unwrap();
        assert!(!out.macro_chain_completed);
        let kinds: Vec<_> = out.tables().iter().map(OutputTable::kind).collect();
        assert_eq!(kinds.len(), 9);
        assert!(!kinds.contains(&crate::store::TableKind::ScenarioPdCurves));
    }

    #[test]
    fn test_engine_rejects_invalid_config() {
        let mut config = PdModelConfig::default();
        config.forecast_horizon_years = 0;
        assert!(PdEngine::new(config).is_err());
    }
}
