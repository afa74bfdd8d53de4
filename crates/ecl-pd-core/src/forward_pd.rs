//! Macro-conditioned PIT, survival and marginal PD term structures.
//!
//! Covers:
//! 1. **PIT transform** -- single-factor (Vasicek) conditioning of a TTC PD
//!    on a standardized macro shock:
//!    `PIT(i) = Φ((Φ⁻¹(TTC) − √ρ·Z_i) / √(1 − ρ))`. `Z_i` is oriented so
//!    that a lower value is the adverse state: a driver positively
//!    correlated with defaults has its Z negated first.
//! 2. **Survival / marginal recurrence** -- `S(0) = 1`,
//!    `M(i) = S(i−1)·PIT(i)`, `S(i) = S(i−1) − M(i)`.
//! 3. **Scenario tables** -- curves grouped by scenario, formatted marginal
//!    tables and single-curve lookup.
//!
//! Curves are computed on raw probabilities in `f64` with `statrs`; scaling
//! to percentages and rounding happen only when rows are built.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;

use crate::config::{CorrelationSign, GradeRiskProfile};
use crate::error::PdModelError;
use crate::types::{format_percent, to_percent, Grade, Percent, Scenario};
use crate::PdResult;

/// Decimal places kept when displaying configured probabilities.
const PROFILE_DISPLAY_DP: u32 = 6;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Raw probability curves over an H-year horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdCurve {
    /// PIT PD per forecast year, length H.
    pub pit: Vec<f64>,
    /// Survival from t0, length H + 1.
    pub survival: Vec<f64>,
    /// Marginal PD per forecast year, length H.
    pub marginal: Vec<f64>,
}

/// Percent-scaled curves of one grade under one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioPdCurve {
    pub scenario: Scenario,
    pub grade: Grade,
    pub label: String,
    pub ttc_pd: f64,
    pub asset_correlation: f64,
    pub years: Vec<i32>,
    pub pit_pct: Vec<Percent>,
    pub survival_pct: Vec<Percent>,
    pub marginal_pct: Vec<Percent>,
}

#[derive(Debug, Clone, Default)]
pub struct ForwardPdOutcome {
    /// Ordered by scenario, then grade.
    pub curves: Vec<ScenarioPdCurve>,
    /// One entry per scenario that could not be built.
    pub failures: Vec<PdModelError>,
}

// ---------------------------------------------------------------------------
// Curve computation
// ---------------------------------------------------------------------------

fn standard_normal() -> PdResult<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| PdModelError::InvalidInput {
        field: "standard_normal".into(),
        reason: format!("{e}"),
    })
}

/// Single-factor PIT PD for one year.
pub fn pit_pd(ttc_pd: f64, rho: f64, z: f64) -> PdResult<f64> {
    let normal = standard_normal()?;
    Ok(conditional_pd(&normal, normal.inverse_cdf(ttc_pd), rho, z))
}

fn conditional_pd(normal: &Normal, inv_ttc: f64, rho: f64, z: f64) -> f64 {
    normal.cdf((inv_ttc - rho.sqrt() * z) / (1.0 - rho).sqrt())
}

pub fn compute_pd_curves(ttc_pd: f64, rho: f64, z_path: &[f64]) -> PdResult<PdCurve> {
    if !(ttc_pd > 0.0 && ttc_pd < 1.0) {
        return Err(PdModelError::InvalidInput {
            field: "ttc_pd".into(),
            reason: format!("TTC PD {ttc_pd} must be in (0, 1)"),
        });
    }
    if !(rho > 0.0 && rho < 1.0) {
        return Err(PdModelError::InvalidInput {
            field: "asset_correlation".into(),
            reason: format!("asset correlation {rho} must be in (0, 1)"),
        });
    }

    let normal = standard_normal()?;
    let inv_ttc = normal.inverse_cdf(ttc_pd);

    let h = z_path.len();
    let mut pit = Vec::with_capacity(h);
    let mut marginal = Vec::with_capacity(h);
    let mut survival = Vec::with_capacity(h + 1);
    survival.push(1.0);

    let mut alive = 1.0;
    for &z in z_path {
        let p = conditional_pd(&normal, inv_ttc, rho, z);
        let defaulted = alive * p;
        alive -= defaulted;
        pit.push(p);
        marginal.push(defaulted);
        survival.push(alive);
    }

    Ok(PdCurve {
        pit,
        survival,
        marginal,
    })
}

/// Ordered Z values of `scenario` over `years`.
pub fn build_z_path(
    z_table: &BTreeMap<(Scenario, i32), f64>,
    scenario: Scenario,
    years: &[i32],
) -> PdResult<Vec<f64>> {
    years
        .iter()
        .map(|&year| {
            z_table
                .get(&(scenario, year))
                .copied()
                .ok_or(PdModelError::MissingScenarioInput { scenario, year })
        })
        .collect()
}

/// Orient a macro Z-index so that lower means more defaults.
pub fn systemic_factor(z: f64, sign: CorrelationSign) -> f64 {
    match sign {
        CorrelationSign::Negative => z,
        CorrelationSign::Positive => -z,
    }
}

fn to_percentages(values: &[f64], dp: u32) -> Vec<Percent> {
    values.iter().map(|&p| to_percent(p, dp)).collect()
}

pub fn scenario_curve(
    profile: &GradeRiskProfile,
    scenario: Scenario,
    years: &[i32],
    z_path: &[f64],
    dp: u32,
) -> PdResult<ScenarioPdCurve> {
    let curve = compute_pd_curves(profile.ttc_pd, profile.asset_correlation, z_path)?;
    Ok(ScenarioPdCurve {
        scenario,
        grade: profile.grade,
        label: profile.label.clone(),
        ttc_pd: profile.ttc_pd,
        asset_correlation: profile.asset_correlation,
        years: years.to_vec(),
        pit_pct: to_percentages(&curve.pit, dp),
        survival_pct: to_percentages(&curve.survival, dp),
        marginal_pct: to_percentages(&curve.marginal, dp),
    })
}

/// Curves for every scenario and configured grade.
///
/// A scenario missing any forecast-year Z is skipped whole and reported in
/// `failures`; the other scenarios are still produced.
pub fn compute_forward_pd(
    z_table: &BTreeMap<(Scenario, i32), f64>,
    profiles: &[GradeRiskProfile],
    years: &[i32],
    sign: CorrelationSign,
    dp: u32,
) -> ForwardPdOutcome {
    let mut profiles: Vec<&GradeRiskProfile> = profiles.iter().collect();
    profiles.sort_by_key(|p| p.grade);

    let mut outcome = ForwardPdOutcome::default();
    for scenario in Scenario::ALL {
        let z_path = match build_z_path(z_table, scenario, years) {
            Ok(path) => path
                .into_iter()
                .map(|z| systemic_factor(z, sign))
                .collect::<Vec<_>>(),
            Err(e) => {
                outcome.failures.push(e);
                continue;
            }
        };
        let built: PdResult<Vec<ScenarioPdCurve>> = profiles
            .iter()
            .map(|p| scenario_curve(p, scenario, years, &z_path, dp))
            .collect();
        match built {
            Ok(curves) => outcome.curves.extend(curves),
            Err(e) => outcome.failures.push(e),
        }
    }
    outcome
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Curves grouped by scenario, each group ordered by grade. With a filter
/// only that scenario's group is returned.
pub fn curves_by_scenario(
    curves: &[ScenarioPdCurve],
    filter: Option<Scenario>,
) -> BTreeMap<Scenario, Vec<ScenarioPdCurve>> {
    let mut grouped: BTreeMap<Scenario, Vec<ScenarioPdCurve>> = BTreeMap::new();
    for scenario in Scenario::ALL {
        if filter.map_or(true, |f| f == scenario) {
            grouped.insert(scenario, Vec::new());
        }
    }
    for curve in curves {
        if let Some(group) = grouped.get_mut(&curve.scenario) {
            group.push(curve.clone());
        }
    }
    for group in grouped.values_mut() {
        group.sort_by_key(|c| c.grade);
    }
    grouped
}

/// Display row of the marginal PD table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginalPdRow {
    pub grade: Grade,
    pub label: String,
    pub ttc_pd: String,
    pub asset_correlation: String,
    pub marginal: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarginalPdTables {
    pub base: Vec<MarginalPdRow>,
    pub best: Vec<MarginalPdRow>,
    pub worst: Vec<MarginalPdRow>,
}

pub fn marginal_pd_tables(curves: &[ScenarioPdCurve]) -> MarginalPdTables {
    let mut tables = MarginalPdTables::default();
    for (scenario, group) in curves_by_scenario(curves, None) {
        let rows = group
            .iter()
            .map(|c| MarginalPdRow {
                grade: c.grade,
                label: c.label.clone(),
                ttc_pd: format_percent(to_percent(c.ttc_pd, PROFILE_DISPLAY_DP)),
                asset_correlation: format_percent(to_percent(
                    c.asset_correlation,
                    PROFILE_DISPLAY_DP,
                )),
                marginal: c.marginal_pct.iter().map(|m| format_percent(*m)).collect(),
            })
            .collect();
        match scenario {
            Scenario::Base => tables.base = rows,
            Scenario::Best => tables.best = rows,
            Scenario::Worst => tables.worst = rows,
        }
    }
    tables
}

pub fn marginal_pd_curve(
    curves: &[ScenarioPdCurve],
    scenario: Scenario,
    grade: Grade,
) -> Option<Vec<Percent>> {
    curves
        .iter()
        .find(|c| c.scenario == scenario && c.grade == grade)
        .map(|c| c.marginal_pct.clone())
}
