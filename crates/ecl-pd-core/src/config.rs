//! Model configuration.
//!
//! One immutable [`PdModelConfig`] is built (or deserialized) before a run and
//! passed by reference to every stage. Defaults reproduce the reference
//! portfolio: four grades with grade 4 as default, 2020 as the last seasoned
//! year, a 2015–2020 historical macro window and a five-year forecast.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::PdModelError;
use crate::types::Grade;
use crate::PdResult;

// ---------------------------------------------------------------------------
// Grade taxonomy
// ---------------------------------------------------------------------------

/// Deserialized through [`GradeScaleFields`]: an omitted `default_grade`
/// follows `max_grade`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "GradeScaleFields")]
pub struct GradeScale {
    pub min_grade: Grade,
    pub max_grade: Grade,
    /// Absorbing default grade, normally equal to `max_grade`.
    pub default_grade: Grade,
}

#[derive(Deserialize)]
struct GradeScaleFields {
    min_grade: Option<Grade>,
    max_grade: Option<Grade>,
    default_grade: Option<Grade>,
}

impl From<GradeScaleFields> for GradeScale {
    fn from(fields: GradeScaleFields) -> Self {
        let max_grade = fields.max_grade.unwrap_or_else(default_max_grade);
        Self {
            min_grade: fields.min_grade.unwrap_or_else(default_min_grade),
            max_grade,
            default_grade: fields.default_grade.unwrap_or(max_grade),
        }
    }
}

fn default_min_grade() -> Grade {
    1
}

fn default_max_grade() -> Grade {
    4
}

impl Default for GradeScale {
    fn default() -> Self {
        Self {
            min_grade: default_min_grade(),
            max_grade: default_max_grade(),
            default_grade: default_max_grade(),
        }
    }
}

impl GradeScale {
    pub fn size(&self) -> usize {
        (self.max_grade - self.min_grade) as usize + 1
    }

    pub fn contains(&self, grade: Grade) -> bool {
        grade >= self.min_grade && grade <= self.max_grade
    }

    /// Zero-based matrix index of a grade. Caller guarantees `contains`.
    pub fn index_of(&self, grade: Grade) -> usize {
        (grade - self.min_grade) as usize
    }

    pub fn grade_at(&self, index: usize) -> Grade {
        self.min_grade + index as Grade
    }

    pub fn default_index(&self) -> usize {
        self.index_of(self.default_grade)
    }

    pub fn grades(&self) -> impl Iterator<Item = Grade> + '_ {
        self.min_grade..=self.max_grade
    }

    pub fn non_default_grades(&self) -> impl Iterator<Item = Grade> + '_ {
        self.grades().filter(move |g| *g != self.default_grade)
    }
}

// ---------------------------------------------------------------------------
// Transition estimation
// ---------------------------------------------------------------------------

/// A year whose annual average is forced onto exactly one month.
///
/// Business exception carried over from the reference portfolio, where the
/// last seasoned year only had one usable month. Kept explicit and named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleMonthYearOverride {
    pub year: i32,
    pub month: u32,
}

/// Omitted fields take the values of `TransitionConfig::default()`; an
/// explicit `null` clears an optional one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    /// Months between the "from" and "to" observation.
    pub look_ahead_months: u32,
    /// Last seasoned year included in the long-run matrix. `None` derives it
    /// as the last observed year minus one.
    pub long_run_cutoff_year: Option<i32>,
    pub single_month_year: Option<SingleMonthYearOverride>,
}

fn default_look_ahead_months() -> u32 {
    12
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            look_ahead_months: default_look_ahead_months(),
            long_run_cutoff_year: Some(2020),
            single_month_year: Some(SingleMonthYearOverride {
                year: 2020,
                month: 1,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Grade risk profiles
// ---------------------------------------------------------------------------

/// TTC PD and asset correlation of one grade, both as raw probabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRiskProfile {
    pub grade: Grade,
    pub label: String,
    pub ttc_pd: f64,
    pub asset_correlation: f64,
}

fn default_grade_profiles() -> Vec<GradeRiskProfile> {
    vec![
        GradeRiskProfile {
            grade: 1,
            label: "CURRENT 0".into(),
            ttc_pd: 0.0063,
            asset_correlation: 0.1341,
        },
        GradeRiskProfile {
            grade: 2,
            label: "(1 - 30)".into(),
            ttc_pd: 0.8928,
            asset_correlation: 0.03,
        },
        GradeRiskProfile {
            grade: 3,
            label: "(31 - 90)".into(),
            ttc_pd: 0.9999,
            asset_correlation: 0.03,
        },
    ]
}

// ---------------------------------------------------------------------------
// Macro scenarios
// ---------------------------------------------------------------------------

/// Sign of the correlation between the macro driver and defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationSign {
    /// Higher values mean fewer defaults, so Best = Base + σ.
    Negative,
    /// Higher values mean more defaults, so Best = Base − σ.
    Positive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroScenarioConfig {
    pub variable_name: String,
    pub correlation_sign: CorrelationSign,
    /// First year of the historical window.
    pub first_year: i32,
    /// Last historical year; mean and σ use `first_year..=historical_end_year`.
    pub historical_end_year: i32,
    /// Last year (historical or forecast) for which scenario rows are produced.
    pub last_year: i32,
}

impl Default for MacroScenarioConfig {
    fn default() -> Self {
        Self {
            variable_name: "Growth of real capital stock (%)".into(),
            correlation_sign: CorrelationSign::Negative,
            first_year: 2015,
            historical_end_year: 2020,
            last_year: 2025,
        }
    }
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BisectionSettings {
    pub lower: f64,
    pub upper: f64,
    pub iterations: u32,
    /// Early exit when |objective| falls to this level. 0 runs every iteration.
    pub tolerance: f64,
}

impl Default for BisectionSettings {
    fn default() -> Self {
        Self {
            lower: -20.0,
            upper: 20.0,
            iterations: 100,
            tolerance: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Probabilities are clamped to (ε, 1 − ε) before taking log-odds.
    pub clamp_epsilon: f64,
    pub bisection: BisectionSettings,
}

fn default_clamp_epsilon() -> f64 {
    1e-4
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            clamp_epsilon: default_clamp_epsilon(),
            bisection: BisectionSettings::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Output rounding
// ---------------------------------------------------------------------------

/// Decimal places applied when values leave the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundingConfig {
    pub matrix_dp: u32,
    pub rate_dp: u32,
    pub long_run_pd_dp: u32,
    pub log_odds_dp: u32,
    pub calibrated_pd_dp: u32,
    pub portfolio_pd_dp: u32,
    pub macro_value_dp: u32,
    pub z_index_dp: u32,
    pub curve_dp: u32,
}

impl Default for RoundingConfig {
    fn default() -> Self {
        Self {
            matrix_dp: 4,
            rate_dp: 4,
            long_run_pd_dp: 6,
            log_odds_dp: 6,
            calibrated_pd_dp: 6,
            portfolio_pd_dp: 2,
            macro_value_dp: 4,
            z_index_dp: 6,
            curve_dp: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdModelConfig {
    pub grades: GradeScale,
    pub transitions: TransitionConfig,
    pub grade_profiles: Vec<GradeRiskProfile>,
    pub macro_scenarios: MacroScenarioConfig,
    pub forecast_horizon_years: u32,
    pub calibration: CalibrationConfig,
    pub rounding: RoundingConfig,
}

fn default_horizon_years() -> u32 {
    5
}

impl Default for PdModelConfig {
    fn default() -> Self {
        Self {
            grades: GradeScale::default(),
            transitions: TransitionConfig::default(),
            grade_profiles: default_grade_profiles(),
            macro_scenarios: MacroScenarioConfig::default(),
            forecast_horizon_years: default_horizon_years(),
            calibration: CalibrationConfig::default(),
            rounding: RoundingConfig::default(),
        }
    }
}

impl PdModelConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> PdResult<Self> {
        let config: PdModelConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Years of the forward PD curve: the `forecast_horizon_years` years
    /// following the last historical macro year.
    pub fn forecast_years(&self) -> Vec<i32> {
        let start = self.macro_scenarios.historical_end_year + 1;
        (0..self.forecast_horizon_years as i32)
            .map(|offset| start + offset)
            .collect()
    }

    pub fn profile(&self, grade: Grade) -> Option<&GradeRiskProfile> {
        self.grade_profiles.iter().find(|p| p.grade == grade)
    }

    pub fn validate(&self) -> PdResult<()> {
        let g = &self.grades;
        if g.min_grade >= g.max_grade {
            return Err(invalid(
                "grades",
                format!(
                    "min_grade {} must be below max_grade {}",
                    g.min_grade, g.max_grade
                ),
            ));
        }
        if !g.contains(g.default_grade) {
            return Err(invalid(
                "grades.default_grade",
                format!(
                    "default grade {} outside {}..={}",
                    g.default_grade, g.min_grade, g.max_grade
                ),
            ));
        }

        if self.transitions.look_ahead_months == 0 {
            return Err(invalid(
                "transitions.look_ahead_months",
                "must be at least 1".into(),
            ));
        }
        if let Some(ov) = self.transitions.single_month_year {
            if !(1..=12).contains(&ov.month) {
                return Err(invalid(
                    "transitions.single_month_year.month",
                    format!("month must be in 1..=12, got {}", ov.month),
                ));
            }
        }

        let mut seen = BTreeSet::new();
        for p in &self.grade_profiles {
            if !g.contains(p.grade) {
                return Err(invalid(
                    "grade_profiles",
                    format!("grade {} outside the grade scale", p.grade),
                ));
            }
            if !seen.insert(p.grade) {
                return Err(invalid(
                    "grade_profiles",
                    format!("grade {} configured twice", p.grade),
                ));
            }
            if !(p.ttc_pd > 0.0 && p.ttc_pd < 1.0) {
                return Err(invalid(
                    "grade_profiles.ttc_pd",
                    format!("grade {} TTC PD {} must be in (0, 1)", p.grade, p.ttc_pd),
                ));
            }
            if !(p.asset_correlation > 0.0 && p.asset_correlation < 1.0) {
                return Err(invalid(
                    "grade_profiles.asset_correlation",
                    format!(
                        "grade {} asset correlation {} must be in (0, 1)",
                        p.grade, p.asset_correlation
                    ),
                ));
            }
        }

        let m = &self.macro_scenarios;
        if m.first_year > m.historical_end_year || m.historical_end_year > m.last_year {
            return Err(invalid(
                "macro_scenarios",
                format!(
                    "window must satisfy first_year {} <= historical_end_year {} <= last_year {}",
                    m.first_year, m.historical_end_year, m.last_year
                ),
            ));
        }
        if self.forecast_horizon_years == 0 {
            return Err(invalid(
                "forecast_horizon_years",
                "must be at least 1".into(),
            ));
        }
        let last_forecast_year = m.historical_end_year + self.forecast_horizon_years as i32;
        if m.last_year < last_forecast_year {
            return Err(invalid(
                "macro_scenarios.last_year",
                format!(
                    "last_year {} does not cover the forecast horizon ending {}",
                    m.last_year, last_forecast_year
                ),
            ));
        }

        let c = &self.calibration;
        if !(c.clamp_epsilon > 0.0 && c.clamp_epsilon < 0.5) {
            return Err(invalid(
                "calibration.clamp_epsilon",
                format!("{} must be in (0, 0.5)", c.clamp_epsilon),
            ));
        }
        if !(c.bisection.lower < c.bisection.upper) {
            return Err(invalid(
                "calibration.bisection",
                "lower bound must be below upper bound".into(),
            ));
        }
        if c.bisection.iterations == 0 {
            return Err(invalid(
                "calibration.bisection.iterations",
                "must be at least 1".into(),
            ));
        }
        if c.bisection.tolerance < 0.0 {
            return Err(invalid(
                "calibration.bisection.tolerance",
                "must be non-negative".into(),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> PdModelError {
    PdModelError::InvalidInput {
        field: field.into(),
        reason,
    }
}
