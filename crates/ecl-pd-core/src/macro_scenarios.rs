//! Macro scenario generation.
//!
//! Covers:
//! 1. **Historical moments** -- mean and population σ of the driver over the
//!    historical window only.
//! 2. **Scenario paths** -- Base is the series itself; Best and Worst shift
//!    it by one σ in the direction set by the driver's correlation sign.
//! 3. **Z-indices** -- `(value - mean) / σ` per scenario and year.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{CorrelationSign, MacroScenarioConfig, RoundingConfig};
use crate::error::PdModelError;
use crate::types::{decimal_to_f64, round_f64, MacroObservation, Scenario};
use crate::PdResult;

/// Floor applied to a zero historical σ.
const SIGMA_FLOOR: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroScenarioPoint {
    pub scenario: Scenario,
    pub variable: String,
    pub year: i32,
    pub value: Decimal,
    pub z_index: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalMoments {
    pub mean: f64,
    /// Population standard deviation, floored at 1e-6.
    pub std_dev: f64,
    pub observations: usize,
}

/// One value per year for the configured variable within
/// `first_year..=last_year`. A repeated year keeps its first value.
fn driver_series(
    observations: &[MacroObservation],
    config: &MacroScenarioConfig,
) -> BTreeMap<i32, f64> {
    let mut series = BTreeMap::new();
    for obs in observations {
        if obs.variable == config.variable_name
            && obs.year >= config.first_year
            && obs.year <= config.last_year
        {
            series.entry(obs.year).or_insert(obs.value);
        }
    }
    series
}

pub fn historical_moments(
    series: &BTreeMap<i32, f64>,
    historical_end_year: i32,
) -> PdResult<HistoricalMoments> {
    let values: Vec<f64> = series
        .range(..=historical_end_year)
        .map(|(_, v)| *v)
        .collect();
    if values.is_empty() {
        return Err(PdModelError::InsufficientData(format!(
            "no historical macro values on or before {historical_end_year}"
        )));
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    Ok(HistoricalMoments {
        mean,
        std_dev: if std_dev == 0.0 { SIGMA_FLOOR } else { std_dev },
        observations: values.len(),
    })
}

/// Scenario value for a base value, given the shift direction.
pub fn scenario_value(base: f64, std_dev: f64, scenario: Scenario, sign: CorrelationSign) -> f64 {
    match (scenario, sign) {
        (Scenario::Base, _) => base,
        (Scenario::Best, CorrelationSign::Negative) | (Scenario::Worst, CorrelationSign::Positive) => {
            base + std_dev
        }
        (Scenario::Worst, CorrelationSign::Negative) | (Scenario::Best, CorrelationSign::Positive) => {
            base - std_dev
        }
    }
}

/// Base/Best/Worst rows for every year of the driver series, ordered by
/// scenario then year.
pub fn generate_macro_scenarios(
    observations: &[MacroObservation],
    config: &MacroScenarioConfig,
    rounding: &RoundingConfig,
) -> PdResult<Vec<MacroScenarioPoint>> {
    let series = driver_series(observations, config);
    let moments = historical_moments(&series, config.historical_end_year)?;

    let mut points = Vec::with_capacity(series.len() * Scenario::ALL.len());
    for scenario in Scenario::ALL {
        for (&year, &base) in &series {
            let value = scenario_value(base, moments.std_dev, scenario, config.correlation_sign);
            let z = (value - moments.mean) / moments.std_dev;
            points.push(MacroScenarioPoint {
                scenario,
                variable: config.variable_name.clone(),
                year,
                value: round_f64(value, rounding.macro_value_dp),
                z_index: round_f64(z, rounding.z_index_dp),
            });
        }
    }
    Ok(points)
}

/// (scenario, year) → Z lookup over the rounded Z-indices.
pub fn z_index_table(points: &[MacroScenarioPoint]) -> BTreeMap<(Scenario, i32), f64> {
    points
        .iter()
        .map(|p| ((p.scenario, p.year), decimal_to_f64(p.z_index)))
        .collect()
}
