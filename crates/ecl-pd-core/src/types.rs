use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PdModelError;
use crate::PdResult;

/// Rates reported as percentages (1.25 = 1.25%). Internal probabilities stay in [0, 1].
pub type Percent = Decimal;

/// Risk grade rank. 1 is the best grade; the highest configured grade is default.
pub type Grade = u8;

/// Identifier of a portfolio segment modelled independently.
pub type PoolId = String;

/// Calendar month used as the observation period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "YearMonthFields")]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

#[derive(Deserialize)]
struct YearMonthFields {
    year: i32,
    month: u32,
}

impl TryFrom<YearMonthFields> for YearMonth {
    type Error = PdModelError;

    fn try_from(fields: YearMonthFields) -> PdResult<Self> {
        YearMonth::new(fields.year, fields.month)
    }
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> PdResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(PdModelError::InvalidInput {
                field: "month".into(),
                reason: format!("month must be in 1..=12, got {month}"),
            });
        }
        Ok(Self { year, month })
    }

    /// Months since year 0, used for span arithmetic.
    fn ordinal(self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    fn from_ordinal(ordinal: i64) -> Self {
        Self {
            year: ordinal.div_euclid(12) as i32,
            month: ordinal.rem_euclid(12) as u32 + 1,
        }
    }

    pub fn add_months(self, months: i64) -> Self {
        Self::from_ordinal(self.ordinal() + months)
    }

    pub fn succ(self) -> Self {
        self.add_months(1)
    }

    /// Every month from `first` to `last` inclusive, gaps filled.
    pub fn span(first: YearMonth, last: YearMonth) -> Vec<YearMonth> {
        (first.ordinal()..=last.ordinal())
            .map(Self::from_ordinal)
            .collect()
    }
}

impl From<NaiveDate> for YearMonth {
    fn from(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// One obligor's risk grade in one month, as delivered by ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeObservation {
    pub obligor_id: String,
    pub month: YearMonth,
    pub grade: Grade,
}

/// One value of a macroeconomic series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroObservation {
    pub variable: String,
    pub year: i32,
    pub value: f64,
}

/// Macro scenario used to condition PIT PDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scenario {
    Base,
    Best,
    Worst,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [Scenario::Base, Scenario::Best, Scenario::Worst];
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scenario::Base => "Base",
            Scenario::Best => "Best",
            Scenario::Worst => "Worst",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Scenario {
    type Err = PdModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" => Ok(Scenario::Base),
            "best" => Ok(Scenario::Best),
            "worst" => Ok(Scenario::Worst),
            other => Err(PdModelError::InvalidInput {
                field: "scenario".into(),
                reason: format!("unknown scenario '{other}'"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Numeric bridges
// ---------------------------------------------------------------------------

/// Round an f64 to `dp` decimals as a Decimal. Non-finite values map to zero.
pub fn round_f64(value: f64, dp: u32) -> Decimal {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(dp))
        .unwrap_or(Decimal::ZERO)
}

/// Probability in [0, 1] to a rounded percentage.
pub fn to_percent(probability: f64, dp: u32) -> Percent {
    round_f64(probability * 100.0, dp)
}

pub fn decimal_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Display form of a percentage: at least two decimals and a trailing `%`.
pub fn format_percent(value: Percent) -> String {
    let normalized = value.normalize();
    let text = if normalized.scale() < 2 {
        format!("{:.2}", normalized)
    } else {
        normalized.to_string()
    };
    format!("{text}%")
}

// ---------------------------------------------------------------------------
// Computation envelope
// ---------------------------------------------------------------------------

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "rust_decimal_128bit+ieee754_f64".to_string(),
        },
    }
}
