use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Scenario;

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum PdModelError {
    #[error("Invalid input: {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Degenerate regression: {0}")]
    DegenerateRegression(String),

    #[error("Missing scenario input: no Z-index for scenario {scenario} in year {year}")]
    MissingScenarioInput { scenario: Scenario, year: i32 },

    #[error("Partial pipeline failure: stage '{stage}' requires '{missing}' from this run")]
    PartialPipelineFailure { stage: String, missing: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for PdModelError {
    fn from(e: serde_json::Error) -> Self {
        PdModelError::SerializationError(e.to_string())
    }
}
