pub mod calibration;
pub mod config;
pub mod error;
pub mod forward_pd;
pub mod macro_scenarios;
pub mod odr;
pub mod pipeline;
pub mod store;
pub mod transition;
pub mod types;

pub use config::PdModelConfig;
pub use error::PdModelError;
pub use pipeline::{PdEngine, PdRunOutput, PipelineRun, PortfolioSnapshot, RunReport};
pub use store::{InMemoryResultStore, OutputTable, ResultSink, TableKind};
pub use types::*;

/// Standard result type for all PD model operations
pub type PdResult<T> = Result<T, PdModelError>;
