//! Error type for the engine crate

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid backtest config: {0}")]
    InvalidConfig(String),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("parameter grid is empty")]
    EmptyGrid,

    #[error("no parameter combination produced a result ({failed} of {total} failed)")]
    NoValidCombinations { failed: usize, total: usize },

    #[error("evaluation panicked: {0}")]
    EvaluationPanicked(String),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
