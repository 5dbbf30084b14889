//! Error types for the transcript shift analysis

use polars::prelude::PolarsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Insufficient data for prior estimation at {time_point}: {found} usable proportions, need at least {required}")]
    InsufficientData {
        time_point: String,
        found: usize,
        required: usize,
    },

    #[error("Beta prior fit did not converge at {time_point} after {iterations} iterations")]
    NonConvergence { time_point: String, iterations: usize },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Invalid distribution parameters: {0}")]
    Distribution(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
