//! Error types for the orchard_forecast crate

use polars::prelude::PolarsError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Custom error types for the orchard_forecast crate
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Missing or malformed input data file
    #[error("Data load error: {0}")]
    DataLoad(String),

    /// Corrupt or incompatible persisted model
    #[error("Model load error for {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    /// Per-model training failure
    #[error("Failed to fit {model}: {reason}")]
    ModelFit { model: String, reason: String },

    /// Per-model forecast failure
    #[error("Failed to predict with {model}: {reason}")]
    ModelPredict { model: String, reason: String },

    /// No model produced any output
    #[error("No forecast could be produced: {0}")]
    NoForecast(String),

    /// The forecast table has no rows
    #[error("Forecast table is empty, nothing to compute irrigation from")]
    EmptyForecast,

    /// Upload with an unrecognised file type
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// A required variable role has no column
    #[error("Missing variable '{role}': none of {candidates:?} present")]
    MissingVariable { role: String, candidates: Vec<String> },

    /// Error from invalid parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error related to data validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Error from numerical routines
    #[error("Math error: {0}")]
    MathError(String),

    /// Configuration file problems
    #[error("Configuration error in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// Error from IO operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from JSON (de)serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from CSV reading or writing
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Error from Polars operations
    #[error("Polars error: {0}")]
    PolarsError(String),

    /// Error from the agronomic formulas
    #[error("Agronomic calculation error: {0}")]
    Agro(#[from] agro_math::AgroError),
}

impl ForecastError {
    pub fn fit(model: impl Into<String>, reason: impl ToString) -> Self {
        ForecastError::ModelFit {
            model: model.into(),
            reason: reason.to_string(),
        }
    }

    pub fn predict(model: impl Into<String>, reason: impl ToString) -> Self {
        ForecastError::ModelPredict {
            model: model.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error aborts a whole run rather than a single model
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ForecastError::ModelFit { .. }
                | ForecastError::ModelPredict { .. }
                | ForecastError::ModelLoad { .. }
        )
    }
}

/// A model skipped by a batch, with the reason it failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFailure {
    pub model: String,
    pub reason: String,
}

impl ModelFailure {
    pub fn new(model: impl Into<String>, err: &ForecastError) -> Self {
        Self {
            model: model.into(),
            reason: err.to_string(),
        }
    }
}

/// Result type with our custom error
pub type Result<T> = std::result::Result<T, ForecastError>;

impl From<PolarsError> for ForecastError {
    fn from(err: PolarsError) -> Self {
        ForecastError::PolarsError(err.to_string())
    }
}
