//! # Orchard Forecast
//!
//! Weather forecasting model bank and irrigation planning for almond orchards.
//!
//! ## Features
//!
//! - Daily observation tables from semicolon or comma CSV uploads, gap-filled in time
//! - Four forecasting families behind one contract: seasonal ARIMA, seasonal
//!   ARIMA with exogenous regressors, vector autoregression and a stacked LSTM
//! - Column scaling pipelines persisted as versioned JSON
//! - Forecast aggregation into one future-dated table
//! - FAO-56 irrigation budget per forecast day (via `agro_math`)
//! - Per-run progress reporting through an explicit context
//!
//! ## Pipeline
//!
//! Training loads an upload, holds out the trailing `test_size` days and fits
//! one pipeline per family and target (`sarima_<variable>`, `sarimax_<variable>`,
//! `var_multivariate`, `lstm_multivariate`). Forecasting loads every stored
//! pipeline, predicts `horizon` days, merges the outputs and derives the
//! irrigation table.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use orchard_forecast::{run_forecast, run_training, ForecastRequest, PipelineConfig, ProgressRegistry};
//! use std::path::Path;
//!
//! # fn main() -> orchard_forecast::Result<()> {
//! let config = PipelineConfig::default();
//! let registry = ProgressRegistry::global();
//!
//! let ctx = registry.start_run("train-1", orchard_forecast::TRAINING_STEPS);
//! let report = run_training(&config, Path::new("uploads/station.csv"), &ctx)?;
//! println!("trained {} models", report.saved.len());
//!
//! let ctx = registry.start_run("forecast-1", orchard_forecast::FORECAST_STEPS);
//! let request = ForecastRequest {
//!     horizon: Some(30),
//!     ..ForecastRequest::default()
//! };
//! let outcome = run_forecast(&config, &request, &ctx)?;
//! println!("{} mm over {} days", outcome.summary.total_gross_need, outcome.horizon);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod forecast;
pub mod irrigation;
pub mod linalg;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod preprocessing;
pub mod progress;
pub mod schema;
pub mod service;
pub mod store;
pub mod training;

// Re-export commonly used types
pub use crate::config::{load_config, PipelineConfig};
pub use crate::data::{CsvOptions, DataLoader, ObservationTable};
pub use crate::error::{ForecastError, ModelFailure, Result};
pub use crate::forecast::{ForecastAggregator, ForecastAnchor, ForecastTable, FORECAST_STEPS};
pub use crate::irrigation::{IrrigationRecord, IrrigationSummary, IrrigationTable};
pub use crate::models::{FittedModel, ForecastModel, ModelForecast, ModelKind, ModelParams};
pub use crate::pipeline::ScaledPipeline;
pub use crate::progress::{ProgressContext, ProgressRegistry, ProgressSink, ProgressSnapshot};
pub use crate::schema::{ColumnSchema, VariableRole};
pub use crate::service::{run_forecast, run_training, store_upload, ForecastOutcome, ForecastRequest};
pub use crate::store::ModelStore;
pub use crate::training::{ModelFamily, Trainer, TrainingReport, TrainingRequest, TRAINING_STEPS};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
