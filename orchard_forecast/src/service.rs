//! Run-level entry points: upload, training and forecasting

use crate::config::PipelineConfig;
use crate::data::{DataLoader, ObservationTable};
use crate::error::{ForecastError, ModelFailure, Result};
use crate::forecast::{resolve_horizon, ForecastAggregator, ForecastTable};
use crate::irrigation::{IrrigationSummary, IrrigationTable};
use crate::pipeline::ScaledPipeline;
use crate::progress::ProgressContext;
use crate::store::ModelStore;
use crate::training::{Trainer, TrainingReport, TrainingRequest};
use chrono::{Local, NaiveDate};
use log::{error, info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

impl From<&PipelineConfig> for TrainingRequest {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            test_size: config.training.test_size,
            families: config.training.families.clone(),
            schema: config.schema.clone(),
            sarima: config.sarima.clone(),
            sarimax: config.sarimax.clone(),
            var: config.var.clone(),
            lstm: config.lstm.clone(),
        }
    }
}

/// Parameters of a forecast run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastRequest {
    /// Days to forecast; the configured default when absent
    pub horizon: Option<usize>,
    /// Observation file; the latest upload when absent
    pub dataset: Option<PathBuf>,
    /// Overrides the current local date
    pub today: Option<NaiveDate>,
}

/// Everything a forecast run produces
#[derive(Debug, Clone, Serialize)]
pub struct ForecastOutcome {
    pub run_id: String,
    pub horizon: usize,
    pub reference_date: NaiveDate,
    pub models_used: Vec<String>,
    pub failures: Vec<ModelFailure>,
    pub forecast: ForecastTable,
    pub irrigation: IrrigationTable,
    pub summary: IrrigationSummary,
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Mark the run failed with the error as its last message
fn finish<T>(result: Result<T>, ctx: &ProgressContext, step: usize) -> Result<T> {
    match result {
        Ok(value) => {
            ctx.complete(false);
            Ok(value)
        }
        Err(e) => {
            error!("[{}] {}", ctx.run_id(), e);
            ctx.update(step, format!("Error: {}", e));
            ctx.complete(true);
            Err(e)
        }
    }
}

/// Report shape, date range and first/last rows of a loaded table
pub fn report_data_summary(table: &ObservationTable, step: usize, ctx: &ProgressContext) {
    ctx.update(
        step,
        format!("Data loaded: {} rows x {} columns", table.len(), table.columns().len()),
    );
    if let (Some(first), Some(last)) = (table.first_date(), table.last_date()) {
        ctx.note(format!("Date range: {} to {}", first, last));
    }
    ctx.note(format!("Columns: {}", table.columns().join(", ")));

    let n = table.len();
    let shown: Vec<usize> = (0..n.min(3)).chain(n.saturating_sub(3).max(3)..n).collect();
    for i in shown {
        if let Some(row) = table.row(i) {
            let cells: Vec<String> = table
                .columns()
                .iter()
                .zip(row)
                .map(|(c, v)| format!("{}={:.3}", c, v))
                .collect();
            ctx.note(format!("{}: {}", table.dates()[i], cells.join(", ")));
        }
    }
}

/// Copy a CSV upload into the uploads directory after checking it parses.
///
/// `name` defaults to the source file name; a `.csv` extension is added
/// when missing.
pub fn store_upload(config: &PipelineConfig, source: &Path, name: Option<&str>) -> Result<PathBuf> {
    let is_csv = source
        .extension()
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if !is_csv {
        return Err(ForecastError::UnsupportedFormat(format!(
            "{} (only .csv files are accepted)",
            source.display()
        )));
    }

    let file_name = match name {
        Some(n) if n.to_lowercase().ends_with(".csv") => n.to_string(),
        Some(n) => format!("{}.csv", n),
        None => source
            .file_name()
            .and_then(|f| f.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ForecastError::InvalidParameter(format!("{} has no file name", source.display()))
            })?,
    };
    if file_name.contains(['/', '\\']) || file_name.starts_with('.') {
        return Err(ForecastError::InvalidParameter(format!(
            "'{}' is not a valid upload name",
            file_name
        )));
    }

    let table = DataLoader::from_csv(source, &config.csv, today())?;
    info!(
        "Upload {} parsed: {} rows x {} columns",
        source.display(),
        table.len(),
        table.columns().len()
    );

    fs::create_dir_all(&config.directories.uploads_dir)?;
    let target = config.directories.uploads_dir.join(file_name);
    fs::copy(source, &target)?;
    Ok(target)
}

/// Load `dataset`, then train, evaluate and persist the configured families
pub fn run_training(
    config: &PipelineConfig,
    dataset: &Path,
    ctx: &ProgressContext,
) -> Result<TrainingReport> {
    let result = (|| -> Result<TrainingReport> {
        ctx.update(1, format!("Loading data from {}", dataset.display()));
        let data = DataLoader::from_csv(dataset, &config.csv, today())?;
        report_data_summary(&data, 1, ctx);

        let store = ModelStore::new(&config.directories.models_dir);
        let request = TrainingRequest::from(config);
        let report = Trainer::new(&store).train(&request, &data, ctx)?;

        ctx.update(
            5,
            format!("Training completed, models saved in {}", store.dir().display()),
        );
        Ok(report)
    })();
    finish(result, ctx, 5)
}

/// Load the model bank, forecast, and compute the irrigation table
pub fn run_forecast(
    config: &PipelineConfig,
    request: &ForecastRequest,
    ctx: &ProgressContext,
) -> Result<ForecastOutcome> {
    let result = (|| -> Result<ForecastOutcome> {
        let requested = request.horizon.unwrap_or(config.forecast.default_horizon);
        let horizon = resolve_horizon(requested, config.forecast.max_horizon)?;
        let current = request.today.unwrap_or_else(today);
        ctx.update(0, format!("Starting forecast for {} days", horizon));

        let (pipelines, mut failures) = load_models(&config.directories.models_dir, ctx)?;

        let dataset = match &request.dataset {
            Some(path) => path.clone(),
            None => DataLoader::latest_upload(&config.directories.uploads_dir)?,
        };
        ctx.update(2, format!("Loading latest data from {}", dataset.display()));
        let data = DataLoader::from_csv(&dataset, &config.csv, current)?;
        report_data_summary(&data, 2, ctx);

        let aggregator = ForecastAggregator::new(horizon)?;
        let reference_date = config.forecast.anchor.reference_date(current, &data)?;
        let predictions = aggregator.predict(&pipelines, &data, ctx);
        failures.extend(predictions.failures.iter().cloned());
        let forecast = aggregator.unify(predictions, reference_date, ctx)?;

        let irrigation =
            IrrigationTable::compute_with_progress(&forecast, &config.schema, &config.irrigation, ctx)?;
        let summary = irrigation.summary();

        ctx.update(6, "Forecast completed");
        Ok(ForecastOutcome {
            run_id: ctx.run_id().to_string(),
            horizon,
            reference_date,
            models_used: pipelines.iter().map(|p| p.name().to_string()).collect(),
            failures,
            forecast,
            irrigation,
            summary,
        })
    })();
    finish(result, ctx, 6)
}

/// Load every stored pipeline; unreadable files are reported and skipped
fn load_models(dir: &Path, ctx: &ProgressContext) -> Result<(Vec<ScaledPipeline>, Vec<ModelFailure>)> {
    ctx.update(1, format!("Loading models from {}", dir.display()));
    let store = ModelStore::new(dir);
    let entries = store.load_all()?;
    let total = entries.len();

    let mut pipelines = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for (name, loaded) in entries {
        match loaded {
            Ok(pipeline) => {
                ctx.substep(format!("Loaded {}", name), Some(total));
                pipelines.push(pipeline);
            }
            Err(e) => {
                warn!("Skipping {}: {}", name, e);
                ctx.substep(format!("Error loading {}: {}", name, e), Some(total));
                failures.push(ModelFailure::new(name, &e));
            }
        }
    }

    if pipelines.is_empty() {
        return Err(ForecastError::NoForecast(format!(
            "no usable models in {}",
            dir.display()
        )));
    }
    ctx.note(format!("{} models loaded", pipelines.len()));
    Ok((pipelines, failures))
}
