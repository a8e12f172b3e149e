//! Forecast aggregation: run every loaded pipeline and merge the outputs
//! into one table of future dates

use crate::data::{date_series, ObservationTable};
use crate::error::{ForecastError, ModelFailure, Result};
use crate::models::ModelKind;
use crate::pipeline::ScaledPipeline;
use crate::progress::ProgressContext;
use chrono::{Days, NaiveDate};
use log::warn;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Progress steps of a forecast run
pub const FORECAST_STEPS: usize = 6;

/// Day the forecast dates are counted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastAnchor {
    /// First forecast day is tomorrow
    #[default]
    Today,
    /// First forecast day follows the last observed date
    LastObservation,
}

impl ForecastAnchor {
    /// The date the forecast starts after
    pub fn reference_date(&self, today: NaiveDate, data: &ObservationTable) -> Result<NaiveDate> {
        match self {
            ForecastAnchor::Today => Ok(today),
            ForecastAnchor::LastObservation => data.last_date().ok_or_else(|| {
                ForecastError::ValidationError("observation table has no dates".to_string())
            }),
        }
    }
}

/// Validate a requested horizon against the cap; values above it are clamped.
pub fn resolve_horizon(requested: usize, max_horizon: usize) -> Result<usize> {
    if requested == 0 {
        return Err(ForecastError::InvalidParameter(
            "horizon must be at least one day".to_string(),
        ));
    }
    if requested > max_horizon {
        warn!(
            "Requested horizon {} exceeds the maximum of {}, clamping",
            requested, max_horizon
        );
        return Ok(max_horizon);
    }
    Ok(requested)
}

/// Truncate to `horizon` values, or pad by repeating the last value
pub fn fit_to_horizon(mut values: Vec<f64>, horizon: usize) -> Vec<f64> {
    match values.last().copied() {
        Some(last) if values.len() < horizon => values.resize(horizon, last),
        _ => values.truncate(horizon),
    }
    values
}

/// Future-dated table with one column per predicted variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastTable {
    dates: Vec<NaiveDate>,
    columns: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl ForecastTable {
    /// Build a table of `horizon` days starting the day after `reference`.
    ///
    /// Every column is padded or truncated to exactly `horizon` values;
    /// empty columns are dropped.
    pub fn new(
        reference: NaiveDate,
        horizon: usize,
        predictions: Vec<(String, Vec<f64>)>,
    ) -> Result<Self> {
        let start = reference
            .checked_add_days(Days::new(1))
            .ok_or_else(|| ForecastError::ValidationError("date out of range".to_string()))?;
        let dates: Vec<NaiveDate> = start.iter_days().take(horizon).collect();

        let mut columns = Vec::with_capacity(predictions.len());
        let mut values = Vec::with_capacity(predictions.len());
        for (name, column) in predictions {
            if column.is_empty() {
                warn!("Dropping empty forecast column {}", name);
                continue;
            }
            if columns.contains(&name) {
                warn!("Duplicate forecast column {}, keeping the first", name);
                continue;
            }
            columns.push(name);
            values.push(fit_to_horizon(column, horizon));
        }

        Ok(Self {
            dates,
            columns,
            values,
        })
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| self.values[i].as_slice())
    }

    /// Number of forecast days
    pub fn horizon(&self) -> usize {
        self.dates.len()
    }

    /// True when there are no rows or no columns
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() || self.columns.is_empty()
    }

    /// Convert to a DataFrame with a leading `date` column
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut series = vec![date_series("date", &self.dates)?];
        for (name, column) in self.columns.iter().zip(&self.values) {
            series.push(Series::new(name, column.clone()));
        }
        Ok(DataFrame::new(series)?)
    }
}

/// Raw per-model forecast columns plus the models that failed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predictions {
    pub columns: Vec<(String, Vec<f64>)>,
    pub failures: Vec<ModelFailure>,
}

/// Runs the loaded model bank and merges its outputs
#[derive(Debug, Clone, Copy)]
pub struct ForecastAggregator {
    horizon: usize,
}

impl ForecastAggregator {
    pub fn new(horizon: usize) -> Result<Self> {
        if horizon == 0 {
            return Err(ForecastError::InvalidParameter(
                "horizon must be at least one day".to_string(),
            ));
        }
        Ok(Self { horizon })
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Predict with every pipeline, isolating per-model failures.
    ///
    /// Seasonal models contribute the bare variable name (or `SARIMAX_<var>`);
    /// multivariate models contribute `VAR_<col>` and `LSTM_<col>`.
    pub fn predict(
        &self,
        pipelines: &[ScaledPipeline],
        data: &ObservationTable,
        ctx: &ProgressContext,
    ) -> Predictions {
        let mut out = Predictions::default();
        if pipelines.is_empty() {
            ctx.update(3, "No models loaded, nothing to predict");
            return out;
        }

        let sarima = of_kind(pipelines, ModelKind::SeasonalAr);
        let sarimax = of_kind(pipelines, ModelKind::SeasonalArx);
        let var = of_kind(pipelines, ModelKind::VectorAr);
        let lstm = of_kind(pipelines, ModelKind::RecurrentSeq);

        ctx.update(3, format!("Generating predictions for {} days", self.horizon));
        ctx.note(format!(
            "SARIMA: {}, SARIMAX: {}, VAR: {}, LSTM: {}",
            sarima.len(),
            sarimax.len(),
            var.len(),
            lstm.len()
        ));
        // one counted sub-step per pipeline, whatever its outcome
        let total = Some(pipelines.len());

        for (group, prefix) in [(&sarima, ""), (&sarimax, "SARIMAX_")] {
            for pipeline in group.iter().copied() {
                let Some(target) = seasonal_target(pipeline) else {
                    ctx.substep(format!("Skipping {}: no target variable", pipeline.name()), total);
                    continue;
                };
                if data.column(&target).is_none() {
                    ctx.substep(
                        format!("Skipping {}: '{}' not in latest data", pipeline.name(), target),
                        total,
                    );
                    continue;
                }
                if let Some(values) = self.run(pipeline, data, &target, total, ctx, &mut out.failures) {
                    out.columns.push((format!("{}{}", prefix, target), values));
                }
            }
        }

        for (group, prefix) in [(&var, "VAR_"), (&lstm, "LSTM_")] {
            for pipeline in group.iter().copied() {
                match pipeline.predict(data, self.horizon) {
                    Ok(forecast) => {
                        let columns = forecast.into_columns();
                        ctx.substep(
                            format!("{}: {} variables predicted", pipeline.name(), columns.len()),
                            total,
                        );
                        out.columns.extend(
                            columns
                                .into_iter()
                                .map(|(column, values)| (format!("{}{}", prefix, column), values)),
                        );
                    }
                    Err(e) => record_failure(pipeline, e, total, ctx, &mut out.failures),
                }
            }
        }

        ctx.update(3, format!("Total predictions generated: {}", out.columns.len()));
        out
    }

    /// Merge predictions into the forecast table; fails when nothing was predicted
    pub fn unify(
        &self,
        predictions: Predictions,
        reference: NaiveDate,
        ctx: &ProgressContext,
    ) -> Result<ForecastTable> {
        ctx.update(4, "Unifying predictions...");
        if predictions.columns.is_empty() {
            let reason = if predictions.failures.is_empty() {
                "no models produced output".to_string()
            } else {
                let names: Vec<&str> = predictions.failures.iter().map(|f| f.model.as_str()).collect();
                format!("every model failed ({})", names.join(", "))
            };
            return Err(ForecastError::NoForecast(reason));
        }

        let table = ForecastTable::new(reference, self.horizon, predictions.columns)?;
        ctx.note(format!(
            "Unified table: {} rows x {} columns",
            table.horizon(),
            table.columns().len()
        ));
        Ok(table)
    }

    /// Predict and unify in one call
    pub fn aggregate(
        &self,
        pipelines: &[ScaledPipeline],
        data: &ObservationTable,
        reference: NaiveDate,
        ctx: &ProgressContext,
    ) -> Result<ForecastTable> {
        let predictions = self.predict(pipelines, data, ctx);
        self.unify(predictions, reference, ctx)
    }

    fn run(
        &self,
        pipeline: &ScaledPipeline,
        data: &ObservationTable,
        target: &str,
        total: Option<usize>,
        ctx: &ProgressContext,
        failures: &mut Vec<ModelFailure>,
    ) -> Option<Vec<f64>> {
        let forecast = match pipeline.predict(data, self.horizon) {
            Ok(forecast) => forecast,
            Err(e) => {
                record_failure(pipeline, e, total, ctx, failures);
                return None;
            }
        };
        match forecast.column(target) {
            Some(values) => {
                ctx.substep(format!("{}: {} values", pipeline.name(), values.len()), total);
                Some(values.to_vec())
            }
            None => {
                let e = ForecastError::predict(
                    pipeline.name(),
                    format!("forecast has no column '{}'", target),
                );
                record_failure(pipeline, e, total, ctx, failures);
                None
            }
        }
    }
}

fn of_kind(pipelines: &[ScaledPipeline], kind: ModelKind) -> Vec<&ScaledPipeline> {
    pipelines.iter().filter(|p| p.kind() == kind).collect()
}

/// Target variable of a seasonal pipeline, from its name
fn seasonal_target(pipeline: &ScaledPipeline) -> Option<String> {
    let prefix = format!("{}_", pipeline.kind().prefix());
    pipeline
        .name()
        .strip_prefix(&prefix)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn record_failure(
    pipeline: &ScaledPipeline,
    err: ForecastError,
    total: Option<usize>,
    ctx: &ProgressContext,
    failures: &mut Vec<ModelFailure>,
) {
    warn!("{}", err);
    ctx.substep(format!("Error in {}: {}", pipeline.name(), err), total);
    failures.push(ModelFailure::new(pipeline.name(), &err));
}
