//! Scaler plus model: the unit that is trained, persisted and forecast with

use crate::data::ObservationTable;
use crate::error::{ForecastError, Result};
use crate::models::{FittedModel, ForecastModel, ModelForecast, ModelKind};
use crate::preprocessing::{ColumnScaler, ScalingStrategy};
use crate::schema::ColumnSchema;
use serde::{Deserialize, Serialize};

/// A fitted model together with the column scaler it was trained behind.
///
/// Inputs are scaled with the training-time statistics before they reach the
/// model, and forecasts are mapped back to physical units on the way out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaledPipeline {
    name: String,
    scaler: ColumnScaler,
    model: FittedModel,
}

/// Re-label a model error with the pipeline name
fn attribute(name: &str, err: ForecastError, predicting: bool) -> ForecastError {
    match (err, predicting) {
        (ForecastError::ModelFit { reason, .. }, _) => ForecastError::fit(name, reason),
        (ForecastError::ModelPredict { reason, .. }, _) => ForecastError::predict(name, reason),
        (other, false) => ForecastError::fit(name, other),
        (other, true) => ForecastError::predict(name, other),
    }
}

impl ScaledPipeline {
    /// Fit the scaler on `data`, then the model on the scaled table
    pub fn fit(
        name: impl Into<String>,
        mut model: FittedModel,
        strategy: ScalingStrategy,
        schema: &ColumnSchema,
        data: &ObservationTable,
    ) -> Result<Self> {
        let name = name.into();
        let scaler =
            ColumnScaler::fit(data, strategy, schema).map_err(|e| attribute(&name, e, false))?;
        let scaled = scaler.transform(data).map_err(|e| attribute(&name, e, false))?;
        model.fit(&scaled).map_err(|e| attribute(&name, e, false))?;

        Ok(Self {
            name,
            scaler,
            model,
        })
    }

    /// Forecast `horizon` days in the original units of each column
    pub fn predict(&self, data: &ObservationTable, horizon: usize) -> Result<ModelForecast> {
        let scaled = self
            .scaler
            .transform(data)
            .map_err(|e| attribute(&self.name, e, true))?;
        let forecast = self
            .model
            .predict(&scaled, horizon)
            .map_err(|e| attribute(&self.name, e, true))?;
        forecast
            .try_map(|column, values| self.scaler.inverse_column(column, &values))
            .map_err(|e| attribute(&self.name, e, true))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ModelKind {
        self.model.kind()
    }

    pub fn model(&self) -> &FittedModel {
        &self.model
    }

    pub fn scaler(&self) -> &ColumnScaler {
        &self.scaler
    }

    /// Columns the pipeline was trained on, in training order
    pub fn columns(&self) -> &[String] {
        self.scaler.columns()
    }
}
