//! Forecasting models behind one fit/predict contract

use crate::data::ObservationTable;
use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

pub mod lstm;
pub mod recurrent;
pub mod sarima;
pub mod sarimax;
pub mod var;

pub use lstm::{LstmConfig, LstmModel};
pub use sarima::{ArimaOrder, SarimaConfig, SarimaModel, SeasonalOrder};
pub use sarimax::{SarimaxConfig, SarimaxModel, DEFAULT_EXOG_COUNT};
pub use var::{InformationCriterion, VarConfig, VarModel};

/// Output of a single `predict` call
#[derive(Debug, Clone, PartialEq)]
pub enum ModelForecast {
    /// One variable, `horizon` values
    Single { column: String, values: Vec<f64> },
    /// Several variables, column-major, each with `horizon` values
    Multi {
        columns: Vec<String>,
        values: Vec<Vec<f64>>,
    },
}

impl ModelForecast {
    /// Number of forecast steps (length of the shortest column)
    pub fn horizon(&self) -> usize {
        match self {
            ModelForecast::Single { values, .. } => values.len(),
            ModelForecast::Multi { values, .. } => {
                values.iter().map(Vec::len).min().unwrap_or(0)
            }
        }
    }

    pub fn columns(&self) -> Vec<&str> {
        match self {
            ModelForecast::Single { column, .. } => vec![column.as_str()],
            ModelForecast::Multi { columns, .. } => columns.iter().map(String::as_str).collect(),
        }
    }

    /// Values of one forecast column
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        match self {
            ModelForecast::Single { column, values } if column == name => Some(values),
            ModelForecast::Single { .. } => None,
            ModelForecast::Multi { columns, values } => columns
                .iter()
                .position(|c| c == name)
                .map(|i| values[i].as_slice()),
        }
    }

    /// Consume into `(column, values)` pairs
    pub fn into_columns(self) -> Vec<(String, Vec<f64>)> {
        match self {
            ModelForecast::Single { column, values } => vec![(column, values)],
            ModelForecast::Multi { columns, values } => columns.into_iter().zip(values).collect(),
        }
    }

    /// Apply `f(column, values)` to every column
    pub fn try_map<F>(self, mut f: F) -> Result<Self>
    where
        F: FnMut(&str, Vec<f64>) -> Result<Vec<f64>>,
    {
        match self {
            ModelForecast::Single { column, values } => {
                let values = f(&column, values)?;
                Ok(ModelForecast::Single { column, values })
            }
            ModelForecast::Multi { columns, values } => {
                let values = columns
                    .iter()
                    .zip(values)
                    .map(|(c, v)| f(c, v))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ModelForecast::Multi { columns, values })
            }
        }
    }
}

/// The four model families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    SeasonalAr,
    SeasonalArx,
    VectorAr,
    RecurrentSeq,
}

impl ModelKind {
    /// Name prefix used for persisted pipelines and forecast columns
    pub fn prefix(&self) -> &'static str {
        match self {
            ModelKind::SeasonalAr => "sarima",
            ModelKind::SeasonalArx => "sarimax",
            ModelKind::VectorAr => "var",
            ModelKind::RecurrentSeq => "lstm",
        }
    }

    /// Whether the model forecasts every column jointly
    pub fn is_multivariate(&self) -> bool {
        matches!(self, ModelKind::VectorAr | ModelKind::RecurrentSeq)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Hyper-parameters of any model, as returned by `params`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelParams {
    SeasonalAr(SarimaConfig),
    SeasonalArx(SarimaxConfig),
    VectorAr(VarConfig),
    RecurrentSeq(LstmConfig),
}

impl ModelParams {
    pub fn kind(&self) -> ModelKind {
        match self {
            ModelParams::SeasonalAr(_) => ModelKind::SeasonalAr,
            ModelParams::SeasonalArx(_) => ModelKind::SeasonalArx,
            ModelParams::VectorAr(_) => ModelKind::VectorAr,
            ModelParams::RecurrentSeq(_) => ModelKind::RecurrentSeq,
        }
    }
}

/// Forecast model that can be fitted on an observation table
pub trait ForecastModel: Debug {
    /// Family of the model
    fn kind(&self) -> ModelKind;

    /// Estimate the model from `data`, replacing any previous fit
    fn fit(&mut self, data: &ObservationTable) -> Result<()>;

    /// Forecast `horizon` steps after the end of the fitted (or passed) data
    fn predict(&self, data: &ObservationTable, horizon: usize) -> Result<ModelForecast>;

    /// Current hyper-parameters
    fn params(&self) -> ModelParams;

    /// Replace the hyper-parameters; the fitted state is discarded
    fn set_params(&mut self, params: ModelParams) -> Result<()>;

    fn is_fitted(&self) -> bool;
}

/// Tagged union over the four model families, the unit that is persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "model", rename_all = "snake_case")]
pub enum FittedModel {
    SeasonalAr(SarimaModel),
    SeasonalArx(SarimaxModel),
    VectorAr(VarModel),
    RecurrentSeq(LstmModel),
}

impl FittedModel {
    /// Unfitted model configured by `params`
    pub fn from_params(params: ModelParams) -> Self {
        match params {
            ModelParams::SeasonalAr(c) => FittedModel::SeasonalAr(SarimaModel::new(c)),
            ModelParams::SeasonalArx(c) => FittedModel::SeasonalArx(SarimaxModel::new(c)),
            ModelParams::VectorAr(c) => FittedModel::VectorAr(VarModel::new(c)),
            ModelParams::RecurrentSeq(c) => FittedModel::RecurrentSeq(LstmModel::new(c)),
        }
    }

    fn inner(&self) -> &dyn ForecastModel {
        match self {
            FittedModel::SeasonalAr(m) => m,
            FittedModel::SeasonalArx(m) => m,
            FittedModel::VectorAr(m) => m,
            FittedModel::RecurrentSeq(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ForecastModel {
        match self {
            FittedModel::SeasonalAr(m) => m,
            FittedModel::SeasonalArx(m) => m,
            FittedModel::VectorAr(m) => m,
            FittedModel::RecurrentSeq(m) => m,
        }
    }
}

impl ForecastModel for FittedModel {
    fn kind(&self) -> ModelKind {
        self.inner().kind()
    }

    fn fit(&mut self, data: &ObservationTable) -> Result<()> {
        self.inner_mut().fit(data)
    }

    fn predict(&self, data: &ObservationTable, horizon: usize) -> Result<ModelForecast> {
        self.inner().predict(data, horizon)
    }

    fn params(&self) -> ModelParams {
        self.inner().params()
    }

    fn set_params(&mut self, params: ModelParams) -> Result<()> {
        if params.kind() != self.kind() {
            return Err(ForecastError::InvalidParameter(format!(
                "cannot apply {} parameters to a {} model",
                params.kind(),
                self.kind()
            )));
        }
        self.inner_mut().set_params(params)
    }

    fn is_fitted(&self) -> bool {
        self.inner().is_fitted()
    }
}

/// Shared guard used by `predict` implementations
pub(crate) fn check_horizon(model: &str, horizon: usize) -> Result<()> {
    if horizon == 0 {
        return Err(ForecastError::predict(model, "horizon must be at least one step"));
    }
    Ok(())
}

/// Reject series with missing or non-numeric cells before fitting
pub(crate) fn check_series(model: &str, column: &str, values: &[f64]) -> Result<()> {
    if values.is_empty() {
        return Err(ForecastError::fit(model, format!("column '{}' is empty", column)));
    }
    if let Some(i) = values.iter().position(|v| !v.is_finite()) {
        return Err(ForecastError::fit(
            model,
            format!("column '{}' has a missing or non-numeric value at row {}", column, i),
        ));
    }
    Ok(())
}
