//! Regression on exogenous drivers with seasonal ARIMA errors

use crate::data::ObservationTable;
use crate::error::{ForecastError, Result};
use crate::linalg::least_squares_vec;
use crate::models::sarima::{
    lag_set, order_label, validate_orders, ArimaOrder, Differencing, SeasonalArma, SeasonalOrder,
};
use crate::models::{check_horizon, check_series, ForecastModel, ModelForecast, ModelKind, ModelParams};
use log::debug;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Number of exogenous columns picked when none are configured
pub const DEFAULT_EXOG_COUNT: usize = 3;

/// Configuration of a [`SarimaxModel`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SarimaxConfig {
    /// Target column; the first column of the training table when absent
    pub target: Option<String>,
    /// Exogenous drivers; up to three other columns when empty
    pub exog: Vec<String>,
    pub order: ArimaOrder,
    pub seasonal: SeasonalOrder,
}

impl Default for SarimaxConfig {
    fn default() -> Self {
        Self {
            target: None,
            exog: Vec::new(),
            order: ArimaOrder::default(),
            seasonal: SeasonalOrder::default(),
        }
    }
}

impl SarimaxConfig {
    pub fn for_target(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::default()
        }
    }

    pub fn with_exog(mut self, exog: Vec<String>) -> Self {
        self.exog = exog;
        self
    }

    pub fn with_orders(mut self, order: ArimaOrder, seasonal: SeasonalOrder) -> Self {
        self.order = order;
        self.seasonal = seasonal;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SarimaxFit {
    target: String,
    exog: Vec<String>,
    beta: Vec<f64>,
    differencing: Differencing,
    /// Differencing tails of the regression error `y - X·beta`
    tails: Vec<Vec<f64>>,
    arma: SeasonalArma,
}

/// Seasonal ARIMA with exogenous regressors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarimaxModel {
    config: SarimaxConfig,
    fitted: Option<SarimaxFit>,
}

impl SarimaxModel {
    pub fn new(config: SarimaxConfig) -> Self {
        Self {
            config,
            fitted: None,
        }
    }

    fn label(&self) -> String {
        format!("SARIMAX{}", order_label(&self.config.order, &self.config.seasonal))
    }

    pub fn target(&self) -> Option<&str> {
        self.fitted
            .as_ref()
            .map(|f| f.target.as_str())
            .or(self.config.target.as_deref())
    }

    /// Exogenous columns used by the fitted model
    pub fn exog(&self) -> &[String] {
        match &self.fitted {
            Some(fit) => &fit.exog,
            None => &self.config.exog,
        }
    }

    /// Regression coefficients on the exogenous columns
    pub fn beta(&self) -> Option<&[f64]> {
        self.fitted.as_ref().map(|f| f.beta.as_slice())
    }
}

/// The trailing `horizon` exogenous rows of `data`, or its last row tiled
/// when the table is shorter than the horizon
fn future_exog(data: &ObservationTable, exog: &[String], horizon: usize) -> Result<Vec<Vec<f64>>> {
    let rows = data.rows_of(exog)?;
    let last = rows
        .last()
        .cloned()
        .ok_or_else(|| ForecastError::ValidationError("no exogenous rows available".to_string()))?;
    if rows.len() < horizon {
        return Ok(vec![last; horizon]);
    }
    Ok(rows[rows.len() - horizon..].to_vec())
}

impl ForecastModel for SarimaxModel {
    fn kind(&self) -> ModelKind {
        ModelKind::SeasonalArx
    }

    fn fit(&mut self, data: &ObservationTable) -> Result<()> {
        self.fitted = None;
        let label = self.label();
        validate_orders(&self.config.order, &self.config.seasonal)?;

        let target = match &self.config.target {
            Some(t) => t.clone(),
            None => data
                .columns()
                .first()
                .cloned()
                .ok_or_else(|| ForecastError::fit(&label, "table has no columns"))?,
        };
        let exog: Vec<String> = if self.config.exog.is_empty() {
            data.columns()
                .iter()
                .filter(|c| **c != target)
                .take(DEFAULT_EXOG_COUNT)
                .cloned()
                .collect()
        } else {
            self.config.exog.clone()
        };
        if exog.is_empty() {
            return Err(ForecastError::fit(&label, "no exogenous columns available"));
        }

        let y = data
            .require_column(&target)
            .map_err(|e| ForecastError::fit(&label, e))?;
        check_series(&label, &target, y)?;
        let mut x_cols = Vec::with_capacity(exog.len());
        for name in &exog {
            let col = data
                .require_column(name)
                .map_err(|e| ForecastError::fit(&label, e))?;
            check_series(&label, name, col)?;
            x_cols.push(col);
        }

        let differencing = Differencing::new(&self.config.order, &self.config.seasonal);
        let n = y.len();
        if n <= differencing.span() + exog.len() + 1 {
            return Err(ForecastError::fit(
                &label,
                format!("{} observations are too few for {} regressors", n, exog.len()),
            ));
        }

        // beta from the differenced regression, which stays consistent under unit roots
        let dy = differencing.difference(y);
        let m = dy.len();
        let mut dx = Array2::<f64>::zeros((m, exog.len()));
        for (j, col) in x_cols.iter().enumerate() {
            for (i, v) in differencing.difference(col).into_iter().enumerate() {
                dx[[i, j]] = v;
            }
        }
        let beta = least_squares_vec(&dx, &Array1::from(dy))
            .map_err(|e| ForecastError::fit(&label, e))?
            .to_vec();

        let errors: Vec<f64> = (0..n)
            .map(|t| y[t] - x_cols.iter().zip(&beta).map(|(c, b)| c[t] * b).sum::<f64>())
            .collect();
        let (w, tails) = differencing.apply(&errors);
        let ar_lags = lag_set(self.config.order.p, self.config.seasonal.p, self.config.seasonal.period);
        let ma_lags = lag_set(self.config.order.q, self.config.seasonal.q, self.config.seasonal.period);
        let arma = SeasonalArma::estimate(&w, &ar_lags, &ma_lags, false)
            .map_err(|e| ForecastError::fit(&label, e))?;

        debug!(
            "{} on '{}' with {:?}: beta = {:?}",
            label, target, exog, beta
        );

        self.fitted = Some(SarimaxFit {
            target,
            exog,
            beta,
            differencing,
            tails,
            arma,
        });
        Ok(())
    }

    fn predict(&self, data: &ObservationTable, horizon: usize) -> Result<ModelForecast> {
        let label = self.label();
        check_horizon(&label, horizon)?;
        let fit = self
            .fitted
            .as_ref()
            .ok_or_else(|| ForecastError::predict(&label, "model has not been fitted"))?;

        let exog_rows =
            future_exog(data, &fit.exog, horizon).map_err(|e| ForecastError::predict(&label, e))?;
        let error_path = fit
            .differencing
            .integrate(&fit.tails, &fit.arma.forecast(horizon));

        let values = exog_rows
            .iter()
            .zip(error_path)
            .map(|(row, u)| row.iter().zip(&fit.beta).map(|(x, b)| x * b).sum::<f64>() + u)
            .collect();
        Ok(ModelForecast::Single {
            column: fit.target.clone(),
            values,
        })
    }

    fn params(&self) -> ModelParams {
        ModelParams::SeasonalArx(self.config.clone())
    }

    fn set_params(&mut self, params: ModelParams) -> Result<()> {
        match params {
            ModelParams::SeasonalArx(config) => {
                self.config = config;
                self.fitted = None;
                Ok(())
            }
            other => Err(ForecastError::InvalidParameter(format!(
                "expected sarimax parameters, got {}",
                other.kind()
            ))),
        }
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }
}
