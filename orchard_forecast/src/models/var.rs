//! Vector autoregression across all columns

use crate::data::ObservationTable;
use crate::error::{ForecastError, Result};
use crate::linalg::{least_squares, log_det_spd};
use crate::models::{check_horizon, check_series, ForecastModel, ModelForecast, ModelKind, ModelParams};
use log::{debug, warn};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Information criterion used to pick the lag order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InformationCriterion {
    Aic,
    Bic,
    Hqic,
}

impl InformationCriterion {
    /// `ln|Σ| + penalty · free_params`
    fn score(&self, log_det: f64, nobs: usize, free_params: usize) -> f64 {
        let t = nobs as f64;
        let k = free_params as f64;
        let penalty = match self {
            InformationCriterion::Aic => 2.0 / t,
            InformationCriterion::Bic => t.ln() / t,
            InformationCriterion::Hqic => 2.0 * t.ln().ln() / t,
        };
        log_det + penalty * k
    }
}

impl fmt::Display for InformationCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InformationCriterion::Aic => "aic",
            InformationCriterion::Bic => "bic",
            InformationCriterion::Hqic => "hqic",
        };
        f.write_str(name)
    }
}

/// Configuration of a [`VarModel`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VarConfig {
    pub max_lags: usize,
    pub criterion: InformationCriterion,
}

impl Default for VarConfig {
    fn default() -> Self {
        Self {
            max_lags: 15,
            criterion: InformationCriterion::Aic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct VarFit {
    columns: Vec<String>,
    lag_order: usize,
    /// `(1 + k·p) × k`: intercept row, then lag 1 block, lag 2 block, ...
    coefficients: Array2<f64>,
    /// Residual covariance of the final fit
    sigma: Array2<f64>,
    /// Criterion value per candidate lag order
    scores: Vec<(usize, f64)>,
}

/// Vector autoregression with information-criterion lag selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarModel {
    config: VarConfig,
    fitted: Option<VarFit>,
}

/// Regressors `[1, y_{t-1}, ..., y_{t-p}]` and targets `y_t` for `t` in `start..n`
fn design(data: &Array2<f64>, p: usize, start: usize) -> (Array2<f64>, Array2<f64>) {
    let (n, k) = data.dim();
    let rows = n - start;
    let mut x = Array2::<f64>::zeros((rows, 1 + k * p));
    for (r, t) in (start..n).enumerate() {
        x[[r, 0]] = 1.0;
        for lag in 1..=p {
            let offset = 1 + (lag - 1) * k;
            x.slice_mut(s![r, offset..offset + k])
                .assign(&data.row(t - lag));
        }
    }
    let y = data.slice(s![start.., ..]).to_owned();
    (x, y)
}

/// OLS fit returning coefficients and the ML residual covariance
fn fit_ols(data: &Array2<f64>, p: usize, start: usize) -> Result<(Array2<f64>, Array2<f64>)> {
    let (x, y) = design(data, p, start);
    let b = least_squares(&x, &y)?;
    let resid = &y - &x.dot(&b);
    let sigma = resid.t().dot(&resid) / resid.nrows() as f64;
    Ok((b, sigma))
}

impl VarModel {
    pub fn new(config: VarConfig) -> Self {
        Self {
            config,
            fitted: None,
        }
    }

    /// Selected lag order, once fitted
    pub fn lag_order(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.lag_order)
    }

    /// Criterion value for every candidate lag order
    pub fn selection_scores(&self) -> Option<&[(usize, f64)]> {
        self.fitted.as_ref().map(|f| f.scores.as_slice())
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.fitted.as_ref().map(|f| f.columns.as_slice())
    }

    pub fn residual_covariance(&self) -> Option<&Array2<f64>> {
        self.fitted.as_ref().map(|f| &f.sigma)
    }
}

impl ForecastModel for VarModel {
    fn kind(&self) -> ModelKind {
        ModelKind::VectorAr
    }

    fn fit(&mut self, data: &ObservationTable) -> Result<()> {
        self.fitted = None;
        let label = "VAR";
        if self.config.max_lags == 0 {
            return Err(ForecastError::InvalidParameter(
                "max_lags must be at least 1".to_string(),
            ));
        }

        let columns = data.columns().to_vec();
        let k = columns.len();
        if k == 0 {
            return Err(ForecastError::fit(label, "table has no columns"));
        }
        for name in &columns {
            check_series(label, name, data.require_column(name)?)?;
        }

        let n = data.len();
        let rows = data.rows_of(&columns)?;
        let matrix = Array2::from_shape_vec((n, k), rows.into_iter().flatten().collect())
            .map_err(|e| ForecastError::fit(label, e))?;

        // largest order whose common sample still identifies every equation
        let mut max_p = self.config.max_lags;
        while max_p > 0 && n.saturating_sub(max_p) <= 1 + k * max_p {
            max_p -= 1;
        }
        if max_p == 0 {
            return Err(ForecastError::fit(
                label,
                format!("{} observations are too few for a VAR on {} columns", n, k),
            ));
        }
        if max_p < self.config.max_lags {
            warn!(
                "VAR max_lags reduced from {} to {} for {} observations",
                self.config.max_lags, max_p, n
            );
        }

        let nobs = n - max_p;
        let mut scores = Vec::with_capacity(max_p);
        for p in 1..=max_p {
            let (_, sigma) = fit_ols(&matrix, p, max_p).map_err(|e| ForecastError::fit(label, e))?;
            match log_det_spd(&sigma) {
                Ok(ld) => scores.push((p, self.config.criterion.score(ld, nobs, k * k * p + k))),
                Err(e) => debug!("VAR lag {} skipped: {}", p, e),
            }
        }

        let (lag_order, _) = scores
            .iter()
            .copied()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| {
                ForecastError::fit(label, "residual covariance is singular for every lag order")
            })?;

        let (coefficients, sigma) =
            fit_ols(&matrix, lag_order, lag_order).map_err(|e| ForecastError::fit(label, e))?;
        debug!(
            "VAR selected lag order {} by {} over {} columns",
            lag_order, self.config.criterion, k
        );

        self.fitted = Some(VarFit {
            columns,
            lag_order,
            coefficients,
            sigma,
            scores,
        });
        Ok(())
    }

    /// Rolls the fitted equations forward from the last `lag_order` rows of `data`
    fn predict(&self, data: &ObservationTable, horizon: usize) -> Result<ModelForecast> {
        let label = "VAR";
        check_horizon(label, horizon)?;
        let fit = self
            .fitted
            .as_ref()
            .ok_or_else(|| ForecastError::predict(label, "model has not been fitted"))?;

        let p = fit.lag_order;
        if data.len() < p {
            return Err(ForecastError::predict(
                label,
                format!("needs {} trailing observations, got {}", p, data.len()),
            ));
        }
        let mut history = data
            .tail(p)
            .rows_of(&fit.columns)
            .map_err(|e| ForecastError::predict(label, e))?;
        if history.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ForecastError::predict(label, "input rows contain missing values"));
        }

        let k = fit.columns.len();
        let mut values = vec![Vec::with_capacity(horizon); k];
        for _ in 0..horizon {
            let mut next: Vec<f64> = fit.coefficients.row(0).to_vec();
            for lag in 1..=p {
                let past = &history[history.len() - lag];
                let offset = 1 + (lag - 1) * k;
                for (i, x) in past.iter().enumerate() {
                    for (j, out) in next.iter_mut().enumerate() {
                        *out += x * fit.coefficients[[offset + i, j]];
                    }
                }
            }
            for (j, v) in next.iter().enumerate() {
                values[j].push(*v);
            }
            history.push(next);
        }

        Ok(ModelForecast::Multi {
            columns: fit.columns.clone(),
            values,
        })
    }

    fn params(&self) -> ModelParams {
        ModelParams::VectorAr(self.config.clone())
    }

    fn set_params(&mut self, params: ModelParams) -> Result<()> {
        match params {
            ModelParams::VectorAr(config) => {
                self.config = config;
                self.fitted = None;
                Ok(())
            }
            other => Err(ForecastError::InvalidParameter(format!(
                "expected var parameters, got {}",
                other.kind()
            ))),
        }
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn simulated(rows: usize) -> ObservationTable {
        let mut rng = StdRng::seed_from_u64(11);
        let noise = Normal::new(0.0, 0.5).unwrap();
        let mut a = vec![0.0; rows];
        let mut b = vec![0.0; rows];
        for t in 1..rows {
            a[t] = 0.5 * a[t - 1] + 0.2 * b[t - 1] + noise.sample(&mut rng);
            b[t] = -0.3 * a[t - 1] + 0.4 * b[t - 1] + noise.sample(&mut rng);
        }
        let start = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        ObservationTable::new(
            start.iter_days().take(rows).collect(),
            vec!["a".into(), "b".into()],
            vec![a, b],
        )
        .unwrap()
    }

    #[test]
    fn test_selects_low_order_for_var1() {
        let mut model = VarModel::new(VarConfig {
            max_lags: 6,
            criterion: InformationCriterion::Bic,
        });
        model.fit(&simulated(1500)).unwrap();
        assert_eq!(model.lag_order(), Some(1));
        assert_eq!(model.selection_scores().unwrap().len(), 6);
    }

    #[test]
    fn test_forecast_shape_and_determinism() {
        let data = simulated(300);
        let mut model = VarModel::new(VarConfig::default());
        model.fit(&data).unwrap();

        let a = model.predict(&data, 7).unwrap();
        let b = model.predict(&data, 7).unwrap();
        assert_eq!(a.horizon(), 7);
        assert_eq!(a.columns(), vec!["a", "b"]);
        for (x, y) in a.column("a").unwrap().iter().zip(b.column("a").unwrap()) {
            assert_relative_eq!(x, y);
        }
    }

    #[test]
    fn test_predict_needs_lag_order_rows() {
        let data = simulated(300);
        let mut model = VarModel::new(VarConfig {
            max_lags: 3,
            criterion: InformationCriterion::Aic,
        });
        model.fit(&data).unwrap();
        let p = model.lag_order().unwrap();
        assert!(model.predict(&data.tail(p), 3).is_ok());
        if p > 1 {
            assert!(model.predict(&data.tail(p - 1), 3).is_err());
        }
        assert!(model.predict(&data.tail(0), 3).is_err());
    }
}
