//! Seasonal ARIMA for a single variable
//!
//! The series is differenced `d` times at lag 1 and `D` times at the
//! seasonal period. The differenced series is modelled as an ARMA process
//! whose lags are the union of the non-seasonal lags `1..=p` and the
//! seasonal lags `s, 2s, ..., Ps` (likewise for the MA side). Coefficients
//! are estimated with the Hannan-Rissanen two-stage regression: a long
//! autoregression supplies residual estimates, which then enter an ordinary
//! least-squares fit of the full ARMA equation.

use crate::data::ObservationTable;
use crate::error::{ForecastError, Result};
use crate::linalg::least_squares_vec;
use crate::models::{check_horizon, check_series, ForecastModel, ModelForecast, ModelKind, ModelParams};
use log::debug;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Non-seasonal (p, d, q) order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

impl Default for ArimaOrder {
    fn default() -> Self {
        Self { p: 1, d: 1, q: 1 }
    }
}

/// Seasonal (P, D, Q, s) order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonalOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub period: usize,
}

impl Default for SeasonalOrder {
    fn default() -> Self {
        Self {
            p: 1,
            d: 1,
            q: 1,
            period: 30,
        }
    }
}

impl SeasonalOrder {
    /// No seasonal component
    pub fn none() -> Self {
        Self {
            p: 0,
            d: 0,
            q: 0,
            period: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.p == 0 && self.d == 0 && self.q == 0
    }
}

pub(crate) fn validate_orders(order: &ArimaOrder, seasonal: &SeasonalOrder) -> Result<()> {
    if !seasonal.is_empty() && seasonal.period < 2 {
        return Err(ForecastError::InvalidParameter(format!(
            "seasonal order ({}, {}, {}) needs a period of at least 2, got {}",
            seasonal.p, seasonal.d, seasonal.q, seasonal.period
        )));
    }
    if order.d + seasonal.d > 3 {
        return Err(ForecastError::InvalidParameter(format!(
            "total differencing order {} is too high",
            order.d + seasonal.d
        )));
    }
    Ok(())
}

pub(crate) fn order_label(order: &ArimaOrder, seasonal: &SeasonalOrder) -> String {
    format!(
        "({},{},{})({},{},{},{})",
        order.p, order.d, order.q, seasonal.p, seasonal.d, seasonal.q, seasonal.period
    )
}

/// Configuration of a [`SarimaModel`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SarimaConfig {
    /// Target column; the first column of the training table when absent
    pub column: Option<String>,
    pub order: ArimaOrder,
    pub seasonal: SeasonalOrder,
    /// Constant term in the differenced equation
    pub intercept: bool,
}

impl Default for SarimaConfig {
    fn default() -> Self {
        Self {
            column: None,
            order: ArimaOrder::default(),
            seasonal: SeasonalOrder::default(),
            intercept: true,
        }
    }
}

impl SarimaConfig {
    pub fn for_column(column: impl Into<String>) -> Self {
        Self {
            column: Some(column.into()),
            ..Self::default()
        }
    }

    pub fn with_orders(mut self, order: ArimaOrder, seasonal: SeasonalOrder) -> Self {
        self.order = order;
        self.seasonal = seasonal;
        self
    }
}

/// Ordinary and seasonal differencing with the state needed to undo it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Differencing {
    lags: Vec<usize>,
}

impl Differencing {
    pub(crate) fn new(order: &ArimaOrder, seasonal: &SeasonalOrder) -> Self {
        let mut lags = vec![1; order.d];
        lags.extend(std::iter::repeat(seasonal.period).take(seasonal.d));
        Self { lags }
    }

    /// Observations consumed by differencing
    pub(crate) fn span(&self) -> usize {
        self.lags.iter().sum()
    }

    /// Differenced series
    pub(crate) fn difference(&self, series: &[f64]) -> Vec<f64> {
        self.apply(series).0
    }

    /// Differenced series plus, for every stage, the trailing values of the
    /// series entering that stage
    pub(crate) fn apply(&self, series: &[f64]) -> (Vec<f64>, Vec<Vec<f64>>) {
        let mut current = series.to_vec();
        let mut tails = Vec::with_capacity(self.lags.len());
        for &lag in &self.lags {
            let start = current.len().saturating_sub(lag);
            tails.push(current[start..].to_vec());
            current = (lag..current.len())
                .map(|t| current[t] - current[t - lag])
                .collect();
        }
        (current, tails)
    }

    /// Turn forecasts of the differenced series back into levels
    pub(crate) fn integrate(&self, tails: &[Vec<f64>], forecasts: &[f64]) -> Vec<f64> {
        let mut current = forecasts.to_vec();
        for (lag, tail) in self.lags.iter().zip(tails.iter()).rev() {
            let mut extended = tail.clone();
            for v in &current {
                let base = extended[extended.len() - lag];
                extended.push(v + base);
            }
            current = extended[tail.len()..].to_vec();
        }
        current
    }
}

/// Lags `1..=order` together with `period, 2·period, ..., seasonal·period`
pub(crate) fn lag_set(order: usize, seasonal_order: usize, period: usize) -> Vec<usize> {
    let mut lags: Vec<usize> = (1..=order).collect();
    if period >= 2 {
        lags.extend((1..=seasonal_order).map(|j| j * period));
    }
    lags.sort_unstable();
    lags.dedup();
    lags
}

/// ARMA equation with additive seasonal lags, fitted on a differenced series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SeasonalArma {
    intercept: f64,
    ar: Vec<(usize, f64)>,
    ma: Vec<(usize, f64)>,
    sigma2: f64,
    /// Trailing differenced values, as many as the largest AR lag
    history: Vec<f64>,
    /// Trailing residuals, as many as the largest MA lag
    residuals: Vec<f64>,
}

impl SeasonalArma {
    pub(crate) fn estimate(
        w: &[f64],
        ar_lags: &[usize],
        ma_lags: &[usize],
        with_intercept: bool,
    ) -> Result<Self> {
        let n = w.len();
        let max_ar = ar_lags.iter().copied().max().unwrap_or(0);
        let max_ma = ma_lags.iter().copied().max().unwrap_or(0);
        let n_params = ar_lags.len() + ma_lags.len() + usize::from(with_intercept);

        let (innovations, start) = if ma_lags.is_empty() {
            (vec![0.0; n], max_ar)
        } else {
            let long = (2 * max_ar.max(max_ma)).max(10).min(n / 3);
            if long == 0 {
                return Err(ForecastError::ValidationError(format!(
                    "{} differenced observations are too few for a moving-average term",
                    n
                )));
            }
            (long_ar_residuals(w, long)?, max_ar.max(long + max_ma))
        };

        let rows = n.saturating_sub(start);
        if rows <= n_params + 1 {
            return Err(ForecastError::ValidationError(format!(
                "{} differenced observations leave {} usable rows for {} coefficients",
                n, rows, n_params
            )));
        }

        let mut coefs = Vec::new();
        if n_params > 0 {
            let mut x = Array2::<f64>::zeros((rows, n_params));
            let mut y = Array1::<f64>::zeros(rows);
            for (r, t) in (start..n).enumerate() {
                let mut c = 0;
                if with_intercept {
                    x[[r, c]] = 1.0;
                    c += 1;
                }
                for &lag in ar_lags {
                    x[[r, c]] = w[t - lag];
                    c += 1;
                }
                for &lag in ma_lags {
                    x[[r, c]] = innovations[t - lag];
                    c += 1;
                }
                y[r] = w[t];
            }
            coefs = least_squares_vec(&x, &y)?.to_vec();
        }

        let mut it = coefs.into_iter();
        let intercept = if with_intercept { it.next().unwrap_or(0.0) } else { 0.0 };
        let ar: Vec<(usize, f64)> = ar_lags.iter().map(|&l| (l, it.next().unwrap_or(0.0))).collect();
        let ma: Vec<(usize, f64)> = ma_lags.iter().map(|&l| (l, it.next().unwrap_or(0.0))).collect();

        // conditional sum-of-squares residuals under the final coefficients
        let mut resid = vec![0.0; n];
        for t in max_ar..n {
            let mut fitted = intercept;
            for &(lag, phi) in &ar {
                fitted += phi * w[t - lag];
            }
            for &(lag, theta) in &ma {
                if lag <= t {
                    fitted += theta * resid[t - lag];
                }
            }
            resid[t] = w[t] - fitted;
        }
        if resid.iter().any(|r| !r.is_finite()) {
            return Err(ForecastError::MathError(
                "residual recursion diverged; the moving-average part is explosive".to_string(),
            ));
        }

        let tail = &resid[max_ar..];
        let sigma2 = tail.iter().map(|r| r * r).sum::<f64>() / tail.len().max(1) as f64;

        Ok(Self {
            intercept,
            ar,
            ma,
            sigma2,
            history: w[n - max_ar..].to_vec(),
            residuals: resid[n - max_ma..].to_vec(),
        })
    }

    /// Multi-step mean forecast of the differenced series
    pub(crate) fn forecast(&self, horizon: usize) -> Vec<f64> {
        let mut w = self.history.clone();
        let mut e = self.residuals.clone();
        let mut out = Vec::with_capacity(horizon);
        for _ in 0..horizon {
            let mut v = self.intercept;
            for &(lag, phi) in &self.ar {
                v += phi * w[w.len() - lag];
            }
            for &(lag, theta) in &self.ma {
                v += theta * e[e.len() - lag];
            }
            w.push(v);
            // future innovations have zero mean
            e.push(0.0);
            out.push(v);
        }
        out
    }

    pub(crate) fn sigma2(&self) -> f64 {
        self.sigma2
    }

    pub(crate) fn ar_coefficients(&self) -> &[(usize, f64)] {
        &self.ar
    }
}

/// Residuals of an AR(`order`) fit with intercept; the first `order` are zero
fn long_ar_residuals(w: &[f64], order: usize) -> Result<Vec<f64>> {
    let n = w.len();
    let rows = n - order;
    let mut x = Array2::<f64>::zeros((rows, order + 1));
    let mut y = Array1::<f64>::zeros(rows);
    for (r, t) in (order..n).enumerate() {
        x[[r, 0]] = 1.0;
        for lag in 1..=order {
            x[[r, lag]] = w[t - lag];
        }
        y[r] = w[t];
    }
    let beta = least_squares_vec(&x, &y)?;

    let mut resid = vec![0.0; n];
    for t in order..n {
        let mut fitted = beta[0];
        for lag in 1..=order {
            fitted += beta[lag] * w[t - lag];
        }
        resid[t] = w[t] - fitted;
    }
    Ok(resid)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SarimaFit {
    column: String,
    differencing: Differencing,
    tails: Vec<Vec<f64>>,
    arma: SeasonalArma,
}

/// Seasonal ARIMA model of one column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarimaModel {
    config: SarimaConfig,
    fitted: Option<SarimaFit>,
}

impl SarimaModel {
    pub fn new(config: SarimaConfig) -> Self {
        Self {
            config,
            fitted: None,
        }
    }

    fn label(&self) -> String {
        format!("SARIMA{}", order_label(&self.config.order, &self.config.seasonal))
    }

    /// Column the model forecasts, once known
    pub fn column(&self) -> Option<&str> {
        self.fitted
            .as_ref()
            .map(|f| f.column.as_str())
            .or(self.config.column.as_deref())
    }

    /// Innovation variance of the fitted equation
    pub fn sigma2(&self) -> Option<f64> {
        self.fitted.as_ref().map(|f| f.arma.sigma2())
    }

    /// Fitted `(lag, coefficient)` pairs of the autoregressive part
    pub fn ar_coefficients(&self) -> Option<&[(usize, f64)]> {
        self.fitted.as_ref().map(|f| f.arma.ar_coefficients())
    }
}

impl ForecastModel for SarimaModel {
    fn kind(&self) -> ModelKind {
        ModelKind::SeasonalAr
    }

    fn fit(&mut self, data: &ObservationTable) -> Result<()> {
        self.fitted = None;
        let label = self.label();
        validate_orders(&self.config.order, &self.config.seasonal)?;

        let column = match &self.config.column {
            Some(c) => c.clone(),
            None => data
                .columns()
                .first()
                .cloned()
                .ok_or_else(|| ForecastError::fit(&label, "table has no columns"))?,
        };
        let series = data
            .require_column(&column)
            .map_err(|e| ForecastError::fit(&label, e))?;
        check_series(&label, &column, series)?;

        let differencing = Differencing::new(&self.config.order, &self.config.seasonal);
        if series.len() <= differencing.span() + 1 {
            return Err(ForecastError::fit(
                &label,
                format!(
                    "{} observations cannot absorb a differencing span of {}",
                    series.len(),
                    differencing.span()
                ),
            ));
        }

        let (w, tails) = differencing.apply(series);
        let ar_lags = lag_set(self.config.order.p, self.config.seasonal.p, self.config.seasonal.period);
        let ma_lags = lag_set(self.config.order.q, self.config.seasonal.q, self.config.seasonal.period);
        let arma = SeasonalArma::estimate(&w, &ar_lags, &ma_lags, self.config.intercept)
            .map_err(|e| ForecastError::fit(&label, e))?;

        debug!(
            "{} on '{}': {} observations, sigma2 = {:.5}",
            label,
            column,
            series.len(),
            arma.sigma2()
        );

        self.fitted = Some(SarimaFit {
            column,
            differencing,
            tails,
            arma,
        });
        Ok(())
    }

    /// Forecasts continue from the fitted sample; `data` only has to carry
    /// the target column.
    fn predict(&self, data: &ObservationTable, horizon: usize) -> Result<ModelForecast> {
        let label = self.label();
        check_horizon(&label, horizon)?;
        let fit = self
            .fitted
            .as_ref()
            .ok_or_else(|| ForecastError::predict(&label, "model has not been fitted"))?;
        if data.column(&fit.column).is_none() {
            return Err(ForecastError::predict(
                &label,
                format!("column '{}' missing from input data", fit.column),
            ));
        }

        let differenced = fit.arma.forecast(horizon);
        let values = fit.differencing.integrate(&fit.tails, &differenced);
        Ok(ModelForecast::Single {
            column: fit.column.clone(),
            values,
        })
    }

    fn params(&self) -> ModelParams {
        ModelParams::SeasonalAr(self.config.clone())
    }

    fn set_params(&mut self, params: ModelParams) -> Result<()> {
        match params {
            ModelParams::SeasonalAr(config) => {
                self.config = config;
                self.fitted = None;
                Ok(())
            }
            other => Err(ForecastError::InvalidParameter(format!(
                "expected sarima parameters, got {}",
                other.kind()
            ))),
        }
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }
}
