//! Multivariate LSTM forecaster with autoregressive rollout

use crate::data::ObservationTable;
use crate::error::{ForecastError, Result};
use crate::models::recurrent::{Adam, RecurrentNetwork, RollingWindow};
use crate::models::{check_horizon, check_series, ForecastModel, ModelForecast, ModelKind, ModelParams};
use crate::preprocessing::Scaler;
use log::{debug, info};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Hyper-parameters of an [`LstmModel`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LstmConfig {
    /// Steps of history fed to the network
    pub sequence_length: usize,
    /// Width of each stacked recurrent layer
    pub units: Vec<usize>,
    pub dropout: f64,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Seed for weight initialisation and dropout masks
    pub seed: u64,
}

impl Default for LstmConfig {
    fn default() -> Self {
        Self {
            sequence_length: 30,
            units: vec![32, 16],
            dropout: 0.2,
            learning_rate: 0.001,
            epochs: 20,
            batch_size: 16,
            seed: 42,
        }
    }
}

impl LstmConfig {
    fn validate(&self) -> Result<()> {
        if self.sequence_length == 0 {
            return Err(ForecastError::InvalidParameter(
                "sequence_length must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ForecastError::InvalidParameter(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ForecastError::InvalidParameter(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LstmFit {
    columns: Vec<String>,
    scalers: Vec<Scaler>,
    network: RecurrentNetwork,
    /// Scaled rows of the final training window, oldest first
    last_window: Vec<Vec<f64>>,
    loss_history: Vec<f64>,
}

/// Stacked LSTM trained to predict the next day of every column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmModel {
    config: LstmConfig,
    fitted: Option<LstmFit>,
}

impl LstmModel {
    pub fn new(config: LstmConfig) -> Self {
        Self {
            config,
            fitted: None,
        }
    }

    /// Mean training loss per epoch
    pub fn loss_history(&self) -> Option<&[f64]> {
        self.fitted.as_ref().map(|f| f.loss_history.as_slice())
    }
}

impl ForecastModel for LstmModel {
    fn kind(&self) -> ModelKind {
        ModelKind::RecurrentSeq
    }

    fn fit(&mut self, data: &ObservationTable) -> Result<()> {
        self.fitted = None;
        let label = "LSTM";
        self.config.validate()?;

        let columns = data.columns().to_vec();
        if columns.is_empty() {
            return Err(ForecastError::fit(label, "table has no columns"));
        }
        let seq = self.config.sequence_length;
        let n = data.len();
        if n <= seq {
            return Err(ForecastError::fit(
                label,
                format!("{} observations cannot form a window of {} steps", n, seq),
            ));
        }

        let mut scalers = Vec::with_capacity(columns.len());
        for name in &columns {
            let values = data.require_column(name)?;
            check_series(label, name, values)?;
            scalers.push(Scaler::fit_min_max(values)?);
        }
        let rows: Vec<Vec<f64>> = data
            .rows_of(&columns)?
            .into_iter()
            .map(|row| row.iter().zip(&scalers).map(|(v, s)| s.transform(*v)).collect())
            .collect();

        let k = columns.len();
        let to_matrix = |slice: &[Vec<f64>]| {
            Array2::from_shape_vec((slice.len(), k), slice.iter().flatten().copied().collect())
                .map_err(|e| ForecastError::fit(label, e))
        };
        let mut windows = Vec::with_capacity(n - seq);
        let mut targets = Vec::with_capacity(n - seq);
        for i in seq..n {
            windows.push(to_matrix(&rows[i - seq..i])?);
            targets.push(Array1::from(rows[i].clone()));
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut network =
            RecurrentNetwork::new(k, &self.config.units, k, self.config.dropout, &mut rng)?;
        let mut optimizer = Adam::new(self.config.learning_rate);
        let loss_history = network
            .train(
                &windows,
                &targets,
                self.config.epochs,
                self.config.batch_size,
                &mut optimizer,
                &mut rng,
            )
            .map_err(|e| ForecastError::fit(label, e))?;

        if let Some(loss) = loss_history.last() {
            info!(
                "LSTM trained on {} windows over {} epochs, final loss {:.6}",
                windows.len(),
                self.config.epochs,
                loss
            );
        }

        self.fitted = Some(LstmFit {
            columns,
            scalers,
            network,
            last_window: rows[n - seq..].to_vec(),
            loss_history,
        });
        Ok(())
    }

    /// Rolls out from the window captured at fit time; `data` must still
    /// carry the training columns.
    fn predict(&self, data: &ObservationTable, horizon: usize) -> Result<ModelForecast> {
        let label = "LSTM";
        check_horizon(label, horizon)?;
        let fit = self
            .fitted
            .as_ref()
            .ok_or_else(|| ForecastError::predict(label, "model has not been fitted"))?;
        if let Some(missing) = fit.columns.iter().find(|c| data.column(c).is_none()) {
            return Err(ForecastError::predict(
                label,
                format!("column '{}' missing from input data", missing),
            ));
        }

        let mut window = RollingWindow::new(fit.last_window.clone());
        let mut scaled = Vec::with_capacity(horizon);
        for _ in 0..horizon {
            let input = window.to_array().map_err(|e| ForecastError::predict(label, e))?;
            let next = fit.network.predict(&input).to_vec();
            window.push(next.clone());
            scaled.push(next);
        }
        debug!("LSTM rolled out {} steps", horizon);

        let values = fit
            .scalers
            .iter()
            .enumerate()
            .map(|(j, s)| scaled.iter().map(|row| s.inverse(row[j])).collect())
            .collect();
        Ok(ModelForecast::Multi {
            columns: fit.columns.clone(),
            values,
        })
    }

    fn params(&self) -> ModelParams {
        ModelParams::RecurrentSeq(self.config.clone())
    }

    fn set_params(&mut self, params: ModelParams) -> Result<()> {
        match params {
            ModelParams::RecurrentSeq(config) => {
                self.config = config;
                self.fitted = None;
                Ok(())
            }
            other => Err(ForecastError::InvalidParameter(format!(
                "expected lstm parameters, got {}",
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
    use chrono::NaiveDate;

    fn small_config() -> LstmConfig {
        LstmConfig {
            sequence_length: 5,
            units: vec![4],
            epochs: 2,
            batch_size: 8,
            ..LstmConfig::default()
        }
    }

    fn table(rows: usize) -> ObservationTable {
        let start = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        let a: Vec<f64> = (0..rows).map(|t| 10.0 + (t as f64 * 0.4).sin()).collect();
        let b: Vec<f64> = (0..rows).map(|t| 50.0 + t as f64 * 0.1).collect();
        ObservationTable::new(
            start.iter_days().take(rows).collect(),
            vec!["a".into(), "b".into()],
            vec![a, b],
        )
        .unwrap()
    }

    #[test]
    fn test_seeded_fit_is_reproducible() {
        let data = table(40);
        let mut first = LstmModel::new(small_config());
        let mut second = LstmModel::new(small_config());
        first.fit(&data).unwrap();
        second.fit(&data).unwrap();

        let a = first.predict(&data, 4).unwrap();
        let b = second.predict(&data, 4).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.horizon(), 4);
    }

    #[test]
    fn test_window_longer_than_data_fails() {
        let mut model = LstmModel::new(LstmConfig {
            sequence_length: 50,
            ..small_config()
        });
        let err = model.fit(&table(20)).unwrap_err();
        assert!(matches!(err, ForecastError::ModelFit { .. }));
    }

    #[test]
    fn test_set_params_clears_fit() {
        let mut model = LstmModel::new(small_config());
        model.fit(&table(30)).unwrap();
        assert!(model.is_fitted());
        model
            .set_params(ModelParams::RecurrentSeq(small_config()))
            .unwrap();
        assert!(!model.is_fitted());
    }
}
