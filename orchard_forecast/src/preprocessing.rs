//! Column-aware scaling applied in front of every model

use crate::data::ObservationTable;
use crate::error::{ForecastError, Result};
use crate::schema::ColumnSchema;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, OrderStatistics, Statistics};

/// Fitted per-column scaler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scaler {
    /// Zero mean, unit (population) variance
    Standard { mean: f64, scale: f64 },
    /// Median-centred, divided by the inter-quartile range
    Robust { center: f64, scale: f64 },
    /// Mapped onto [0, 1]
    MinMax { min: f64, scale: f64 },
}

/// How a [`ColumnScaler`] chooses the scaler for each column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingStrategy {
    /// Robust for wind/pressure/precipitation-like columns, standard otherwise
    ByVariable,
    /// MinMax for every column
    MinMax,
}

impl Scaler {
    /// Fit a standard scaler; a constant column gets unit scale
    pub fn fit_standard(values: &[f64]) -> Result<Self> {
        check_fit_input(values)?;
        let mean = values.mean();
        let std = values.population_std_dev();
        Ok(Scaler::Standard {
            mean,
            scale: non_zero(std),
        })
    }

    /// Fit a robust scaler from the median and inter-quartile range
    pub fn fit_robust(values: &[f64]) -> Result<Self> {
        check_fit_input(values)?;
        let mut data = Data::new(values.to_vec());
        let center = data.median();
        let iqr = data.interquartile_range();
        Ok(Scaler::Robust {
            center,
            scale: non_zero(iqr),
        })
    }

    /// Fit a [0, 1] min-max scaler
    pub fn fit_min_max(values: &[f64]) -> Result<Self> {
        check_fit_input(values)?;
        let min = values.min();
        let max = values.max();
        Ok(Scaler::MinMax {
            min,
            scale: non_zero(max - min),
        })
    }

    fn offset_and_scale(&self) -> (f64, f64) {
        match *self {
            Scaler::Standard { mean, scale } => (mean, scale),
            Scaler::Robust { center, scale } => (center, scale),
            Scaler::MinMax { min, scale } => (min, scale),
        }
    }

    pub fn transform(&self, value: f64) -> f64 {
        let (offset, scale) = self.offset_and_scale();
        (value - offset) / scale
    }

    pub fn inverse(&self, value: f64) -> f64 {
        let (offset, scale) = self.offset_and_scale();
        value * scale + offset
    }
}

fn non_zero(spread: f64) -> f64 {
    if spread.is_finite() && spread.abs() > f64::EPSILON {
        spread
    } else {
        1.0
    }
}

fn check_fit_input(values: &[f64]) -> Result<()> {
    if values.is_empty() {
        return Err(ForecastError::ValidationError(
            "Cannot fit a scaler on an empty column".to_string(),
        ));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ForecastError::ValidationError(
            "Column contains non-numeric or missing values".to_string(),
        ));
    }
    Ok(())
}

/// Per-column scalers with the training-time column order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnScaler {
    columns: Vec<String>,
    scalers: Vec<Scaler>,
}

impl ColumnScaler {
    /// Fit one scaler per column of `table`
    pub fn fit(table: &ObservationTable, strategy: ScalingStrategy, schema: &ColumnSchema) -> Result<Self> {
        let mut scalers = Vec::with_capacity(table.columns().len());
        for name in table.columns() {
            let values = table.require_column(name)?;
            let scaler = match strategy {
                ScalingStrategy::MinMax => Scaler::fit_min_max(values),
                ScalingStrategy::ByVariable if schema.is_robust_column(name) => {
                    Scaler::fit_robust(values)
                }
                ScalingStrategy::ByVariable => Scaler::fit_standard(values),
            }
            .map_err(|e| ForecastError::ValidationError(format!("column '{}': {}", name, e)))?;
            scalers.push(scaler);
        }

        Ok(Self {
            columns: table.columns().to_vec(),
            scalers,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn scaler_for(&self, column: &str) -> Option<&Scaler> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.scalers[i])
    }

    /// Scale the training-time columns of `table`, in training order
    pub fn transform(&self, table: &ObservationTable) -> Result<ObservationTable> {
        let selected = table.select(&self.columns)?;
        selected.map_columns(|name, values| {
            let scaler = self.require(name)?;
            Ok(values.iter().map(|v| scaler.transform(*v)).collect())
        })
    }

    /// Map scaled values of `column` back to original units
    pub fn inverse_column(&self, column: &str, values: &[f64]) -> Result<Vec<f64>> {
        let scaler = self.require(column)?;
        Ok(values.iter().map(|v| scaler.inverse(*v)).collect())
    }

    fn require(&self, column: &str) -> Result<&Scaler> {
        self.scaler_for(column).ok_or_else(|| {
            ForecastError::ValidationError(format!("No scaler fitted for column '{}'", column))
        })
    }
}
