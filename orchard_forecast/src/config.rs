//! Pipeline configuration loaded from a JSON file

use crate::data::CsvOptions;
use crate::error::{ForecastError, Result};
use crate::forecast::ForecastAnchor;
use crate::models::{LstmConfig, SarimaConfig, SarimaxConfig, VarConfig};
use crate::schema::ColumnSchema;
use crate::training::ModelFamily;
use agro_math::evapotranspiration::REFERENCE_ALBEDO;
use agro_math::{CropCoefficientCurve, UnitConversion, WaterBalanceParams};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Where uploads, fitted models and run snapshots live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Directories {
    pub uploads_dir: PathBuf,
    pub models_dir: PathBuf,
    pub runs_dir: PathBuf,
}

impl Default for Directories {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("uploads"),
            models_dir: PathBuf::from("models"),
            runs_dir: PathBuf::from("runs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// Trailing days held out for evaluation; 0 disables the holdout
    pub test_size: usize,
    pub families: Vec<ModelFamily>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            test_size: 180,
            families: vec![ModelFamily::Sarima, ModelFamily::Var],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    pub max_horizon: usize,
    pub default_horizon: usize,
    pub anchor: ForecastAnchor,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            max_horizon: 365,
            default_horizon: 30,
            anchor: ForecastAnchor::Today,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrrigationSettings {
    pub water_balance: WaterBalanceParams,
    pub crop_coefficient: CropCoefficientCurve,
    pub units: UnitConversion,
    pub albedo: f64,
}

impl Default for IrrigationSettings {
    fn default() -> Self {
        Self {
            water_balance: WaterBalanceParams::default(),
            crop_coefficient: CropCoefficientCurve::default(),
            units: UnitConversion::default(),
            albedo: REFERENCE_ALBEDO,
        }
    }
}

/// Full configuration of the training and forecasting pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub directories: Directories,
    pub csv: CsvOptions,
    pub schema: ColumnSchema,
    /// Orders shared by every per-variable seasonal model
    pub sarima: SarimaConfig,
    pub sarimax: SarimaxConfig,
    pub var: VarConfig,
    pub lstm: LstmConfig,
    pub training: TrainingSettings,
    pub forecast: ForecastSettings,
    pub irrigation: IrrigationSettings,
}

impl PipelineConfig {
    /// Check the parts that cannot be validated by deserialisation alone
    pub fn validate(&self) -> Result<()> {
        if self.forecast.max_horizon == 0 {
            return Err(ForecastError::InvalidParameter(
                "forecast.max_horizon must be at least 1".to_string(),
            ));
        }
        if self.forecast.default_horizon == 0 {
            return Err(ForecastError::InvalidParameter(
                "forecast.default_horizon must be at least 1".to_string(),
            ));
        }
        self.irrigation.water_balance.validate()?;
        self.irrigation.crop_coefficient.validate()?;
        Ok(())
    }
}

/// Load and validate a configuration file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let path = path.as_ref();
    let config_err = |reason: String| ForecastError::Config {
        path: path.to_path_buf(),
        reason,
    };

    if !path.exists() {
        return Err(config_err("file not found".to_string()));
    }
    let file = File::open(path).map_err(|e| config_err(e.to_string()))?;
    let config: PipelineConfig =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| config_err(e.to_string()))?;

    config.validate().map_err(|e| config_err(e.to_string()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"training": {{"test_size": 30}}, "var": {{"max_lags": 5}}, "forecast": {{"anchor": "last_observation"}}}}"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.training.test_size, 30);
        assert_eq!(config.var.max_lags, 5);
        assert_eq!(config.forecast.anchor, ForecastAnchor::LastObservation);
        assert_eq!(config.forecast.max_horizon, 365);
        assert_eq!(config.schema, ColumnSchema::default());
    }

    #[test]
    fn test_errors_name_the_file() {
        let missing = Path::new("/nonexistent/pipeline.json");
        match load_config(missing).unwrap_err() {
            ForecastError::Config { path, .. } => assert_eq!(path, missing),
            other => panic!("unexpected error {:?}", other),
        }

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"forecast\": {{\"max_horizon\": 0}}}}").unwrap();
        assert!(matches!(
            load_config(file.path()),
            Err(ForecastError::Config { .. })
        ));
    }
}
