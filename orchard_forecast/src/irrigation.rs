//! Irrigation table: the agronomic chain applied to every forecast day

use crate::config::IrrigationSettings;
use crate::data::date_series;
use crate::error::{ForecastError, Result};
use crate::forecast::ForecastTable;
use crate::progress::ProgressContext;
use crate::schema::{ColumnSchema, VariableRole};
use agro_math::evapotranspiration::penman_monteith_et0_with_albedo;
use agro_math::{DailyWaterBudget, Et0Inputs};
use chrono::{Datelike, NaiveDate};
use log::debug;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Column prefixes tried, in order, after the bare variable name
const SOURCE_PREFIXES: [&str; 3] = ["SARIMAX_", "VAR_", "LSTM_"];

/// Forecast columns feeding the irrigation calculation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedInputs {
    pub pressure: String,
    pub humidity: String,
    pub humidity_min: Option<String>,
    pub wind_speed: String,
    pub temperature: String,
    pub radiation: String,
    pub precipitation: String,
}

impl ResolvedInputs {
    /// Pick, for every role, the first forecast column that carries it:
    /// the univariate column, then `SARIMAX_`, `VAR_` and `LSTM_` variants.
    pub fn resolve(table: &ForecastTable, schema: &ColumnSchema) -> Result<Self> {
        let required = |role| resolve_role(table, schema, role);
        Ok(Self {
            pressure: required(VariableRole::Pressure)?,
            humidity: required(VariableRole::Humidity)?,
            humidity_min: resolve_role(table, schema, VariableRole::HumidityMin).ok(),
            wind_speed: required(VariableRole::WindSpeed)?,
            temperature: required(VariableRole::Temperature)?,
            radiation: required(VariableRole::Radiation)?,
            precipitation: required(VariableRole::Precipitation)?,
        })
    }
}

fn resolve_role(table: &ForecastTable, schema: &ColumnSchema, role: VariableRole) -> Result<String> {
    let base = schema.column_for(role).ok_or_else(|| ForecastError::MissingVariable {
        role: role.to_string(),
        candidates: Vec::new(),
    })?;

    let candidates: Vec<String> = std::iter::once(base.to_string())
        .chain(SOURCE_PREFIXES.iter().map(|p| format!("{}{}", p, base)))
        .collect();
    candidates
        .iter()
        .find(|c| table.column(c).is_some())
        .cloned()
        .ok_or_else(|| ForecastError::MissingVariable {
            role: role.to_string(),
            candidates,
        })
}

/// Water budget of one forecast day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationRecord {
    pub date: NaiveDate,
    pub day_of_year: u32,
    pub temperature: f64,
    pub humidity: f64,
    pub humidity_min: Option<f64>,
    pub wind_speed: f64,
    pub pressure: f64,
    pub radiation: f64,
    pub precipitation: f64,
    pub kc: f64,
    /// Reference evapotranspiration (mm/day)
    pub et0: f64,
    #[serde(flatten)]
    pub budget: DailyWaterBudget,
}

/// Totals and extremes of the gross irrigation need over the horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationSummary {
    pub horizon: usize,
    pub total_gross_need: f64,
    pub mean_gross_need: f64,
    pub max_gross_need: f64,
    pub min_gross_need: f64,
    pub total_net_need: f64,
    pub total_gross_need_rdc: f64,
    pub total_net_need_rdc: f64,
    pub total_et0: f64,
    pub total_etc: f64,
}

/// One irrigation record per forecast day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationTable {
    inputs: ResolvedInputs,
    records: Vec<IrrigationRecord>,
}

impl IrrigationTable {
    /// Apply ET0, Kc and the water balance to every row of `forecast`
    pub fn compute(
        forecast: &ForecastTable,
        schema: &ColumnSchema,
        settings: &IrrigationSettings,
    ) -> Result<Self> {
        if forecast.is_empty() {
            return Err(ForecastError::EmptyForecast);
        }
        let inputs = ResolvedInputs::resolve(forecast, schema)?;
        debug!("Irrigation inputs: {:?}", inputs);

        let column = |name: &str| {
            forecast.column(name).ok_or_else(|| ForecastError::MissingVariable {
                role: name.to_string(),
                candidates: vec![name.to_string()],
            })
        };
        let pressure = column(&inputs.pressure)?;
        let humidity = column(&inputs.humidity)?;
        let humidity_min = match &inputs.humidity_min {
            Some(name) => Some(column(name)?),
            None => None,
        };
        let wind = column(&inputs.wind_speed)?;
        let temperature = column(&inputs.temperature)?;
        let radiation = column(&inputs.radiation)?;
        let precipitation = column(&inputs.precipitation)?;

        let records = forecast
            .dates()
            .iter()
            .enumerate()
            .map(|(i, date)| {
                let et0_inputs = Et0Inputs::from_raw(
                    temperature[i],
                    humidity[i],
                    wind[i],
                    pressure[i],
                    radiation[i],
                    &settings.units,
                );
                let et0 = penman_monteith_et0_with_albedo(&et0_inputs, settings.albedo)?;
                let day_of_year = date.ordinal();
                let kc = settings.crop_coefficient.kc(day_of_year);
                let budget =
                    DailyWaterBudget::compute(et0, kc, precipitation[i], &settings.water_balance)?;

                Ok(IrrigationRecord {
                    date: *date,
                    day_of_year,
                    temperature: temperature[i],
                    humidity: humidity[i],
                    humidity_min: humidity_min.map(|h| h[i]),
                    wind_speed: wind[i],
                    pressure: pressure[i],
                    radiation: radiation[i],
                    precipitation: precipitation[i],
                    kc,
                    et0,
                    budget,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { inputs, records })
    }

    /// Same as [`IrrigationTable::compute`], reporting progress as step 5
    pub fn compute_with_progress(
        forecast: &ForecastTable,
        schema: &ColumnSchema,
        settings: &IrrigationSettings,
        ctx: &ProgressContext,
    ) -> Result<Self> {
        ctx.update(5, "Calculating irrigation needs...");
        ctx.note("ET0 = FAO-56 Penman-Monteith, ETc = Kc(day) x ET0");
        ctx.note(format!(
            "Pe = {} x P when P > {} mm, NB = max(0, ETc - Pe) / {}",
            settings.water_balance.effective_rain_fraction,
            settings.water_balance.effective_rain_threshold_mm,
            settings.water_balance.system_efficiency
        ));
        let table = Self::compute(forecast, schema, settings)?;
        let summary = table.summary();
        ctx.note(format!(
            "Total gross need {:.2} mm over {} days (mean {:.2} mm/day)",
            summary.total_gross_need, summary.horizon, summary.mean_gross_need
        ));
        Ok(table)
    }

    pub fn inputs(&self) -> &ResolvedInputs {
        &self.inputs
    }

    pub fn records(&self) -> &[IrrigationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn summary(&self) -> IrrigationSummary {
        let total = |f: fn(&IrrigationRecord) -> f64| self.records.iter().map(f).sum::<f64>();
        let gross: Vec<f64> = self.records.iter().map(|r| r.budget.gross_need).collect();
        let (mean, max, min) = if gross.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                gross.iter().mean(),
                gross.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                gross.iter().copied().fold(f64::INFINITY, f64::min),
            )
        };

        IrrigationSummary {
            horizon: self.records.len(),
            total_gross_need: gross.iter().sum(),
            mean_gross_need: mean,
            max_gross_need: max,
            min_gross_need: min,
            total_net_need: total(|r| r.budget.net_need),
            total_gross_need_rdc: total(|r| r.budget.gross_need_rdc),
            total_net_need_rdc: total(|r| r.budget.net_need_rdc),
            total_et0: total(|r| r.et0),
            total_etc: total(|r| r.budget.etc),
        }
    }

    /// Convert to a DataFrame, one row per day
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let dates: Vec<NaiveDate> = self.records.iter().map(|r| r.date).collect();
        let col = |name: &str, f: fn(&IrrigationRecord) -> f64| {
            Series::new(name, self.records.iter().map(f).collect::<Vec<f64>>())
        };

        let series = vec![
            date_series("date", &dates)?,
            Series::new(
                "day_of_year",
                self.records.iter().map(|r| r.day_of_year).collect::<Vec<u32>>(),
            ),
            col("kc", |r| r.kc),
            col("et0", |r| r.et0),
            col("etc", |r| r.budget.etc),
            col("effective_precipitation", |r| r.budget.effective_precipitation),
            col("net_need", |r| r.budget.net_need),
            col("gross_need", |r| r.budget.gross_need),
            col("etc_rdc", |r| r.budget.etc_rdc),
            col("net_need_rdc", |r| r.budget.net_need_rdc),
            col("gross_need_rdc", |r| r.budget.gross_need_rdc),
        ];
        Ok(DataFrame::new(series)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forecast(columns: Vec<(&str, Vec<f64>)>) -> ForecastTable {
        ForecastTable::new(
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            2,
            columns.into_iter().map(|(n, v)| (n.to_string(), v)).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_resolution_prefers_univariate_column() {
        let table = forecast(vec![
            ("VAR_temperature", vec![10.0]),
            ("temperature", vec![20.0]),
            ("SARIMAX_wind", vec![2.0]),
            ("LSTM_wind", vec![3.0]),
            ("LSTM_pressure", vec![1013.0]),
            ("humidity", vec![60.0]),
            ("radiation", vec![15e6]),
            ("VAR_precipitation", vec![0.0]),
        ]);
        let inputs = ResolvedInputs::resolve(&table, &ColumnSchema::default()).unwrap();
        assert_eq!(inputs.temperature, "temperature");
        assert_eq!(inputs.wind_speed, "SARIMAX_wind");
        assert_eq!(inputs.pressure, "LSTM_pressure");
        assert_eq!(inputs.precipitation, "VAR_precipitation");
        assert_eq!(inputs.humidity_min, None);
    }

    #[test]
    fn test_missing_role_lists_candidates() {
        let table = forecast(vec![("temperature", vec![20.0])]);
        match ResolvedInputs::resolve(&table, &ColumnSchema::default()).unwrap_err() {
            ForecastError::MissingVariable { role, candidates } => {
                assert_eq!(role, "pressure");
                assert_eq!(candidates.len(), 4);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
