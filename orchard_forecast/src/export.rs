//! Export of forecast results as CSV sheets and JSON

use crate::error::Result;
use crate::forecast::ForecastTable;
use crate::irrigation::{IrrigationSummary, IrrigationTable};
use log::info;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const FORECAST_SHEET: &str = "forecast_variables.csv";
pub const IRRIGATION_SHEET: &str = "irrigation_calculation.csv";
pub const SUMMARY_SHEET: &str = "summary.csv";

const IRRIGATION_HEADER: [&str; 19] = [
    "date",
    "day_of_year",
    "temperature",
    "humidity",
    "humidity_min",
    "wind_speed",
    "pressure",
    "radiation",
    "precipitation",
    "kc",
    "et0",
    "etc",
    "effective_precipitation",
    "net_need",
    "gross_need",
    "etc_rdc",
    "net_need_rdc",
    "gross_need_rdc",
    "resolved_columns",
];

/// The three sheets of a forecast download
#[derive(Debug)]
pub struct ForecastWorkbook<'a> {
    forecast: &'a ForecastTable,
    irrigation: &'a IrrigationTable,
}

impl<'a> ForecastWorkbook<'a> {
    pub fn new(forecast: &'a ForecastTable, irrigation: &'a IrrigationTable) -> Self {
        Self {
            forecast,
            irrigation,
        }
    }

    /// Write every sheet into `dir`, returning the file paths
    pub fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let paths = vec![
            dir.join(FORECAST_SHEET),
            dir.join(IRRIGATION_SHEET),
            dir.join(SUMMARY_SHEET),
        ];

        self.write_forecast(File::create(&paths[0])?)?;
        self.write_irrigation(File::create(&paths[1])?)?;
        write_summary(&self.irrigation.summary(), File::create(&paths[2])?)?;

        info!("Exported forecast workbook to {}", dir.display());
        Ok(paths)
    }

    pub fn write_forecast<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(out);
        let mut header = vec!["date".to_string()];
        header.extend(self.forecast.columns().iter().cloned());
        writer.write_record(&header)?;

        for (i, date) in self.forecast.dates().iter().enumerate() {
            let mut record = vec![date.format("%Y-%m-%d").to_string()];
            for column in self.forecast.columns() {
                let value = self.forecast.column(column).map(|v| v[i]).unwrap_or(f64::NAN);
                record.push(value.to_string());
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_irrigation<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(IRRIGATION_HEADER)?;

        let inputs = self.irrigation.inputs();
        let resolved = format!(
            "T={} RH={} u2={} P={} Rs={} Pr={}",
            inputs.temperature,
            inputs.humidity,
            inputs.wind_speed,
            inputs.pressure,
            inputs.radiation,
            inputs.precipitation
        );
        for r in self.irrigation.records() {
            let b = &r.budget;
            writer.write_record([
                r.date.format("%Y-%m-%d").to_string(),
                r.day_of_year.to_string(),
                r.temperature.to_string(),
                r.humidity.to_string(),
                r.humidity_min.map(|h| h.to_string()).unwrap_or_default(),
                r.wind_speed.to_string(),
                r.pressure.to_string(),
                r.radiation.to_string(),
                r.precipitation.to_string(),
                r.kc.to_string(),
                r.et0.to_string(),
                b.etc.to_string(),
                b.effective_precipitation.to_string(),
                b.net_need.to_string(),
                b.gross_need.to_string(),
                b.etc_rdc.to_string(),
                b.net_need_rdc.to_string(),
                b.gross_need_rdc.to_string(),
                resolved.clone(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// `metric,value` rows of the irrigation summary
pub fn write_summary<W: Write>(summary: &IrrigationSummary, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["metric", "value"])?;
    let rows = [
        ("horizon_days", summary.horizon as f64),
        ("total_gross_need_mm", summary.total_gross_need),
        ("mean_gross_need_mm", summary.mean_gross_need),
        ("max_gross_need_mm", summary.max_gross_need),
        ("min_gross_need_mm", summary.min_gross_need),
        ("total_net_need_mm", summary.total_net_need),
        ("total_gross_need_rdc_mm", summary.total_gross_need_rdc),
        ("total_net_need_rdc_mm", summary.total_net_need_rdc),
        ("total_et0_mm", summary.total_et0),
        ("total_etc_mm", summary.total_etc),
    ];
    for (metric, value) in rows {
        writer.write_record([metric.to_string(), value.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Pretty-printed JSON file
pub fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}
