use agro_math::WaterBalanceParams;
use approx::assert_relative_eq;
use chrono::NaiveDate;
use orchard_forecast::config::IrrigationSettings;
use orchard_forecast::export::{ForecastWorkbook, FORECAST_SHEET, IRRIGATION_SHEET, SUMMARY_SHEET};
use orchard_forecast::{ColumnSchema, ForecastError, ForecastTable, IrrigationTable};
use std::fs;
use tempfile::tempdir;

/// Three days in mid January: the end of the initial Kc stage and the
/// first two days of development
fn reference_forecast() -> ForecastTable {
    ForecastTable::new(
        NaiveDate::from_ymd_opt(2025, 1, 14).unwrap(),
        3,
        vec![
            ("temperature".to_string(), vec![20.0]),
            ("humidity".to_string(), vec![60.0, 60.0, 60.0]),
            ("VAR_wind".to_string(), vec![2.0, 2.0, 2.0]),
            ("LSTM_pressure".to_string(), vec![1013.0, 1013.0, 1013.0]),
            ("radiation".to_string(), vec![15.0e6, 15.0e6, 15.0e6]),
            ("precipitation".to_string(), vec![0.0, 2.0, 10.0]),
        ],
    )
    .unwrap()
}

#[test]
fn test_reference_days() {
    let table = IrrigationTable::compute(
        &reference_forecast(),
        &ColumnSchema::default(),
        &IrrigationSettings::default(),
    )
    .unwrap();
    assert_eq!(table.len(), 3);

    let records = table.records();
    assert_eq!(
        records.iter().map(|r| r.day_of_year).collect::<Vec<_>>(),
        vec![15, 16, 17]
    );
    for r in records {
        assert_relative_eq!(r.et0, 4.145384, epsilon = 1e-4);
        assert_eq!(r.temperature, 20.0);
        assert_eq!(r.humidity_min, None);
    }

    assert_relative_eq!(records[0].kc, 0.4, epsilon = 1e-12);
    assert_relative_eq!(records[1].kc, 0.41, epsilon = 1e-12);
    assert_relative_eq!(records[2].kc, 0.42, epsilon = 1e-12);

    // dry day: the whole crop demand is irrigated
    let day = &records[0].budget;
    assert_relative_eq!(day.etc, 0.4 * records[0].et0, epsilon = 1e-12);
    assert_eq!(day.effective_precipitation, 0.0);
    assert_relative_eq!(day.net_need, day.etc, epsilon = 1e-12);
    assert_relative_eq!(day.gross_need, day.etc / 0.95, epsilon = 1e-12);
    assert_relative_eq!(day.etc_rdc, day.etc * 0.2, epsilon = 1e-12);

    // rain at or below the threshold is not effective
    assert_eq!(records[1].budget.effective_precipitation, 0.0);

    // heavy rain covers the demand
    let wet = &records[2].budget;
    assert_relative_eq!(wet.effective_precipitation, 7.5, epsilon = 1e-12);
    assert_eq!(wet.net_need, 0.0);
    assert_eq!(wet.gross_need, 0.0);
}

#[test]
fn test_summary() {
    let table = IrrigationTable::compute(
        &reference_forecast(),
        &ColumnSchema::default(),
        &IrrigationSettings::default(),
    )
    .unwrap();
    let summary = table.summary();
    let gross: Vec<f64> = table.records().iter().map(|r| r.budget.gross_need).collect();

    assert_eq!(summary.horizon, 3);
    assert_relative_eq!(summary.total_gross_need, gross.iter().sum::<f64>(), epsilon = 1e-12);
    assert_relative_eq!(summary.mean_gross_need, summary.total_gross_need / 3.0, epsilon = 1e-12);
    assert_eq!(summary.max_gross_need, gross[1]);
    assert_eq!(summary.min_gross_need, 0.0);
    assert!(summary.total_gross_need_rdc < summary.total_gross_need);
}

#[test]
fn test_needs_are_never_negative() {
    let forecast = ForecastTable::new(
        NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
        4,
        vec![
            ("temperature".to_string(), vec![-5.0, 2.0, 35.0, 12.0]),
            ("humidity".to_string(), vec![100.0, 95.0, 15.0, 70.0]),
            ("wind".to_string(), vec![0.0, 0.5, 6.0, 3.0]),
            ("pressure".to_string(), vec![1020.0, 1000.0, 990.0, 1013.0]),
            ("radiation".to_string(), vec![0.0, 1.0e6, 30.0e6, 10.0e6]),
            ("precipitation".to_string(), vec![40.0, 0.0, 0.0, 4.0]),
        ],
    )
    .unwrap();
    let settings = IrrigationSettings {
        water_balance: WaterBalanceParams {
            system_efficiency: 0.8,
            ..WaterBalanceParams::default()
        },
        ..IrrigationSettings::default()
    };
    let table = IrrigationTable::compute(&forecast, &ColumnSchema::default(), &settings).unwrap();

    for r in table.records() {
        assert!(r.budget.net_need >= 0.0);
        assert!(r.budget.gross_need >= 0.0);
        assert!(r.budget.gross_need_rdc >= 0.0);
        assert!(r.budget.gross_need >= r.budget.net_need);
    }
    // hot, dry and windy day needs the most water
    let top = table
        .records()
        .iter()
        .max_by(|a, b| a.budget.gross_need.total_cmp(&b.budget.gross_need))
        .unwrap();
    assert_eq!(top.temperature, 35.0);
}

#[test]
fn test_missing_role_is_reported() {
    let forecast = ForecastTable::new(
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        2,
        vec![("temperature".to_string(), vec![20.0, 21.0])],
    )
    .unwrap();
    let result = IrrigationTable::compute(
        &forecast,
        &ColumnSchema::default(),
        &IrrigationSettings::default(),
    );
    assert!(matches!(result, Err(ForecastError::MissingVariable { .. })));
}

#[test]
fn test_workbook_export() {
    let forecast = reference_forecast();
    let table = IrrigationTable::compute(
        &forecast,
        &ColumnSchema::default(),
        &IrrigationSettings::default(),
    )
    .unwrap();
    let dir = tempdir().unwrap();

    let files = ForecastWorkbook::new(&forecast, &table).write_to(dir.path()).unwrap();
    assert_eq!(
        files,
        vec![
            dir.path().join(FORECAST_SHEET),
            dir.path().join(IRRIGATION_SHEET),
            dir.path().join(SUMMARY_SHEET),
        ]
    );

    let sheet = fs::read_to_string(dir.path().join(FORECAST_SHEET)).unwrap();
    let lines: Vec<&str> = sheet.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("date,temperature,humidity"));
    assert!(lines[1].starts_with("2025-01-15,20,"));

    let sheet = fs::read_to_string(dir.path().join(IRRIGATION_SHEET)).unwrap();
    assert_eq!(sheet.lines().count(), 4);
    assert!(sheet.lines().nth(1).unwrap().contains("T=temperature"));

    let sheet = fs::read_to_string(dir.path().join(SUMMARY_SHEET)).unwrap();
    assert!(sheet.lines().any(|l| l.starts_with("horizon_days,3")));
}
