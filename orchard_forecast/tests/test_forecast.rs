mod common;

use chrono::NaiveDate;
use orchard_forecast::models::{
    ArimaOrder, SarimaConfig, SarimaModel, SarimaxConfig, SarimaxModel, SeasonalOrder, VarConfig,
    VarModel,
};
use orchard_forecast::preprocessing::ScalingStrategy;
use orchard_forecast::progress::ProgressContext;
use orchard_forecast::{
    ColumnSchema, FittedModel, ForecastAggregator, ForecastAnchor, ForecastError,
    ObservationTable, ScaledPipeline,
};
use rstest::rstest;

fn seasonal(column: &str) -> SarimaConfig {
    SarimaConfig::for_column(column).with_orders(ArimaOrder { p: 1, d: 0, q: 0 }, SeasonalOrder::none())
}

fn bank(data: &ObservationTable) -> Vec<ScaledPipeline> {
    let schema = ColumnSchema::default();
    let fit = |name: &str, model: FittedModel, columns: &[&str]| {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let input = if columns.is_empty() {
            data.clone()
        } else {
            data.select(&columns).unwrap()
        };
        ScaledPipeline::fit(name, model, ScalingStrategy::ByVariable, &schema, &input).unwrap()
    };

    vec![
        fit(
            "sarima_temperature",
            FittedModel::SeasonalAr(SarimaModel::new(seasonal("temperature"))),
            &["temperature"],
        ),
        fit(
            "sarima_wind",
            FittedModel::SeasonalAr(SarimaModel::new(seasonal("wind"))),
            &["wind"],
        ),
        fit(
            "sarimax_temperature",
            FittedModel::SeasonalArx(SarimaxModel::new(
                SarimaxConfig::for_target("temperature")
                    .with_exog(vec!["radiation".to_string()])
                    .with_orders(ArimaOrder { p: 1, d: 0, q: 0 }, SeasonalOrder::none()),
            )),
            &["temperature", "radiation"],
        ),
        fit(
            "var_multivariate",
            FittedModel::VectorAr(VarModel::new(VarConfig {
                max_lags: 2,
                ..VarConfig::default()
            })),
            &[],
        ),
    ]
}

#[rstest]
#[case(1)]
#[case(14)]
#[case(60)]
fn test_every_column_matches_horizon(#[case] horizon: usize) {
    let data = common::weather_table(150, 31);
    let pipelines = bank(&data);
    let ctx = ProgressContext::detached("forecast-horizon");
    let reference = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();

    let table = ForecastAggregator::new(horizon)
        .unwrap()
        .aggregate(&pipelines, &data, reference, &ctx)
        .unwrap();

    assert_eq!(table.horizon(), horizon);
    assert_eq!(table.dates()[0], NaiveDate::from_ymd_opt(2025, 2, 2).unwrap());
    for column in table.columns() {
        assert_eq!(table.column(column).unwrap().len(), horizon, "{}", column);
    }
}

#[test]
fn test_column_naming_per_family() {
    let data = common::weather_table(150, 32);
    let ctx = ProgressContext::detached("forecast-names");
    let aggregator = ForecastAggregator::new(5).unwrap();
    let predictions = aggregator.predict(&bank(&data), &data, &ctx);

    assert!(predictions.failures.is_empty());
    let names: Vec<&str> = predictions.columns.iter().map(|(n, _)| n.as_str()).collect();
    assert!(names.contains(&"temperature"));
    assert!(names.contains(&"wind"));
    assert!(names.contains(&"SARIMAX_temperature"));
    assert!(names.contains(&"VAR_pressure"));
    assert!(names.contains(&"VAR_humidity"));
    assert_eq!(names.len(), 3 + common::COLUMNS.len());
}

#[test]
fn test_failures_are_isolated() {
    let data = common::weather_table(150, 33);
    let pipelines = bank(&data);
    let ctx = ProgressContext::detached("forecast-partial");

    // latest upload lost the wind column
    let keep: Vec<String> = data
        .columns()
        .iter()
        .filter(|c| c.as_str() != "wind")
        .cloned()
        .collect();
    let latest = data.select(&keep).unwrap();

    let aggregator = ForecastAggregator::new(7).unwrap();
    let predictions = aggregator.predict(&pipelines, &latest, &ctx);
    let failed: Vec<&str> = predictions.failures.iter().map(|f| f.model.as_str()).collect();
    assert_eq!(failed, vec!["var_multivariate"]);

    let table = aggregator
        .unify(predictions, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), &ctx)
        .unwrap();
    assert!(table.column("temperature").is_some());
    assert!(table.column("wind").is_none());
    assert!(table.column("VAR_temperature").is_none());
}

#[test]
fn test_no_usable_output_is_an_error() {
    let data = common::weather_table(150, 34);
    let pipelines = vec![bank(&data).remove(3)];
    let ctx = ProgressContext::detached("forecast-none");
    let latest = data.select(&["temperature".to_string()]).unwrap();

    let result = ForecastAggregator::new(3).unwrap().aggregate(
        &pipelines,
        &latest,
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        &ctx,
    );
    match result {
        Err(ForecastError::NoForecast(reason)) => assert!(reason.contains("var_multivariate")),
        other => panic!("expected NoForecast, got {:?}", other.map(|t| t.columns().to_vec())),
    }

    assert!(ForecastAggregator::new(0).is_err());
}

#[test]
fn test_anchor_reference_dates() {
    let data = common::weather_table(10, 35);
    let today = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();

    assert_eq!(ForecastAnchor::Today.reference_date(today, &data).unwrap(), today);
    assert_eq!(
        ForecastAnchor::LastObservation
            .reference_date(today, &data)
            .unwrap(),
        NaiveDate::from_ymd_opt(2023, 1, 10).unwrap()
    );
}

#[test]
fn test_table_exports_to_dataframe() {
    let data = common::weather_table(150, 36);
    let ctx = ProgressContext::detached("forecast-df");
    let table = ForecastAggregator::new(4)
        .unwrap()
        .aggregate(&bank(&data), &data, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), &ctx)
        .unwrap();

    let df = table.to_dataframe().unwrap();
    assert_eq!(df.height(), 4);
    assert_eq!(df.width(), table.columns().len() + 1);
}
