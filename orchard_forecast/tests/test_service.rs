mod common;

use chrono::NaiveDate;
use orchard_forecast::export::write_json;
use orchard_forecast::{
    load_config, run_forecast, run_training, store_upload, ForecastAnchor, ForecastError,
    ForecastRequest, ModelFamily, PipelineConfig, ProgressRegistry, FORECAST_STEPS,
    TRAINING_STEPS,
};
use std::path::Path;
use tempfile::{tempdir, TempDir};

fn workspace() -> (TempDir, PipelineConfig) {
    let dir = tempdir().unwrap();
    let mut config = PipelineConfig::default();
    config.directories.uploads_dir = dir.path().join("uploads");
    config.directories.models_dir = dir.path().join("models");
    config.directories.runs_dir = dir.path().join("runs");
    config.training.test_size = 30;
    config.training.families = vec![ModelFamily::Sarima, ModelFamily::Var];
    config.var.max_lags = 3;
    (dir, config)
}

fn station_file(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("station.csv");
    common::write_csv(&common::weather_table(400, 41), &path);
    path
}

#[test]
fn test_upload_train_and_forecast() {
    let (dir, config) = workspace();
    let registry = ProgressRegistry::new();

    let uploaded = store_upload(&config, &station_file(dir.path()), Some("orchard")).unwrap();
    assert_eq!(uploaded, config.directories.uploads_dir.join("orchard.csv"));

    let ctx = registry.start_run("train", TRAINING_STEPS);
    let report = run_training(&config, &uploaded, &ctx).unwrap();
    assert!(report.trained().any(|n| n == "var_multivariate"));

    let snapshot = registry.snapshot("train").unwrap();
    assert!(snapshot.is_complete);
    assert!(!snapshot.failed);
    assert_eq!(snapshot.current_step, TRAINING_STEPS);

    let today = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
    let request = ForecastRequest {
        horizon: Some(10),
        dataset: None,
        today: Some(today),
    };
    let ctx = registry.start_mirrored_run("forecast", FORECAST_STEPS, &config.directories.runs_dir);
    let outcome = run_forecast(&config, &request, &ctx).unwrap();

    assert_eq!(outcome.run_id, "forecast");
    assert_eq!(outcome.horizon, 10);
    assert_eq!(outcome.reference_date, today);
    assert_eq!(outcome.forecast.horizon(), 10);
    assert_eq!(outcome.forecast.dates()[0], NaiveDate::from_ymd_opt(2025, 4, 2).unwrap());
    assert_eq!(outcome.irrigation.len(), 10);
    assert_eq!(outcome.summary.horizon, 10);
    assert!(outcome.summary.total_gross_need >= 0.0);
    assert!(outcome
        .irrigation
        .records()
        .iter()
        .all(|r| r.et0.is_finite() && r.budget.gross_need >= 0.0));
    assert_eq!(outcome.models_used.len(), report.saved.len());

    let snapshot = orchard_forecast::progress::read_snapshot(&config.directories.runs_dir, "forecast")
        .unwrap();
    assert!(snapshot.is_complete);
    assert_eq!(snapshot.current_step, FORECAST_STEPS);

    let json = dir.path().join("out").join("forecast.json");
    write_json(&outcome, &json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(json).unwrap()).unwrap();
    assert_eq!(value["horizon"], 10);
}

#[test]
fn test_forecast_substep_counters_stay_within_total() {
    let (dir, config) = workspace();
    let dataset = station_file(dir.path());
    let report = run_training(
        &config,
        &dataset,
        &ProgressRegistry::new().start_run("train", TRAINING_STEPS),
    )
    .unwrap();

    let (ctx, recorder) = common::recording_run("forecast-substeps", FORECAST_STEPS);
    let request = ForecastRequest {
        horizon: Some(7),
        dataset: Some(dataset),
        today: None,
    };
    run_forecast(&config, &request, &ctx).unwrap();

    assert_eq!(recorder.overruns(), Vec::<common::Counters>::new());
    let models = report.saved.len();
    let seen = recorder.seen();
    for step in [1, 3] {
        assert!(
            seen.iter()
                .any(|(s, current, total, _)| *s == step && *current == models && *total == models),
            "step {} never reached {} of {}",
            step,
            models,
            models
        );
    }
}

#[test]
fn test_forecast_from_last_observation_with_clamped_horizon() {
    let (dir, mut config) = workspace();
    config.training.families = vec![ModelFamily::Var];
    config.forecast.anchor = ForecastAnchor::LastObservation;
    config.forecast.max_horizon = 20;
    let registry = ProgressRegistry::new();
    let dataset = station_file(dir.path());

    run_training(&config, &dataset, &registry.start_run("train", TRAINING_STEPS)).unwrap();

    let request = ForecastRequest {
        horizon: Some(45),
        dataset: Some(dataset),
        today: None,
    };
    let outcome = run_forecast(&config, &request, &registry.start_run("forecast", FORECAST_STEPS))
        .unwrap();

    let last_observed = common::start_date() + chrono::Days::new(399);
    assert_eq!(outcome.horizon, 20);
    assert_eq!(outcome.reference_date, last_observed);
    assert_eq!(outcome.forecast.dates()[0], last_observed + chrono::Days::new(1));
    assert_eq!(outcome.models_used, vec!["var_multivariate"]);
    assert!(outcome.irrigation.inputs().temperature.starts_with("VAR_"));
}

#[test]
fn test_forecast_without_models_marks_run_failed() {
    let (dir, config) = workspace();
    let registry = ProgressRegistry::new();
    let request = ForecastRequest {
        horizon: Some(5),
        dataset: Some(station_file(dir.path())),
        today: None,
    };

    let result = run_forecast(&config, &request, &registry.start_run("forecast", FORECAST_STEPS));
    assert!(matches!(result, Err(ForecastError::NoForecast(_))));

    let snapshot = registry.snapshot("forecast").unwrap();
    assert!(snapshot.is_complete);
    assert!(snapshot.failed);
    assert!(snapshot.current_message.starts_with("Error:"));
}

#[test]
fn test_zero_horizon_is_rejected() {
    let (_dir, config) = workspace();
    let request = ForecastRequest {
        horizon: Some(0),
        ..ForecastRequest::default()
    };
    let result = run_forecast(
        &config,
        &request,
        &ProgressRegistry::new().start_run("forecast", FORECAST_STEPS),
    );
    assert!(matches!(result, Err(ForecastError::InvalidParameter(_))));
}

#[test]
fn test_upload_validation() {
    let (dir, config) = workspace();

    let workbook = dir.path().join("station.xlsx");
    std::fs::write(&workbook, b"PK\x03\x04").unwrap();
    let err = store_upload(&config, &workbook, None).unwrap_err();
    assert!(matches!(err, ForecastError::UnsupportedFormat(_)));
    assert!(err.is_fatal());

    let source = station_file(dir.path());
    assert!(matches!(
        store_upload(&config, &source, Some("../escape")),
        Err(ForecastError::InvalidParameter(_))
    ));

    let empty = dir.path().join("empty.csv");
    std::fs::write(&empty, "").unwrap();
    assert!(matches!(
        store_upload(&config, &empty, None),
        Err(ForecastError::DataLoad(_))
    ));
    assert!(!config.directories.uploads_dir.join("empty.csv").exists());

    let stored = store_upload(&config, &source, None).unwrap();
    assert_eq!(stored, config.directories.uploads_dir.join("station.csv"));
}

#[test]
fn test_config_file_drives_the_run() {
    let (dir, _) = workspace();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "training": { "test_size": 10, "families": ["var", "lstm"] },
            "forecast": { "default_horizon": 7 },
            "var": { "max_lags": 2 },
            "lstm": { "epochs": 1, "units": [4], "sequence_length": 5 }
        }"#,
    )
    .unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.training.test_size, 10);
    assert_eq!(config.training.families, vec![ModelFamily::Var, ModelFamily::Lstm]);
    assert_eq!(config.forecast.default_horizon, 7);
    assert_eq!(config.forecast.max_horizon, 365);
    assert_eq!(config.lstm.units, vec![4]);
    assert_eq!(config.lstm.batch_size, 16);
}

#[test]
fn test_model_failures_are_not_fatal() {
    let fit = ForecastError::fit("sarima_wind", "diverged");
    assert!(!fit.is_fatal());
    assert!(!ForecastError::predict("var_multivariate", "short input").is_fatal());
    assert!(ForecastError::NoForecast("nothing".into()).is_fatal());
    assert!(ForecastError::EmptyForecast.is_fatal());
    assert_eq!(fit.to_string(), "Failed to fit sarima_wind: diverged");
}
