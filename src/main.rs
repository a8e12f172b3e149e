use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use log::{info, warn};
use orchard_forecast::export::{write_json, ForecastWorkbook};
use orchard_forecast::progress::read_snapshot;
use orchard_forecast::{
    load_config, run_forecast, run_training, store_upload, DataLoader, ForecastAnchor,
    ForecastRequest, ModelFamily, ModelStore, PipelineConfig, ProgressRegistry, FORECAST_STEPS,
    TRAINING_STEPS,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "almond-irrigation")]
#[command(about = "Forecast orchard weather and plan daily irrigation", long_about = None)]
struct Args {
    /// JSON pipeline configuration
    #[arg(long, env = "ALMOND_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of uploaded observation files
    #[arg(long)]
    uploads_dir: Option<PathBuf>,

    /// Directory of fitted model files
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Directory of progress snapshots
    #[arg(long)]
    runs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a CSV file and store it with the uploads
    Upload {
        file: PathBuf,
        /// Name to store the file under
        #[arg(long)]
        name: Option<String>,
    },
    /// Train the model bank on an observation file
    Train {
        /// Observation file; the latest upload when omitted
        #[arg(long)]
        dataset: Option<PathBuf>,
        /// Trailing days held out for evaluation
        #[arg(long)]
        test_size: Option<usize>,
        /// Families to train, e.g. `sarima,var,lstm`
        #[arg(long, value_delimiter = ',')]
        families: Vec<ModelFamily>,
        /// Maximum VAR lag order
        #[arg(long)]
        max_lags: Option<usize>,
        #[arg(long)]
        run_id: Option<String>,
        /// Write the training report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Forecast the weather and compute the irrigation table
    Forecast {
        /// Days to forecast
        #[arg(long)]
        horizon: Option<usize>,
        /// Observation file; the latest upload when omitted
        #[arg(long)]
        dataset: Option<PathBuf>,
        /// Start the forecast after the last observed day instead of today
        #[arg(long)]
        from_last_observation: bool,
        /// Reference date (YYYY-MM-DD) used in place of today
        #[arg(long)]
        today: Option<NaiveDate>,
        /// Directory for the CSV sheets
        #[arg(long)]
        out: Option<PathBuf>,
        /// Write the full outcome as JSON
        #[arg(long)]
        json: Option<PathBuf>,
        #[arg(long)]
        run_id: Option<String>,
    },
    /// List the stored models
    Models,
    /// Show the progress of a run
    Progress { run_id: String },
}

fn run_id(prefix: &str, explicit: Option<String>) -> String {
    explicit.unwrap_or_else(|| format!("{}-{}", prefix, Local::now().format("%Y%m%d%H%M%S")))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = args.uploads_dir {
        config.directories.uploads_dir = dir;
    }
    if let Some(dir) = args.models_dir {
        config.directories.models_dir = dir;
    }
    if let Some(dir) = args.runs_dir {
        config.directories.runs_dir = dir;
    }

    let registry = ProgressRegistry::global();

    match args.command {
        Command::Upload { file, name } => {
            let stored = store_upload(&config, &file, name.as_deref())
                .with_context(|| format!("uploading {}", file.display()))?;
            println!("Stored {}", stored.display());
        }
        Command::Train {
            dataset,
            test_size,
            families,
            max_lags,
            run_id: id,
            report,
        } => {
            if let Some(test_size) = test_size {
                config.training.test_size = test_size;
            }
            if !families.is_empty() {
                config.training.families = families;
            }
            if let Some(max_lags) = max_lags {
                config.var.max_lags = max_lags;
            }
            let dataset = match dataset {
                Some(path) => path,
                None => DataLoader::latest_upload(&config.directories.uploads_dir)?,
            };

            let id = run_id("train", id);
            let ctx = registry.start_mirrored_run(&id, TRAINING_STEPS, &config.directories.runs_dir);
            let result = run_training(&config, &dataset, &ctx)
                .with_context(|| format!("training run {}", id))?;

            for (name, path) in &result.saved {
                println!("{:<28} {}", name, path.display());
            }
            for score in &result.scores {
                println!("{:<28} {:<16} {}", score.model, score.column, score.accuracy);
            }
            for failure in &result.failures {
                warn!("{} failed: {}", failure.model, failure.reason);
            }
            if let Some(path) = report {
                write_json(&result, &path)?;
            }
        }
        Command::Forecast {
            horizon,
            dataset,
            from_last_observation,
            today,
            out,
            json,
            run_id: id,
        } => {
            if from_last_observation {
                config.forecast.anchor = ForecastAnchor::LastObservation;
            }
            let request = ForecastRequest {
                horizon,
                dataset,
                today,
            };

            let id = run_id("forecast", id);
            let ctx = registry.start_mirrored_run(&id, FORECAST_STEPS, &config.directories.runs_dir);
            let outcome = run_forecast(&config, &request, &ctx)
                .with_context(|| format!("forecast run {}", id))?;

            println!(
                "{:<12} {:>6} {:>8} {:>8} {:>8} {:>8}",
                "date", "kc", "et0", "etc", "pe", "gross"
            );
            for r in outcome.irrigation.records() {
                println!(
                    "{:<12} {:>6.3} {:>8.3} {:>8.3} {:>8.3} {:>8.3}",
                    r.date,
                    r.kc,
                    r.et0,
                    r.budget.etc,
                    r.budget.effective_precipitation,
                    r.budget.gross_need
                );
            }
            let s = &outcome.summary;
            println!(
                "Total gross need {:.2} mm over {} days (mean {:.2}, max {:.2}, min {:.2}); RDC total {:.2} mm",
                s.total_gross_need,
                s.horizon,
                s.mean_gross_need,
                s.max_gross_need,
                s.min_gross_need,
                s.total_gross_need_rdc
            );

            if let Some(dir) = out {
                let files = ForecastWorkbook::new(&outcome.forecast, &outcome.irrigation)
                    .write_to(&dir)?;
                info!("Wrote {} sheets to {}", files.len(), dir.display());
            }
            if let Some(path) = json {
                write_json(&outcome, &path)?;
            }
        }
        Command::Models => {
            let store = ModelStore::new(&config.directories.models_dir);
            for (name, loaded) in store.load_all()? {
                match loaded {
                    Ok(pipeline) => println!(
                        "{:<28} {:<8} [{}]",
                        name,
                        pipeline.kind(),
                        pipeline.columns().join(", ")
                    ),
                    Err(e) => println!("{:<28} unreadable: {}", name, e),
                }
            }
        }
        Command::Progress { run_id } => {
            let snapshot = read_snapshot(&config.directories.runs_dir, &run_id)
                .with_context(|| format!("no progress recorded for run {}", run_id))?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    Ok(())
}
