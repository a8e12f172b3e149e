//! Training orchestrator: one scaled pipeline per family and target

use crate::data::{temporal_train_test_split, ObservationTable};
use crate::error::{ForecastError, ModelFailure, Result};
use crate::metrics::{forecast_accuracy, ForecastAccuracy};
use crate::models::{
    FittedModel, LstmConfig, LstmModel, ModelKind, SarimaConfig, SarimaModel, SarimaxConfig,
    SarimaxModel, VarConfig, VarModel, DEFAULT_EXOG_COUNT,
};
use crate::pipeline::ScaledPipeline;
use crate::preprocessing::ScalingStrategy;
use crate::progress::ProgressContext;
use crate::schema::ColumnSchema;
use crate::store::ModelStore;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Progress steps of a training run
pub const TRAINING_STEPS: usize = 5;

/// Model families that can be selected for training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Sarima,
    Sarimax,
    Var,
    Lstm,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 4] = [
        ModelFamily::Sarima,
        ModelFamily::Sarimax,
        ModelFamily::Var,
        ModelFamily::Lstm,
    ];

    pub fn kind(&self) -> ModelKind {
        match self {
            ModelFamily::Sarima => ModelKind::SeasonalAr,
            ModelFamily::Sarimax => ModelKind::SeasonalArx,
            ModelFamily::Var => ModelKind::VectorAr,
            ModelFamily::Lstm => ModelKind::RecurrentSeq,
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().prefix())
    }
}

impl FromStr for ModelFamily {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sarima" => Ok(ModelFamily::Sarima),
            "sarimax" => Ok(ModelFamily::Sarimax),
            "var" => Ok(ModelFamily::Var),
            "lstm" => Ok(ModelFamily::Lstm),
            other => Err(ForecastError::InvalidParameter(format!(
                "unknown model family '{}'",
                other
            ))),
        }
    }
}

/// What to train and with which hyper-parameters
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRequest {
    pub test_size: usize,
    pub families: Vec<ModelFamily>,
    pub schema: ColumnSchema,
    pub sarima: SarimaConfig,
    pub sarimax: SarimaxConfig,
    pub var: VarConfig,
    pub lstm: LstmConfig,
}

impl Default for TrainingRequest {
    fn default() -> Self {
        Self {
            test_size: 180,
            families: vec![ModelFamily::Sarima, ModelFamily::Var],
            schema: ColumnSchema::default(),
            sarima: SarimaConfig::default(),
            sarimax: SarimaxConfig::default(),
            var: VarConfig::default(),
            lstm: LstmConfig::default(),
        }
    }
}

/// Holdout score of one forecast column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldoutScore {
    pub model: String,
    pub column: String,
    pub accuracy: ForecastAccuracy,
}

/// Outcome of a training batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub train_rows: usize,
    pub test_rows: usize,
    /// `(name, file)` of every persisted pipeline
    pub saved: Vec<(String, PathBuf)>,
    pub scores: Vec<HoldoutScore>,
    pub failures: Vec<ModelFailure>,
    /// Every model file present in the store after training
    pub stored_models: Vec<String>,
}

impl TrainingReport {
    pub fn trained(&self) -> impl Iterator<Item = &str> {
        self.saved.iter().map(|(name, _)| name.as_str())
    }
}

/// Unfitted pipeline recipe
#[derive(Debug)]
struct Candidate {
    name: String,
    model: FittedModel,
    strategy: ScalingStrategy,
    /// Columns the pipeline is fitted on
    columns: Vec<String>,
}

/// Builds, fits, evaluates and persists the model bank
#[derive(Debug)]
pub struct Trainer<'a> {
    store: &'a ModelStore,
}

impl<'a> Trainer<'a> {
    pub fn new(store: &'a ModelStore) -> Self {
        Self { store }
    }

    /// Train every selected family on `data` and persist the results.
    ///
    /// Per-model failures are collected in the report; only invalid
    /// requests abort the batch.
    pub fn train(
        &self,
        request: &TrainingRequest,
        data: &ObservationTable,
        ctx: &ProgressContext,
    ) -> Result<TrainingReport> {
        if request.families.is_empty() {
            return Err(ForecastError::InvalidParameter(
                "at least one model family must be selected".to_string(),
            ));
        }

        let (train, test) = temporal_train_test_split(data, request.test_size)?;
        ctx.update(
            2,
            format!(
                "Split data: {} training rows, {} test rows",
                train.len(),
                test.len()
            ),
        );
        if let (Some(first), Some(last)) = (test.first_date(), test.last_date()) {
            ctx.note(format!("Test window {} to {}", first, last));
        }

        ctx.update(3, "Creating pipelines...");
        let candidates = build_candidates(request, &train);
        for candidate in &candidates {
            ctx.note(format!("Prepared {}", candidate.name));
        }

        // two counted sub-steps per model: fit outcome, then save outcome
        let total_substeps = candidates.len() * 2;
        let total = Some(total_substeps);
        ctx.update(4, format!("Training {} models...", candidates.len()));

        let mut report = TrainingReport {
            train_rows: train.len(),
            test_rows: test.len(),
            ..TrainingReport::default()
        };

        for candidate in candidates {
            let name = candidate.name.clone();
            ctx.note(format!("Training {}", name));

            let fitted = train.select(&candidate.columns).and_then(|input| {
                ScaledPipeline::fit(
                    candidate.name,
                    candidate.model,
                    candidate.strategy,
                    &request.schema,
                    &input,
                )
            });
            let pipeline = match fitted {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    warn!("Training {} failed: {}", name, e);
                    ctx.substep(format!("Error training {}: {}", name, e), total);
                    ctx.substep(format!("{} not saved", name), total);
                    report.failures.push(ModelFailure::new(name, &e));
                    continue;
                }
            };
            ctx.substep(format!("{} trained", name), total);

            if !test.is_empty() {
                report.scores.extend(evaluate(&pipeline, &train, &test, ctx));
            }

            match self.store.save(&pipeline) {
                Ok(path) => {
                    ctx.substep(format!("Saved {} to {}", name, path.display()), total);
                    report.saved.push((name, path));
                }
                Err(e) => {
                    warn!("Saving {} failed: {}", name, e);
                    ctx.substep(format!("Error saving {}: {}", name, e), total);
                    report.failures.push(ModelFailure::new(name, &e));
                }
            }
        }

        report.stored_models = self.store.list()?;
        for stored in &report.stored_models {
            ctx.note(format!("Stored model: {}", stored));
        }
        ctx.update(
            4,
            format!(
                "Training finished: {} saved, {} failed",
                report.saved.len(),
                report.failures.len()
            ),
        );
        Ok(report)
    }
}

fn build_candidates(request: &TrainingRequest, train: &ObservationTable) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let columns = train.columns();

    let mut families: Vec<ModelFamily> = Vec::with_capacity(request.families.len());
    for family in &request.families {
        if families.contains(family) {
            warn!("Model family {} selected more than once, training it once", family);
        } else {
            families.push(*family);
        }
    }

    for family in families {
        match family {
            ModelFamily::Sarima => {
                for column in columns {
                    let config = SarimaConfig {
                        column: Some(column.clone()),
                        ..request.sarima.clone()
                    };
                    candidates.push(Candidate {
                        name: format!("sarima_{}", column),
                        model: FittedModel::SeasonalAr(SarimaModel::new(config)),
                        strategy: ScalingStrategy::ByVariable,
                        columns: vec![column.clone()],
                    });
                }
            }
            ModelFamily::Sarimax => {
                for column in columns {
                    let exog = sarimax_exog(&request.sarimax.exog, column, columns);
                    let mut used = vec![column.clone()];
                    used.extend(exog.iter().cloned());
                    let config = SarimaxConfig {
                        target: Some(column.clone()),
                        exog,
                        ..request.sarimax.clone()
                    };
                    candidates.push(Candidate {
                        name: format!("sarimax_{}", column),
                        model: FittedModel::SeasonalArx(SarimaxModel::new(config)),
                        strategy: ScalingStrategy::ByVariable,
                        columns: used,
                    });
                }
            }
            ModelFamily::Var => candidates.push(Candidate {
                name: "var_multivariate".to_string(),
                model: FittedModel::VectorAr(VarModel::new(request.var.clone())),
                strategy: ScalingStrategy::ByVariable,
                columns: columns.to_vec(),
            }),
            ModelFamily::Lstm => candidates.push(Candidate {
                name: "lstm_multivariate".to_string(),
                model: FittedModel::RecurrentSeq(LstmModel::new(request.lstm.clone())),
                strategy: ScalingStrategy::MinMax,
                columns: columns.to_vec(),
            }),
        }
    }

    candidates
}

/// Configured regressors present in the table, or the first few other columns
fn sarimax_exog(configured: &[String], target: &str, columns: &[String]) -> Vec<String> {
    let pool: Vec<&String> = if configured.is_empty() {
        columns.iter().collect()
    } else {
        configured.iter().filter(|c| columns.contains(c)).collect()
    };
    let exog = pool.into_iter().filter(|c| c.as_str() != target).cloned();
    if configured.is_empty() {
        exog.take(DEFAULT_EXOG_COUNT).collect()
    } else {
        exog.collect()
    }
}

/// Forecast the test window and score every column it can be compared on
fn evaluate(
    pipeline: &ScaledPipeline,
    train: &ObservationTable,
    test: &ObservationTable,
    ctx: &ProgressContext,
) -> Vec<HoldoutScore> {
    // exogenous drivers come from the test window itself
    let input = match pipeline.kind() {
        ModelKind::SeasonalArx => test,
        _ => train,
    };
    let forecast = match pipeline.predict(input, test.len()) {
        Ok(forecast) => forecast,
        Err(e) => {
            warn!("Holdout forecast for {} failed: {}", pipeline.name(), e);
            return Vec::new();
        }
    };

    let mut scores = Vec::new();
    for (column, values) in forecast.into_columns() {
        let Some(actual) = test.column(&column) else {
            continue;
        };
        match forecast_accuracy(&values, actual) {
            Ok(accuracy) => {
                ctx.note(format!("{} [{}]: {}", pipeline.name(), column, accuracy));
                scores.push(HoldoutScore {
                    model: pipeline.name().to_string(),
                    column,
                    accuracy,
                });
            }
            Err(e) => warn!("Scoring {} [{}] failed: {}", pipeline.name(), column, e),
        }
    }
    scores
}
