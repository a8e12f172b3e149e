//! Durable storage of fitted pipelines as versioned JSON files

use crate::error::{ForecastError, Result};
use crate::pipeline::ScaledPipeline;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Bumped whenever the persisted layout of a pipeline changes
pub const FORMAT_VERSION: u32 = 1;

const FILE_SUFFIX: &str = "_model.json";

#[derive(Serialize)]
struct PersistedRef<'a> {
    format_version: u32,
    saved_at: DateTime<Utc>,
    pipeline: &'a ScaledPipeline,
}

#[derive(Deserialize)]
struct PersistedHeader {
    format_version: u32,
}

#[derive(Deserialize)]
struct Persisted {
    pipeline: ScaledPipeline,
}

/// Directory of `<name>_model.json` files
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that holds the pipeline called `name`
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(ForecastError::InvalidParameter(format!(
                "'{}' is not a valid model name",
                name
            )));
        }
        Ok(self.dir.join(format!("{}{}", name, FILE_SUFFIX)))
    }

    /// Write `pipeline`, replacing any previous file of the same name
    pub fn save(&self, pipeline: &ScaledPipeline) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(pipeline.name())?;
        let tmp = path.with_extension("json.tmp");

        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(
                &mut writer,
                &PersistedRef {
                    format_version: FORMAT_VERSION,
                    saved_at: Utc::now(),
                    pipeline,
                },
            )?;
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;

        debug!("Saved {} to {}", pipeline.name(), path.display());
        Ok(path)
    }

    /// Read the pipeline called `name`
    pub fn load(&self, name: &str) -> Result<ScaledPipeline> {
        let path = self.path_for(name)?;
        Self::load_path(&path)
    }

    /// Read a pipeline file, rejecting unknown format versions
    pub fn load_path(path: &Path) -> Result<ScaledPipeline> {
        let load_err = |reason: String| ForecastError::ModelLoad {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| load_err(e.to_string()))?;
        let value: serde_json::Value =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| load_err(e.to_string()))?;

        let header: PersistedHeader =
            serde_json::from_value(value.clone()).map_err(|e| load_err(e.to_string()))?;
        if header.format_version != FORMAT_VERSION {
            return Err(load_err(format!(
                "format version {} is not supported (expected {})",
                header.format_version, FORMAT_VERSION
            )));
        }

        let persisted: Persisted =
            serde_json::from_value(value).map_err(|e| load_err(e.to_string()))?;
        Ok(persisted.pipeline)
    }

    /// Names of the stored pipelines, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let file_name = entry?.file_name();
            if let Some(name) = file_name.to_str().and_then(|f| f.strip_suffix(FILE_SUFFIX)) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Load every stored pipeline; failures are returned per name
    pub fn load_all(&self) -> Result<Vec<(String, Result<ScaledPipeline>)>> {
        let names = self.list()?;
        info!("Found {} stored models in {}", names.len(), self.dir.display());
        Ok(names
            .into_iter()
            .map(|name| {
                let loaded = self.load(&name);
                (name, loaded)
            })
            .collect())
    }
}
