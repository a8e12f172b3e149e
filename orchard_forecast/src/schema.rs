//! Mapping of physical variable roles to dataset column names

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Physical meaning of a column in the observation table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableRole {
    Pressure,
    HumidityMin,
    Humidity,
    WindSpeed,
    Temperature,
    Radiation,
    Precipitation,
}

impl VariableRole {
    pub const ALL: [VariableRole; 7] = [
        VariableRole::Pressure,
        VariableRole::HumidityMin,
        VariableRole::Humidity,
        VariableRole::WindSpeed,
        VariableRole::Temperature,
        VariableRole::Radiation,
        VariableRole::Precipitation,
    ];

    /// Roles the irrigation calculation cannot do without
    pub const IRRIGATION_INPUTS: [VariableRole; 6] = [
        VariableRole::Pressure,
        VariableRole::Humidity,
        VariableRole::WindSpeed,
        VariableRole::Temperature,
        VariableRole::Radiation,
        VariableRole::Precipitation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VariableRole::Pressure => "pressure",
            VariableRole::HumidityMin => "humidity_min",
            VariableRole::Humidity => "humidity",
            VariableRole::WindSpeed => "wind_speed",
            VariableRole::Temperature => "temperature",
            VariableRole::Radiation => "radiation",
            VariableRole::Precipitation => "precipitation",
        }
    }

    /// Heavy-tailed variables that are scaled with median/IQR
    pub fn prefers_robust_scaling(&self) -> bool {
        matches!(
            self,
            VariableRole::Pressure | VariableRole::WindSpeed | VariableRole::Precipitation
        )
    }
}

impl fmt::Display for VariableRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keywords identifying outlier-prone columns that are not mapped to a role
const ROBUST_KEYWORDS: [&str; 7] = [
    "wind",
    "velocidad",
    "pressure",
    "presion",
    "presión",
    "precip",
    "rain",
];

/// Explicit role → column mapping, validated before use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnSchema {
    columns: BTreeMap<VariableRole, String>,
}

impl Default for ColumnSchema {
    fn default() -> Self {
        let columns = [
            (VariableRole::Pressure, "pressure"),
            (VariableRole::HumidityMin, "humidity_min"),
            (VariableRole::Humidity, "humidity"),
            (VariableRole::WindSpeed, "wind"),
            (VariableRole::Temperature, "temperature"),
            (VariableRole::Radiation, "radiation"),
            (VariableRole::Precipitation, "precipitation"),
        ]
        .into_iter()
        .map(|(role, name)| (role, name.to_string()))
        .collect();

        Self { columns }
    }
}

impl ColumnSchema {
    /// Schema with no mapped roles
    pub fn empty() -> Self {
        Self {
            columns: BTreeMap::new(),
        }
    }

    /// Map `role` to `column`, replacing any previous mapping
    pub fn with(mut self, role: VariableRole, column: impl Into<String>) -> Self {
        self.columns.insert(role, column.into());
        self
    }

    pub fn column_for(&self, role: VariableRole) -> Option<&str> {
        self.columns.get(&role).map(String::as_str)
    }

    pub fn role_of(&self, column: &str) -> Option<VariableRole> {
        self.columns
            .iter()
            .find(|(_, name)| name.as_str() == column)
            .map(|(role, _)| *role)
    }

    pub fn roles(&self) -> impl Iterator<Item = (VariableRole, &str)> {
        self.columns.iter().map(|(role, name)| (*role, name.as_str()))
    }

    /// Fail unless every role in `required` is mapped to one of `available`.
    pub fn validate(&self, available: &[String], required: &[VariableRole]) -> Result<()> {
        for role in required {
            let column = self.column_for(*role).ok_or_else(|| ForecastError::MissingVariable {
                role: role.to_string(),
                candidates: Vec::new(),
            })?;

            if !available.iter().any(|c| c == column) {
                return Err(ForecastError::MissingVariable {
                    role: role.to_string(),
                    candidates: vec![column.to_string()],
                });
            }
        }
        Ok(())
    }

    /// Whether `column` should be scaled with the robust scaler
    pub fn is_robust_column(&self, column: &str) -> bool {
        match self.role_of(column) {
            Some(role) => role.prefers_robust_scaling(),
            None => {
                let lower = column.to_lowercase();
                ROBUST_KEYWORDS.iter().any(|k| lower.contains(k))
            }
        }
    }
}
