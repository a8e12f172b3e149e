//! # Agro Math
//!
//! Agronomic calculations for orchard water budgeting.
//! This crate provides the FAO-56 Penman-Monteith reference
//! evapotranspiration, a phenological crop-coefficient curve and the
//! daily water balance (effective rainfall, net and gross irrigation need).

use thiserror::Error;

pub mod crop_coefficient;
pub mod evapotranspiration;
pub mod water_balance;

pub use crop_coefficient::{CropCoefficientCurve, GrowthStage};
pub use evapotranspiration::{penman_monteith_et0, Et0Inputs, UnitConversion};
pub use water_balance::{DailyWaterBudget, WaterBalanceParams};

/// Errors that can occur in agronomic calculations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgroError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Result type for agronomic calculations
pub type Result<T> = std::result::Result<T, AgroError>;

/// Reject NaN and infinite inputs before they reach a formula.
pub(crate) fn ensure_finite(name: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AgroError::InvalidInput(format!(
            "{} must be a finite number, got {}",
            name, value
        )))
    }
}
