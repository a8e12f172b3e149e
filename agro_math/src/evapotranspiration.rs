//! Reference evapotranspiration (FAO-56 Penman-Monteith, daily step)
//!
//! Forecast tables carry pressure in hPa and solar radiation in J/m²/day,
//! so the raw values pass through a [`UnitConversion`] before the formula
//! is applied. Soil heat flux is taken as zero at the daily step.

use crate::{ensure_finite, AgroError, Result};
use serde::{Deserialize, Serialize};

/// Albedo of the hypothetical grass reference crop
pub const REFERENCE_ALBEDO: f64 = 0.23;

/// Multipliers taking raw sensor units to the units used by FAO-56
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConversion {
    /// Pressure multiplier to kPa (hPa × 0.1)
    pub pressure_to_kpa: f64,
    /// Radiation multiplier to MJ/m²/day (J/m²/day ÷ 1e6)
    pub radiation_to_mj: f64,
}

impl Default for UnitConversion {
    fn default() -> Self {
        Self {
            pressure_to_kpa: 0.1,
            radiation_to_mj: 1e-6,
        }
    }
}

impl UnitConversion {
    /// Identity conversion, for inputs already in kPa and MJ/m²/day
    pub fn identity() -> Self {
        Self {
            pressure_to_kpa: 1.0,
            radiation_to_mj: 1.0,
        }
    }
}

/// Daily weather drivers for the Penman-Monteith equation, in FAO-56 units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Et0Inputs {
    /// Mean air temperature (°C)
    pub temperature_c: f64,
    /// Mean relative humidity (%)
    pub relative_humidity_pct: f64,
    /// Wind speed at 2 m (m/s)
    pub wind_speed_ms: f64,
    /// Atmospheric pressure (kPa)
    pub pressure_kpa: f64,
    /// Incoming solar radiation (MJ/m²/day)
    pub solar_radiation_mj: f64,
}

impl Et0Inputs {
    /// Build inputs from raw forecast values using the given unit conversion.
    pub fn from_raw(
        temperature_c: f64,
        relative_humidity_pct: f64,
        wind_speed_ms: f64,
        pressure: f64,
        solar_radiation: f64,
        units: &UnitConversion,
    ) -> Self {
        Self {
            temperature_c,
            relative_humidity_pct,
            wind_speed_ms,
            pressure_kpa: pressure * units.pressure_to_kpa,
            solar_radiation_mj: solar_radiation * units.radiation_to_mj,
        }
    }

    fn validate(&self) -> Result<()> {
        ensure_finite("temperature", self.temperature_c)?;
        ensure_finite("relative humidity", self.relative_humidity_pct)?;
        ensure_finite("wind speed", self.wind_speed_ms)?;
        ensure_finite("pressure", self.pressure_kpa)?;
        ensure_finite("solar radiation", self.solar_radiation_mj)?;

        if self.temperature_c <= -237.3 {
            return Err(AgroError::InvalidInput(format!(
                "temperature {} °C is below the Tetens singularity",
                self.temperature_c
            )));
        }
        Ok(())
    }
}

/// Saturation vapour pressure es (kPa) at temperature `t` (°C)
pub fn saturation_vapour_pressure(t: f64) -> f64 {
    0.6108 * (17.27 * t / (t + 237.3)).exp()
}

/// Actual vapour pressure ea (kPa) from es and relative humidity (%)
pub fn actual_vapour_pressure(es: f64, relative_humidity_pct: f64) -> f64 {
    es * relative_humidity_pct / 100.0
}

/// Slope of the saturation vapour pressure curve Δ (kPa/°C)
pub fn vapour_pressure_slope(t: f64, es: f64) -> f64 {
    4098.0 * es / (t + 237.3).powi(2)
}

/// Psychrometric constant γ (kPa/°C) for pressure in kPa
pub fn psychrometric_constant(pressure_kpa: f64) -> f64 {
    0.665e-3 * pressure_kpa
}

/// Net radiation Rn (MJ/m²/day), shortwave balance only
pub fn net_radiation(solar_radiation_mj: f64, albedo: f64) -> f64 {
    (1.0 - albedo) * solar_radiation_mj
}

/// Daily reference evapotranspiration ET0 (mm/day) with the reference albedo.
pub fn penman_monteith_et0(inputs: &Et0Inputs) -> Result<f64> {
    penman_monteith_et0_with_albedo(inputs, REFERENCE_ALBEDO)
}

/// Daily reference evapotranspiration ET0 (mm/day).
///
/// `ET0 = [0.408·Δ·(Rn−G) + γ·(900/(T+273))·u2·(es−ea)] / [Δ + γ·(1+0.34·u2)]`
pub fn penman_monteith_et0_with_albedo(inputs: &Et0Inputs, albedo: f64) -> Result<f64> {
    inputs.validate()?;
    ensure_finite("albedo", albedo)?;

    let t = inputs.temperature_c;
    let u2 = inputs.wind_speed_ms;

    let es = saturation_vapour_pressure(t);
    let ea = actual_vapour_pressure(es, inputs.relative_humidity_pct);
    let delta = vapour_pressure_slope(t, es);
    let gamma = psychrometric_constant(inputs.pressure_kpa);
    let rn = net_radiation(inputs.solar_radiation_mj, albedo);
    let g = 0.0;

    let numerator = 0.408 * delta * (rn - g) + gamma * (900.0 / (t + 273.0)) * u2 * (es - ea);
    let denominator = delta + gamma * (1.0 + 0.34 * u2);

    if denominator.abs() < 1e-12 {
        return Err(AgroError::CalculationError(
            "Penman-Monteith denominator vanished".to_string(),
        ));
    }

    let et0 = numerator / denominator;
    if !et0.is_finite() {
        return Err(AgroError::CalculationError(format!(
            "ET0 evaluated to a non-finite value for {:?}",
            inputs
        )));
    }
    Ok(et0)
}
