//! Daily water balance: effective rainfall and irrigation depths

use crate::{ensure_finite, AgroError, Result};
use serde::{Deserialize, Serialize};

/// Parameters of the daily irrigation water balance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaterBalanceParams {
    /// Rainfall at or below this depth (mm) is not usable by the crop
    pub effective_rain_threshold_mm: f64,
    /// Fraction of rainfall above the threshold that counts as effective
    pub effective_rain_fraction: f64,
    /// Application efficiency of the irrigation system (drip = 0.95)
    pub system_efficiency: f64,
    /// Multiplier on ETc for the regulated deficit irrigation variant
    pub rdc_factor: f64,
}

impl Default for WaterBalanceParams {
    fn default() -> Self {
        Self {
            effective_rain_threshold_mm: 3.0,
            effective_rain_fraction: 0.75,
            system_efficiency: 0.95,
            rdc_factor: 0.2,
        }
    }
}

impl WaterBalanceParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.system_efficiency > 0.0 && self.system_efficiency <= 1.0) {
            return Err(AgroError::InvalidInput(format!(
                "System efficiency must be in (0, 1], got {}",
                self.system_efficiency
            )));
        }
        if !(0.0..=1.0).contains(&self.effective_rain_fraction) {
            return Err(AgroError::InvalidInput(format!(
                "Effective rain fraction must be in [0, 1], got {}",
                self.effective_rain_fraction
            )));
        }
        if !self.rdc_factor.is_finite() || self.rdc_factor < 0.0 {
            return Err(AgroError::InvalidInput(format!(
                "RDC factor must be non-negative, got {}",
                self.rdc_factor
            )));
        }
        ensure_finite("effective rain threshold", self.effective_rain_threshold_mm)?;
        Ok(())
    }
}

/// Effective precipitation Pe (mm): a fixed fraction of rain above the threshold.
pub fn effective_precipitation(precipitation_mm: f64, params: &WaterBalanceParams) -> f64 {
    if precipitation_mm > params.effective_rain_threshold_mm {
        params.effective_rain_fraction * precipitation_mm
    } else {
        0.0
    }
}

/// Net irrigation need NN = max(0, ETc − Pe)
pub fn net_need(etc: f64, effective_precipitation: f64) -> f64 {
    (etc - effective_precipitation).max(0.0)
}

/// Gross irrigation need NB = NN / efficiency
pub fn gross_need(net_need: f64, system_efficiency: f64) -> Result<f64> {
    if system_efficiency <= 0.0 {
        return Err(AgroError::CalculationError(
            "System efficiency must be positive".to_string(),
        ));
    }
    Ok(net_need / system_efficiency)
}

/// One day of the water budget, full-ETc and RDC variants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyWaterBudget {
    pub etc: f64,
    pub effective_precipitation: f64,
    pub net_need: f64,
    pub gross_need: f64,
    pub etc_rdc: f64,
    pub net_need_rdc: f64,
    pub gross_need_rdc: f64,
}

impl DailyWaterBudget {
    /// Derive the budget for one day from ET0, Kc and forecast rainfall.
    pub fn compute(et0: f64, kc: f64, precipitation_mm: f64, params: &WaterBalanceParams) -> Result<Self> {
        ensure_finite("ET0", et0)?;
        ensure_finite("Kc", kc)?;
        ensure_finite("precipitation", precipitation_mm)?;
        params.validate()?;

        let etc = kc * et0;
        let pe = effective_precipitation(precipitation_mm, params);
        let nn = net_need(etc, pe);
        let nb = gross_need(nn, params.system_efficiency)?;

        let etc_rdc = params.rdc_factor * etc;
        let nn_rdc = net_need(etc_rdc, pe);
        let nb_rdc = gross_need(nn_rdc, params.system_efficiency)?;

        Ok(Self {
            etc,
            effective_precipitation: pe,
            net_need: nn,
            gross_need: nb,
            etc_rdc,
            net_need_rdc: nn_rdc,
            gross_need_rdc: nb_rdc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_effective_precipitation_threshold() {
        let params = WaterBalanceParams::default();
        assert_eq!(effective_precipitation(2.0, &params), 0.0);
        assert_eq!(effective_precipitation(3.0, &params), 0.0);
        assert_relative_eq!(effective_precipitation(10.0, &params), 7.5);
    }

    #[test]
    fn test_needs_are_clipped_at_zero() {
        let params = WaterBalanceParams::default();
        // ETc = 0.9 * 2.0 = 1.8 < Pe = 7.5
        let budget = DailyWaterBudget::compute(2.0, 0.9, 10.0, &params).unwrap();
        assert_eq!(budget.net_need, 0.0);
        assert_eq!(budget.gross_need, 0.0);
        assert_eq!(budget.net_need_rdc, 0.0);
        assert_eq!(budget.gross_need_rdc, 0.0);
    }

    #[test]
    fn test_negative_et0_never_yields_negative_need() {
        let params = WaterBalanceParams::default();
        let budget = DailyWaterBudget::compute(-0.5, 0.4, 0.0, &params).unwrap();
        assert!(budget.gross_need >= 0.0);
        assert!(budget.gross_need_rdc >= 0.0);
    }

    #[test]
    fn test_dry_day_budget() {
        let params = WaterBalanceParams::default();
        let budget = DailyWaterBudget::compute(5.0, 0.9, 1.0, &params).unwrap();

        assert_relative_eq!(budget.etc, 4.5);
        assert_eq!(budget.effective_precipitation, 0.0);
        assert_relative_eq!(budget.net_need, 4.5);
        assert_relative_eq!(budget.gross_need, 4.5 / 0.95);
        assert_relative_eq!(budget.etc_rdc, 0.9);
        assert_relative_eq!(budget.gross_need_rdc, 0.9 / 0.95);
    }

    #[test]
    fn test_rainy_day_reduces_need() {
        let params = WaterBalanceParams::default();
        let budget = DailyWaterBudget::compute(6.0, 0.9, 4.0, &params).unwrap();

        assert_relative_eq!(budget.effective_precipitation, 3.0);
        assert_relative_eq!(budget.net_need, 5.4 - 3.0, epsilon = 1e-12);
        // RDC ETc (1.08) is below Pe, so the deficit variant needs nothing
        assert_eq!(budget.net_need_rdc, 0.0);
    }

    #[test]
    fn test_parameter_validation() {
        let bad = WaterBalanceParams {
            system_efficiency: 0.0,
            ..WaterBalanceParams::default()
        };
        assert!(DailyWaterBudget::compute(5.0, 0.9, 0.0, &bad).is_err());
        assert!(gross_need(1.0, 0.0).is_err());
    }
}
