//! Crop coefficient (Kc) curve over the phenological season

use crate::{AgroError, Result};
use serde::{Deserialize, Serialize};

/// Phenological stage of the crop on a given day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrowthStage {
    Initial,
    Development,
    MidSeason,
    LateSeason,
    Dormant,
}

/// Four-stage FAO crop-coefficient curve.
///
/// Stage lengths are in days and counted from day 1 of the year. Kc is
/// constant in the initial and mid-season stages, ramps linearly during
/// development and late season, and holds at `kc_end` after the season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropCoefficientCurve {
    pub initial_days: u32,
    pub development_days: u32,
    pub mid_season_days: u32,
    pub late_season_days: u32,
    pub kc_initial: f64,
    pub kc_mid: f64,
    pub kc_end: f64,
}

impl Default for CropCoefficientCurve {
    /// Almond orchard curve: 15 / 50 / 98 / 31 days, Kc 0.4 → 0.9 → 0.65
    fn default() -> Self {
        Self {
            initial_days: 15,
            development_days: 50,
            mid_season_days: 98,
            late_season_days: 31,
            kc_initial: 0.4,
            kc_mid: 0.9,
            kc_end: 0.65,
        }
    }
}

impl CropCoefficientCurve {
    /// Create a validated curve
    pub fn new(
        stage_days: [u32; 4],
        kc_initial: f64,
        kc_mid: f64,
        kc_end: f64,
    ) -> Result<Self> {
        let curve = Self {
            initial_days: stage_days[0],
            development_days: stage_days[1],
            mid_season_days: stage_days[2],
            late_season_days: stage_days[3],
            kc_initial,
            kc_mid,
            kc_end,
        };
        curve.validate()?;
        Ok(curve)
    }

    /// Check that coefficients are finite and non-negative and the ramps have length.
    pub fn validate(&self) -> Result<()> {
        for (name, kc) in [
            ("kc_initial", self.kc_initial),
            ("kc_mid", self.kc_mid),
            ("kc_end", self.kc_end),
        ] {
            if !kc.is_finite() || kc < 0.0 {
                return Err(AgroError::InvalidInput(format!(
                    "{} must be a non-negative number, got {}",
                    name, kc
                )));
            }
        }

        if self.development_days == 0 || self.late_season_days == 0 {
            return Err(AgroError::InvalidInput(
                "Development and late-season stages must last at least one day".to_string(),
            ));
        }
        Ok(())
    }

    /// Last day of the season (194 for the default curve)
    pub fn season_length(&self) -> u32 {
        self.initial_days + self.development_days + self.mid_season_days + self.late_season_days
    }

    /// Stage that contains `day` (1-based day of year)
    pub fn stage(&self, day: u32) -> GrowthStage {
        let end_initial = self.initial_days;
        let end_development = end_initial + self.development_days;
        let end_mid = end_development + self.mid_season_days;
        let end_late = end_mid + self.late_season_days;

        match day {
            d if d <= end_initial => GrowthStage::Initial,
            d if d <= end_development => GrowthStage::Development,
            d if d <= end_mid => GrowthStage::MidSeason,
            d if d <= end_late => GrowthStage::LateSeason,
            _ => GrowthStage::Dormant,
        }
    }

    /// Crop coefficient for `day` (1-based day of year).
    ///
    /// No leap-year adjustment is made; day 366 falls in the dormant tail.
    pub fn kc(&self, day: u32) -> f64 {
        let end_initial = self.initial_days;
        let end_development = end_initial + self.development_days;
        let end_mid = end_development + self.mid_season_days;

        match self.stage(day) {
            GrowthStage::Initial => self.kc_initial,
            GrowthStage::Development => {
                let progress = (day - end_initial) as f64 / self.development_days as f64;
                self.kc_initial + progress * (self.kc_mid - self.kc_initial)
            }
            GrowthStage::MidSeason => self.kc_mid,
            GrowthStage::LateSeason => {
                let progress = (day - end_mid) as f64 / self.late_season_days as f64;
                self.kc_mid + progress * (self.kc_end - self.kc_mid)
            }
            GrowthStage::Dormant => self.kc_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_stage_boundaries() {
        let curve = CropCoefficientCurve::default();
        assert_relative_eq!(curve.kc(15), 0.4);
        assert_relative_eq!(curve.kc(65), 0.9, epsilon = 1e-12);
        assert_relative_eq!(curve.kc(163), 0.9);
        assert_relative_eq!(curve.kc(194), 0.65, epsilon = 1e-12);
        assert_eq!(curve.season_length(), 194);
    }

    #[test]
    fn test_dormant_tail_holds_end_value() {
        let curve = CropCoefficientCurve::default();
        for day in 195..=366 {
            assert_relative_eq!(curve.kc(day), 0.65);
            assert_eq!(curve.stage(day), GrowthStage::Dormant);
        }
    }

    #[test]
    fn test_linear_ramps() {
        let curve = CropCoefficientCurve::default();
        // Halfway through development: 0.4 + 0.5 * 0.5
        assert_relative_eq!(curve.kc(40), 0.65, epsilon = 1e-12);
        assert_eq!(curve.stage(40), GrowthStage::Development);

        // One day into late season
        let expected = 0.9 - 0.25 / 31.0;
        assert_relative_eq!(curve.kc(164), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_curve_is_continuous() {
        let curve = CropCoefficientCurve::default();
        for day in 1..curve.season_length() + 5 {
            let step = (curve.kc(day + 1) - curve.kc(day)).abs();
            assert!(step <= 0.5 / 50.0 + 1e-12, "jump of {} at day {}", step, day);
        }
    }

    #[test]
    fn test_validation() {
        assert!(CropCoefficientCurve::new([15, 50, 98, 31], 0.4, 0.9, 0.65).is_ok());
        assert!(CropCoefficientCurve::new([15, 0, 98, 31], 0.4, 0.9, 0.65).is_err());
        assert!(CropCoefficientCurve::new([15, 50, 98, 31], -0.1, 0.9, 0.65).is_err());
        assert!(CropCoefficientCurve::new([15, 50, 98, 31], 0.4, f64::NAN, 0.65).is_err());
    }
}
