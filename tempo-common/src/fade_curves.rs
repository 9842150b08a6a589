//! Gain curves for crossfade ramps
//!
//! A curve maps normalized fade progress `t` (0.0 at fade start, 1.0 at fade
//! end) to a gain multiplier. The incoming track follows `fade_in(t)` and the
//! outgoing track follows `fade_out(t)`.

use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};

/// Crossfade gain curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// v(t) = t
    #[default]
    Linear,
    /// v(t) = sin(t·π/2); constant summed power
    EqualPower,
    /// v(t) = ½(1 − cos(π·t))
    SCurve,
    /// v(t) = t²
    Exponential,
    /// v(t) = √t
    Logarithmic,
}

impl FadeCurve {
    /// Gain for the track fading in
    ///
    /// # Arguments
    /// * `t` - Fade progress, clamped to 0.0..=1.0
    pub fn fade_in(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => t,
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
            FadeCurve::SCurve => 0.5 * (1.0 - (PI * t).cos()),
            FadeCurve::Exponential => t * t,
            FadeCurve::Logarithmic => t.sqrt(),
        }
    }

    /// Gain for the track fading out
    ///
    /// Mirror image of [`FadeCurve::fade_in`]: `fade_out(t) == fade_in(1 - t)`.
    pub fn fade_out(&self, t: f32) -> f32 {
        self.fade_in(1.0 - t.clamp(0.0, 1.0))
    }

    /// Canonical settings-store value
    pub fn as_str(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "linear",
            FadeCurve::EqualPower => "equal_power",
            FadeCurve::SCurve => "s_curve",
            FadeCurve::Exponential => "exponential",
            FadeCurve::Logarithmic => "logarithmic",
        }
    }

    /// Every supported curve, for validation and UI listings
    pub fn all() -> &'static [FadeCurve] {
        &[
            FadeCurve::Linear,
            FadeCurve::EqualPower,
            FadeCurve::SCurve,
            FadeCurve::Exponential,
            FadeCurve::Logarithmic,
        ]
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FadeCurve {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linear" => Ok(FadeCurve::Linear),
            "equal_power" | "equalpower" => Ok(FadeCurve::EqualPower),
            "s_curve" | "scurve" | "s-curve" | "cosine" => Ok(FadeCurve::SCurve),
            "exponential" => Ok(FadeCurve::Exponential),
            "logarithmic" => Ok(FadeCurve::Logarithmic),
            other => Err(format!("unknown fade curve '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    #[test]
    fn every_curve_hits_its_endpoints() {
        for curve in FadeCurve::all() {
            assert!(curve.fade_in(0.0).abs() < EPSILON, "{curve} fade_in(0)");
            assert!((curve.fade_in(1.0) - 1.0).abs() < EPSILON, "{curve} fade_in(1)");
            assert!((curve.fade_out(0.0) - 1.0).abs() < EPSILON, "{curve} fade_out(0)");
            assert!(curve.fade_out(1.0).abs() < EPSILON, "{curve} fade_out(1)");
        }
    }

    #[test]
    fn linear_fades_sum_to_unity() {
        let curve = FadeCurve::Linear;
        for step in 0..=20 {
            let t = step as f32 / 20.0;
            assert!((curve.fade_in(t) + curve.fade_out(t) - 1.0).abs() < EPSILON);
        }
    }

    #[test]
    fn equal_power_keeps_power_constant() {
        let curve = FadeCurve::EqualPower;
        for step in 0..=20 {
            let t = step as f32 / 20.0;
            let power = curve.fade_in(t).powi(2) + curve.fade_out(t).powi(2);
            assert!((power - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(FadeCurve::Linear.fade_in(-3.0), 0.0);
        assert_eq!(FadeCurve::Linear.fade_in(7.0), 1.0);
    }

    #[test]
    fn parses_store_values() {
        for curve in FadeCurve::all() {
            assert_eq!(curve.as_str().parse::<FadeCurve>().unwrap(), *curve);
        }
        assert_eq!("cosine".parse::<FadeCurve>().unwrap(), FadeCurve::SCurve);
        assert!("wobbly".parse::<FadeCurve>().is_err());
    }
}
