//! Fade curves for crossfade envelopes
//!
//! Each curve supplies a complementary fade-in/fade-out pair so that one
//! configured curve governs both sides of a crossfade:
//!
//! - Linear: gains sum to exactly 1.0 at every instant (amplitude
//!   complementary); precise, but dips in perceived loudness mid-fade
//!   for uncorrelated material.
//! - EqualPower: squared gains sum to 1.0 (power complementary);
//!   constant perceived loudness, the default.
//! - SCurve: smooth acceleration and deceleration, amplitude
//!   complementary like Linear but gentler at the endpoints.

use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};

/// Crossfade gain curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FadeCurve {
    /// v_in(t) = t, v_out(t) = 1 - t
    Linear,

    /// v_in(t) = sin(t·π/2), v_out(t) = cos(t·π/2)
    #[default]
    EqualPower,

    /// v_in(t) = (1 - cos(π·t)) / 2, v_out(t) = (1 + cos(π·t)) / 2
    SCurve,
}

impl FadeCurve {
    /// Incoming gain at normalized transition time `t` in [0, 1].
    pub fn fade_in(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => t,
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
            FadeCurve::SCurve => 0.5 * (1.0 - (PI * t).cos()),
        }
    }

    /// Outgoing gain at normalized transition time `t` in [0, 1].
    pub fn fade_out(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::EqualPower => (t * FRAC_PI_2).cos(),
            FadeCurve::SCurve => 0.5 * (1.0 + (PI * t).cos()),
        }
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FadeCurve::Linear => write!(f, "linear"),
            FadeCurve::EqualPower => write!(f, "equal-power"),
            FadeCurve::SCurve => write!(f, "s-curve"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-6;

    #[test]
    fn linear_endpoints_and_midpoint() {
        assert!((FadeCurve::Linear.fade_in(0.0) - 0.0).abs() < EPSILON);
        assert!((FadeCurve::Linear.fade_in(1.0) - 1.0).abs() < EPSILON);
        assert!((FadeCurve::Linear.fade_out(0.0) - 1.0).abs() < EPSILON);
        assert!((FadeCurve::Linear.fade_out(1.0) - 0.0).abs() < EPSILON);
        assert!((FadeCurve::Linear.fade_in(0.5) - 0.5).abs() < EPSILON);
    }

    #[test]
    fn linear_gains_sum_to_unity() {
        for i in 0..=100 {
            let t = i as f32 / 100.0;
            let sum = FadeCurve::Linear.fade_in(t) + FadeCurve::Linear.fade_out(t);
            assert!((sum - 1.0).abs() < EPSILON, "t={}: sum={}", t, sum);
        }
    }

    #[test]
    fn equal_power_gains_sum_to_unity_power() {
        for i in 0..=100 {
            let t = i as f32 / 100.0;
            let g_in = FadeCurve::EqualPower.fade_in(t);
            let g_out = FadeCurve::EqualPower.fade_out(t);
            let power = g_in * g_in + g_out * g_out;
            assert!((power - 1.0).abs() < 1e-5, "t={}: power={}", t, power);
        }
    }

    #[test]
    fn s_curve_gains_sum_to_unity() {
        for i in 0..=100 {
            let t = i as f32 / 100.0;
            let sum = FadeCurve::SCurve.fade_in(t) + FadeCurve::SCurve.fade_out(t);
            assert!((sum - 1.0).abs() < 1e-5, "t={}: sum={}", t, sum);
        }
    }

    #[test]
    fn input_outside_range_is_clamped() {
        assert!((FadeCurve::EqualPower.fade_in(-0.5) - 0.0).abs() < EPSILON);
        assert!((FadeCurve::EqualPower.fade_in(1.5) - 1.0).abs() < EPSILON);
        assert!((FadeCurve::SCurve.fade_out(2.0) - 0.0).abs() < EPSILON);
    }
}
