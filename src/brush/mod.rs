//! Brush engine module - per-point dynamics, stamps and stroke building

pub mod color;
mod definition;
pub mod dynamics;
mod engine;
mod interpolation;
pub mod library;
pub mod stamp;

pub use color::{Color, ColorShift, Hsb};
pub use definition::{
    Brush, BrushShape, ColorDynamics, GrainSettings, TiltDynamics, VelocityDynamics, WetMix,
    MAX_BRUSH_SIZE,
};
pub use dynamics::{build_paint, compute_dynamics, DynamicsResult, PaintState};
pub use engine::{BrushEngine, Dab};
pub use interpolation::{interpolate_catmull_rom, interpolate_linear, path_length, velocity_between};
pub use stamp::{Stamp, StampCache, StampKey};

use serde::{Deserialize, Serialize};

use crate::core::errors::CoreError;

/// Blend modes for strokes and layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
}

impl BlendMode {
    pub fn is_normal(self) -> bool {
        self == BlendMode::Normal
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
            BlendMode::Darken => "darken",
            BlendMode::Lighten => "lighten",
            BlendMode::ColorDodge => "color-dodge",
            BlendMode::ColorBurn => "color-burn",
            BlendMode::HardLight => "hard-light",
            BlendMode::SoftLight => "soft-light",
            BlendMode::Difference => "difference",
            BlendMode::Exclusion => "exclusion",
        }
    }
}

/// Response curve mapping an input in [0, 1] to an output in [0, 1]
///
/// Piecewise-linear over sorted control points, so flat, concave and convex
/// profiles are all expressible without a fixed formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseCurve {
    points: Vec<(f32, f32)>,
}

impl ResponseCurve {
    /// Linear mapping (1:1)
    pub fn linear() -> Self {
        Self {
            points: vec![(0.0, 0.0), (1.0, 1.0)],
        }
    }

    /// Soft curve (more sensitive at low input)
    pub fn soft() -> Self {
        Self {
            points: vec![
                (0.0, 0.0),
                (0.25, 0.4375),
                (0.5, 0.75),
                (0.75, 0.9375),
                (1.0, 1.0),
            ],
        }
    }

    /// Hard curve (less sensitive at low input)
    pub fn hard() -> Self {
        Self {
            points: vec![
                (0.0, 0.0),
                (0.25, 0.0625),
                (0.5, 0.25),
                (0.75, 0.5625),
                (1.0, 1.0),
            ],
        }
    }

    /// Constant output regardless of input
    pub fn flat(level: f32) -> Self {
        let level = level.clamp(0.0, 1.0);
        Self {
            points: vec![(0.0, level), (1.0, level)],
        }
    }

    /// Build from arbitrary control points (sorted by input)
    pub fn from_points(mut points: Vec<(f32, f32)>) -> Result<Self, CoreError> {
        if points.is_empty() {
            return Err(CoreError::InvalidInput(
                "Response curve needs at least one control point".to_string(),
            ));
        }
        if points
            .iter()
            .any(|(x, y)| !x.is_finite() || !y.is_finite())
        {
            return Err(CoreError::InvalidInput(
                "Response curve control points must be finite".to_string(),
            ));
        }
        for point in points.iter_mut() {
            point.0 = point.0.clamp(0.0, 1.0);
            point.1 = point.1.clamp(0.0, 1.0);
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Self { points })
    }

    pub fn points(&self) -> &[(f32, f32)] {
        &self.points
    }

    /// Apply the curve to an input value
    pub fn apply(&self, input: f32) -> f32 {
        let v = input.clamp(0.0, 1.0);
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return v;
        };
        if v <= first.0 {
            return first.1;
        }
        if v >= last.0 {
            return last.1;
        }

        for w in self.points.windows(2) {
            let (x0, y0) = w[0];
            let (x1, y1) = w[1];
            if v <= x1 {
                let span = x1 - x0;
                if span <= f32::EPSILON {
                    return y1;
                }
                return y0 + (y1 - y0) * (v - x0) / span;
            }
        }
        last.1
    }

    /// Non-decreasing curves preserve input ordering
    pub fn is_monotonic(&self) -> bool {
        self.points.windows(2).all(|w| w[1].1 >= w[0].1)
    }
}

impl Default for ResponseCurve {
    fn default() -> Self {
        Self::linear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressure_curve_linear() {
        let curve = ResponseCurve::linear();
        assert_eq!(curve.apply(0.0), 0.0);
        assert_eq!(curve.apply(0.5), 0.5);
        assert_eq!(curve.apply(1.0), 1.0);
    }

    #[test]
    fn test_pressure_curve_soft() {
        let curve = ResponseCurve::soft();
        assert_eq!(curve.apply(0.0), 0.0);
        assert_eq!(curve.apply(1.0), 1.0);
        // Soft curve should give higher output for mid pressure
        assert!(curve.apply(0.5) > 0.5);
    }

    #[test]
    fn test_pressure_curve_hard() {
        let curve = ResponseCurve::hard();
        assert_eq!(curve.apply(0.0), 0.0);
        assert_eq!(curve.apply(1.0), 1.0);
        // Hard curve should give lower output for mid pressure
        assert!(curve.apply(0.5) < 0.5);
    }

    #[test]
    fn test_pressure_clamping() {
        let curve = ResponseCurve::linear();
        assert_eq!(curve.apply(-0.5), 0.0);
        assert_eq!(curve.apply(1.5), 1.0);
    }

    #[test]
    fn interpolates_between_control_points() {
        let curve = ResponseCurve::from_points(vec![(1.0, 1.0), (0.0, 0.2), (0.5, 0.4)])
            .unwrap_or_default();
        assert!((curve.apply(0.25) - 0.3).abs() < 1e-6);
        assert!((curve.apply(0.75) - 0.7).abs() < 1e-6);
        assert!(curve.is_monotonic());
    }

    #[test]
    fn flat_curve_ignores_input() {
        let curve = ResponseCurve::flat(0.6);
        assert_eq!(curve.apply(0.0), 0.6);
        assert_eq!(curve.apply(0.9), 0.6);
    }

    #[test]
    fn rejects_invalid_control_points() {
        assert!(ResponseCurve::from_points(vec![]).is_err());
        assert!(ResponseCurve::from_points(vec![(f32::NAN, 0.0)]).is_err());
    }

    #[test]
    fn detects_non_monotonic_curves() {
        let curve = ResponseCurve::from_points(vec![(0.0, 1.0), (1.0, 0.0)]).unwrap_or_default();
        assert!(!curve.is_monotonic());
    }

    #[test]
    fn blend_mode_serializes_kebab_case() {
        let json = serde_json::to_string(&BlendMode::ColorDodge).unwrap_or_default();
        assert_eq!(json, "\"color-dodge\"");
        assert_eq!(BlendMode::ColorDodge.as_str(), "color-dodge");
    }
}
