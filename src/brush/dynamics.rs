//! Per-point brush dynamics
//!
//! Maps a captured sample (pressure, tilt, velocity) onto paint parameters.
//! Terms gated on an optional channel are skipped when the channel is
//! absent, and range clamping happens once, after every modifier.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Brush, BrushShape, Color, ColorShift};
use crate::input::Point;

/// Speed (px/s) at which velocity dynamics saturate
pub const VELOCITY_CEILING_PX_PER_S: f32 = 500.0;

/// Paint parameters derived for one point
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicsResult {
    pub size: f32,
    pub opacity: f32,
    pub flow: f32,
    /// Dab rotation in degrees [0, 360)
    pub rotation: f32,
    /// Positional offset in pixels
    pub scatter: [f32; 2],
    pub color_shift: ColorShift,
}

/// Everything the rasterizer needs to stamp one dab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaintState {
    pub color: Color,
    pub size: f32,
    pub opacity: f32,
    pub flow: f32,
    pub rotation: f32,
    pub hardness: f32,
    pub shape: BrushShape,
    pub grain_intensity: f32,
    pub grain_scale: f32,
    /// Share of the canvas colour picked up under the dab (0 = dry)
    pub wet_pull: f32,
    pub wetness: f32,
}

impl PaintState {
    /// Effective per-dab alpha before mask coverage
    pub fn dab_alpha(&self) -> f32 {
        (self.color.a * self.opacity * self.flow).clamp(0.0, 1.0)
    }
}

/// Compute dynamics for `point`
///
/// `velocity` is in pixels per second. `rng` supplies jitter; callers reseed
/// it per point so strokes vary while staying bounded.
pub fn compute_dynamics<R: Rng>(
    brush: &Brush,
    point: &Point,
    previous: Option<&Point>,
    velocity: f32,
    rng: &mut R,
) -> DynamicsResult {
    let mut size = brush.size;
    let mut opacity = brush.opacity;
    let mut flow = brush.flow;
    let mut rotation = 0.0f32;
    let mut shift = ColorShift::default();

    if let Some(pressure) = point.pressure {
        let mapped = brush.pressure_curve.apply(pressure);
        if brush.pressure_size {
            size *= mapped;
        }
        if brush.pressure_opacity {
            opacity *= mapped;
        }
        if brush.pressure_flow {
            flow *= mapped;
        }
        shift.hue_degrees += brush.color.pressure_hue_shift * pressure;
        shift.brightness += brush.color.pressure_brightness_shift * pressure;
    }

    if brush.tilt.enabled {
        if let Some((tilt_x, tilt_y)) = point.tilt() {
            let magnitude = ((tilt_x * tilt_x + tilt_y * tilt_y).sqrt() / 90.0).clamp(0.0, 1.0);
            size *= 1.0 - brush.tilt.size_reduction * magnitude;
            opacity *= 1.0 - brush.tilt.opacity_reduction * magnitude;
            if magnitude > 0.0 {
                rotation += brush.tilt.angle_weight * tilt_y.atan2(tilt_x).to_degrees();
            }
        }
    }

    if brush.follow_direction {
        if let Some(prev) = previous {
            let (dx, dy) = (point.x - prev.x, point.y - prev.y);
            if dx != 0.0 || dy != 0.0 {
                rotation += dy.atan2(dx).to_degrees();
            }
        }
    }

    if brush.velocity.enabled && velocity.is_finite() {
        let normalized = (velocity / VELOCITY_CEILING_PX_PER_S).clamp(0.0, 1.0);
        size *= 1.0 - brush.velocity.size_reduction * brush.velocity.curve.apply(normalized);
    }

    if brush.size_jitter > 0.0 {
        size *= 1.0 + brush.size_jitter * rng.gen_range(-1.0f32..=1.0);
    }
    if brush.rotation_jitter > 0.0 {
        rotation += brush.rotation_jitter * rng.gen_range(-0.5f32..=0.5);
    }
    let mut scatter = [0.0f32; 2];
    if brush.scatter > 0.0 {
        let reach = brush.scatter * size;
        scatter = [
            reach * rng.gen_range(-1.0f32..=1.0),
            reach * rng.gen_range(-1.0f32..=1.0),
        ];
    }

    let dynamics = &brush.color;
    if dynamics.hue_jitter > 0.0 {
        shift.hue_degrees += dynamics.hue_jitter * rng.gen_range(-0.5f32..=0.5);
    }
    if dynamics.saturation_jitter > 0.0 {
        shift.saturation += dynamics.saturation_jitter * rng.gen_range(-0.5f32..=0.5);
    }
    if dynamics.brightness_jitter > 0.0 {
        shift.brightness += dynamics.brightness_jitter * rng.gen_range(-0.5f32..=0.5);
    }

    // Clamp last so stacked modifiers cannot escape the brush's ranges
    DynamicsResult {
        size: clamp_finite(size, brush.size_min, brush.size_max),
        opacity: clamp_finite(opacity, 0.0, 1.0),
        flow: clamp_finite(flow, 0.0, 1.0),
        rotation: if rotation.is_finite() {
            rotation.rem_euclid(360.0)
        } else {
            0.0
        },
        scatter,
        color_shift: shift,
    }
}

/// Combine brush, colour and per-point dynamics into a paint state
pub fn build_paint(brush: &Brush, color: Color, dynamics: &DynamicsResult) -> PaintState {
    let color = color.shifted(dynamics.color_shift);
    let (wet_pull, wetness) = if brush.wet_mix.enabled {
        (brush.wet_mix.pull, brush.wet_mix.wetness)
    } else {
        (0.0, 0.0)
    };

    PaintState {
        color,
        size: dynamics.size,
        // Wet paint is diluted
        opacity: dynamics.opacity * (1.0 - 0.5 * wetness),
        flow: dynamics.flow,
        rotation: dynamics.rotation,
        hardness: brush.hardness,
        shape: brush.shape.clone(),
        grain_intensity: brush.grain.intensity,
        grain_scale: brush.grain.scale,
        wet_pull,
        wetness,
    }
}

fn clamp_finite(value: f32, min: f32, max: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        min
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brush::ResponseCurve;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn size_is_monotonic_in_pressure() {
        for curve in [
            ResponseCurve::linear(),
            ResponseCurve::soft(),
            ResponseCurve::hard(),
            ResponseCurve::flat(0.4),
        ] {
            let brush = Brush {
                pressure_curve: curve,
                ..Brush::default()
            };
            let mut last = 0.0;
            for step in 0..=20 {
                let p = step as f32 / 20.0;
                let result =
                    compute_dynamics(&brush, &Point::with_pressure(0.0, 0.0, p, 0), None, 0.0, &mut rng());
                assert!(result.size >= last, "size decreased at pressure {p}");
                last = result.size;
            }
        }
    }

    #[test]
    fn missing_pressure_keeps_base_values() {
        let brush = Brush {
            pressure_opacity: true,
            ..Brush::default()
        };
        let result = compute_dynamics(&brush, &Point::new(0.0, 0.0, 0), None, 0.0, &mut rng());
        assert_eq!(result.size, brush.size);
        assert_eq!(result.opacity, brush.opacity);
    }

    #[test]
    fn missing_tilt_does_not_reduce_opacity() {
        let mut brush = Brush::default();
        brush.tilt.enabled = true;
        brush.tilt.opacity_reduction = 1.0;

        let mut point = Point::with_pressure(0.0, 0.0, 1.0, 0);
        let result = compute_dynamics(&brush, &point, None, 0.0, &mut rng());
        assert_eq!(result.opacity, 1.0);

        point.tilt_x = Some(90.0);
        point.tilt_y = Some(0.0);
        let tilted = compute_dynamics(&brush, &point, None, 0.0, &mut rng());
        assert!(tilted.opacity < 0.01);
    }

    #[test]
    fn faster_motion_shrinks_size() {
        let mut brush = Brush::default();
        brush.pressure_size = false;
        brush.velocity.enabled = true;

        let point = Point::new(0.0, 0.0, 0);
        let slow = compute_dynamics(&brush, &point, None, 50.0, &mut rng());
        let fast = compute_dynamics(&brush, &point, None, 450.0, &mut rng());
        let capped = compute_dynamics(&brush, &point, None, 5_000.0, &mut rng());

        assert!(fast.size < slow.size);
        assert!((capped.size - brush.size * 0.5).abs() < 1e-4);
    }

    #[test]
    fn clamping_applies_after_jitter() {
        let brush = Brush {
            size: 100.0,
            size_max: 100.0,
            size_jitter: 1.0,
            pressure_size: false,
            ..Brush::default()
        };
        let mut rng = rng();
        for _ in 0..200 {
            let result = compute_dynamics(&brush, &Point::new(0.0, 0.0, 0), None, 0.0, &mut rng);
            assert!(result.size >= brush.size_min && result.size <= brush.size_max);
        }
    }

    #[test]
    fn follow_direction_sets_rotation() {
        let brush = Brush {
            follow_direction: true,
            ..Brush::default()
        };
        let prev = Point::new(0.0, 0.0, 0);
        let point = Point::new(0.0, 10.0, 8);
        let result = compute_dynamics(&brush, &point, Some(&prev), 0.0, &mut rng());
        assert!((result.rotation - 90.0).abs() < 1e-3);
    }

    #[test]
    fn build_paint_applies_color_shift() {
        let mut brush = Brush::default();
        brush.color.pressure_hue_shift = 120.0;
        let dynamics = compute_dynamics(
            &brush,
            &Point::with_pressure(0.0, 0.0, 1.0, 0),
            None,
            0.0,
            &mut rng(),
        );
        let paint = build_paint(&brush, Color::rgba(1.0, 0.0, 0.0, 1.0), &dynamics);
        assert!(paint.color.g > 0.99 && paint.color.r < 0.01);
        assert_eq!(paint.dab_alpha(), 1.0);
    }
}
