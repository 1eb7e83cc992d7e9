//! Brush engine - turns processed stroke points into renderable dabs

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::interpolation::{interpolate_catmull_rom, interpolate_linear, velocity_between};
use super::{build_paint, compute_dynamics, library, Brush, Color, PaintState};
use crate::core::settings::BrushDefaults;
use crate::input::Point;

/// One stamp of paint on the canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dab {
    pub x: f32,
    pub y: f32,
    pub paint: PaintState,
}

impl Dab {
    /// Half extent of the area this dab can touch
    pub fn reach(&self) -> f32 {
        // Soft tips extend past the nominal radius
        let soft = 1.0 + (1.0 - self.paint.hardness.clamp(0.0, 1.0)) * 2.0;
        self.paint.size * 0.5 * soft + 3.0
    }
}

/// The brush engine: owns the current brush and paint colour
pub struct BrushEngine {
    brush: Brush,
    color: Color,
    pressure_sensitivity: f32,
    /// Point density multiplier from the performance optimizer
    point_density: f32,
    /// Advanced once per dab so every point draws fresh jitter
    seed: u64,
}

impl BrushEngine {
    pub fn new(brush: Brush) -> Self {
        Self::with_seed(brush, rand::random())
    }

    /// Deterministic jitter sequence, for tests and replays
    pub fn with_seed(mut brush: Brush, seed: u64) -> Self {
        brush.sanitize();
        Self {
            brush,
            color: Color::BLACK,
            pressure_sensitivity: 1.0,
            point_density: 1.0,
            seed,
        }
    }

    /// Build from the settings collaborator's brush defaults
    pub fn from_defaults(defaults: &BrushDefaults) -> Self {
        let brush = library::builtin_brush(&defaults.brush_id).unwrap_or_else(|| {
            tracing::warn!(
                "[BrushEngine] Unknown default brush '{}', using pencil",
                defaults.brush_id
            );
            library::pencil()
        });
        let mut engine = Self::new(brush);
        engine.set_pressure_sensitivity(defaults.pressure_sensitivity);
        engine.brush.smoothing = defaults.smoothing.clamp(0.0, 1.0);
        engine
    }

    pub fn brush(&self) -> &Brush {
        &self.brush
    }

    /// Select a brush; the engine keeps its own copy of the template
    pub fn set_brush(&mut self, template: &Brush) {
        let mut brush = template.clone();
        brush.sanitize();
        tracing::debug!("[BrushEngine] Brush set to '{}' v{}", brush.id, brush.version);
        self.brush = brush;
    }

    /// Brush Studio edit of the current brush; bumps its version
    pub fn edit_brush<F: FnOnce(&mut Brush)>(&mut self, edit: F) {
        edit(&mut self.brush);
        self.brush.sanitize();
        self.brush.version = self.brush.version.saturating_add(1);
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = color.clamped();
    }

    pub fn set_pressure_sensitivity(&mut self, sensitivity: f32) {
        self.pressure_sensitivity = if sensitivity.is_finite() {
            sensitivity.clamp(0.1, 4.0)
        } else {
            1.0
        };
    }

    pub fn set_point_density(&mut self, density: f32) {
        self.point_density = density.clamp(0.1, 1.0);
    }

    /// Dab spacing in pixels at the current brush size and density
    pub fn spacing_px(&self) -> f32 {
        self.brush.spacing_px() / self.point_density
    }

    /// Densify a stroke path and compute paint per dab
    pub fn build_dabs(&mut self, points: &[Point]) -> Vec<Dab> {
        if points.is_empty() {
            return Vec::new();
        }

        let points: Vec<Point> = points.iter().map(|p| self.scale_pressure(p)).collect();
        let spacing = self.spacing_px();
        let path = if points.len() >= 4 {
            interpolate_catmull_rom(&points, spacing)
        } else {
            interpolate_linear(&points, spacing)
        };

        let mut dabs = Vec::with_capacity(path.len());
        for (i, point) in path.iter().enumerate() {
            let previous = i.checked_sub(1).map(|j| &path[j]);
            let velocity = local_velocity(&path, i);
            let mut rng = StdRng::seed_from_u64(self.next_seed());

            let dynamics = compute_dynamics(&self.brush, point, previous, velocity, &mut rng);
            let paint = build_paint(&self.brush, self.color, &dynamics);
            dabs.push(Dab {
                x: point.x + dynamics.scatter[0],
                y: point.y + dynamics.scatter[1],
                paint,
            });
        }
        dabs
    }

    fn scale_pressure(&self, point: &Point) -> Point {
        let mut scaled = *point;
        scaled.pressure = point
            .pressure
            .map(|p| (p * self.pressure_sensitivity).clamp(0.0, 1.0));
        scaled
    }

    fn next_seed(&mut self) -> u64 {
        // splitmix64 step
        self.seed = self.seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.seed;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

impl Default for BrushEngine {
    fn default() -> Self {
        Self::new(library::pencil())
    }
}

/// Speed around `index`, from the samples on either side
fn local_velocity(path: &[Point], index: usize) -> f32 {
    let before = &path[index.saturating_sub(2)];
    let after = &path[(index + 2).min(path.len() - 1)];
    velocity_between(before, after)
}
