//! Brush template: shape, dynamics curves, grain and wet-mix parameters

use serde::{Deserialize, Serialize};

use super::{BlendMode, ResponseCurve};

/// Largest tip diameter in pixels
pub const MAX_BRUSH_SIZE: f32 = 5000.0;

/// Tip shape of a brush
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BrushShape {
    #[default]
    Round,
    Square,
    /// Elliptical tip; `roundness` is the minor/major axis ratio
    Flat { roundness: f32 },
    /// Grayscale texture registered with the stamp cache
    #[serde(rename_all = "camelCase")]
    Texture { texture_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TiltDynamics {
    pub enabled: bool,
    /// Share of size removed at full tilt
    pub size_reduction: f32,
    /// Share of opacity removed at full tilt
    pub opacity_reduction: f32,
    /// How strongly the tilt direction biases dab rotation
    pub angle_weight: f32,
}

impl Default for TiltDynamics {
    fn default() -> Self {
        Self {
            enabled: false,
            size_reduction: 0.3,
            opacity_reduction: 0.2,
            angle_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VelocityDynamics {
    pub enabled: bool,
    /// Maps normalised speed to the amount of shrinkage applied
    pub curve: ResponseCurve,
    /// Share of size removed at the velocity ceiling
    pub size_reduction: f32,
}

impl Default for VelocityDynamics {
    fn default() -> Self {
        Self {
            enabled: false,
            curve: ResponseCurve::linear(),
            size_reduction: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ColorDynamics {
    /// Random hue offset range, degrees
    pub hue_jitter: f32,
    pub saturation_jitter: f32,
    pub brightness_jitter: f32,
    /// Hue offset at full pressure, degrees
    pub pressure_hue_shift: f32,
    /// Brightness offset at full pressure
    pub pressure_brightness_shift: f32,
}

impl ColorDynamics {
    pub fn is_active(&self) -> bool {
        self.hue_jitter != 0.0
            || self.saturation_jitter != 0.0
            || self.brightness_jitter != 0.0
            || self.pressure_hue_shift != 0.0
            || self.pressure_brightness_shift != 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GrainSettings {
    /// 0 disables grain
    pub intensity: f32,
    /// Noise cell size in pixels
    pub scale: f32,
}

impl Default for GrainSettings {
    fn default() -> Self {
        Self {
            intensity: 0.0,
            scale: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WetMix {
    pub enabled: bool,
    /// How much of the paint is diluted
    pub wetness: f32,
    /// How much canvas colour is picked up under the dab
    pub pull: f32,
}

impl Default for WetMix {
    fn default() -> Self {
        Self {
            enabled: false,
            wetness: 0.5,
            pull: 0.3,
        }
    }
}

/// A named, versioned brush configuration
///
/// Library brushes are templates. The engine holds a deep copy as its
/// current brush and bumps `version` on every edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Brush {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub shape: BrushShape,

    /// Base diameter in pixels
    pub size: f32,
    pub opacity: f32,
    pub flow: f32,
    /// Edge hardness (0 = soft falloff, 1 = hard edge)
    pub hardness: f32,
    /// Dab spacing as a fraction of size
    pub spacing: f32,
    pub size_min: f32,
    pub size_max: f32,

    pub pressure_size: bool,
    pub pressure_opacity: bool,
    pub pressure_flow: bool,
    pub pressure_curve: ResponseCurve,

    pub tilt: TiltDynamics,
    pub velocity: VelocityDynamics,

    /// Random size perturbation as a fraction of size
    pub size_jitter: f32,
    /// Random rotation range in degrees
    pub rotation_jitter: f32,
    /// Random positional offset as a fraction of size
    pub scatter: f32,

    pub color: ColorDynamics,
    pub grain: GrainSettings,
    pub wet_mix: WetMix,

    pub blend_mode: BlendMode,
    /// Position smoothing for strokes drawn with this brush
    pub smoothing: f32,
    /// Rotate dabs along the stroke direction
    pub follow_direction: bool,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            id: "round".to_string(),
            name: "Round".to_string(),
            version: 1,
            shape: BrushShape::Round,
            size: 20.0,
            opacity: 1.0,
            flow: 1.0,
            hardness: 1.0,
            spacing: 0.25,
            size_min: 1.0,
            size_max: 500.0,
            pressure_size: true,
            pressure_opacity: false,
            pressure_flow: false,
            pressure_curve: ResponseCurve::linear(),
            tilt: TiltDynamics::default(),
            velocity: VelocityDynamics::default(),
            size_jitter: 0.0,
            rotation_jitter: 0.0,
            scatter: 0.0,
            color: ColorDynamics::default(),
            grain: GrainSettings::default(),
            wet_mix: WetMix::default(),
            blend_mode: BlendMode::Normal,
            smoothing: 0.5,
            follow_direction: false,
        }
    }
}

impl Brush {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Normalise out-of-range fields after deserialisation or an edit
    pub fn sanitize(&mut self) {
        self.size_min = finite_or(self.size_min, 1.0).clamp(0.1, MAX_BRUSH_SIZE);
        self.size_max = finite_or(self.size_max, 500.0).clamp(self.size_min, MAX_BRUSH_SIZE);
        self.size = finite_or(self.size, 20.0).clamp(self.size_min, self.size_max);
        self.opacity = finite_or(self.opacity, 1.0).clamp(0.0, 1.0);
        self.flow = finite_or(self.flow, 1.0).clamp(0.0, 1.0);
        self.hardness = finite_or(self.hardness, 1.0).clamp(0.0, 1.0);
        self.spacing = finite_or(self.spacing, 0.25).clamp(0.01, 2.0);
        self.smoothing = finite_or(self.smoothing, 0.5).clamp(0.0, 1.0);
        self.size_jitter = finite_or(self.size_jitter, 0.0).clamp(0.0, 1.0);
        self.scatter = finite_or(self.scatter, 0.0).clamp(0.0, 4.0);
        self.rotation_jitter = finite_or(self.rotation_jitter, 0.0).clamp(0.0, 360.0);
        self.grain.intensity = finite_or(self.grain.intensity, 0.0).clamp(0.0, 1.0);
        self.grain.scale = finite_or(self.grain.scale, 4.0).max(1.0);
        self.wet_mix.wetness = finite_or(self.wet_mix.wetness, 0.5).clamp(0.0, 1.0);
        self.wet_mix.pull = finite_or(self.wet_mix.pull, 0.3).clamp(0.0, 1.0);
        if let BrushShape::Flat { roundness } = &mut self.shape {
            *roundness = finite_or(*roundness, 1.0).clamp(0.05, 1.0);
        }
    }

    /// Spacing between dabs in pixels at base size
    pub fn spacing_px(&self) -> f32 {
        (self.size * self.spacing).max(0.5)
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
