//! Layer stack - layers, strokes, compositing and undo history

pub mod blend;
mod composite;
mod history;
mod stack;
pub mod surface;
mod transfer;

#[cfg(test)]
mod tests;

pub use composite::Compositor;
pub use history::{HistoryEntry, HistoryKind, PixelPatch, PixelSnapshot};
pub use stack::{LayerStack, DEFAULT_SURFACE_BUDGET, MAX_LAYERS};
pub use surface::{Rect, SurfaceBudget};
pub use transfer::{decode_png_blob, encode_png_blob, StackSnapshot};

use std::fmt;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::brush::{BlendMode, Brush, Color, Dab};
use crate::input::Point;

/// Stable layer identity, independent of stack position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub u64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrokeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    #[default]
    Raster,
    Group,
}

/// Placement of a layer's pixels on the canvas
///
/// Applied around the canvas centre: scale, then rotation, then translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Transform {
    pub translate_x: f32,
    pub translate_y: f32,
    pub scale: f32,
    pub rotation_degrees: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translate_x: 0.0,
            translate_y: 0.0,
            scale: 1.0,
            rotation_degrees: 0.0,
        }
    }
}

impl Transform {
    pub fn is_identity(&self) -> bool {
        *self == Transform::default()
    }

    /// Clamp scale to a usable range and replace non-finite components
    pub fn sanitized(self) -> Self {
        let finite = |v: f32, fallback: f32| if v.is_finite() { v } else { fallback };
        Self {
            translate_x: finite(self.translate_x, 0.0),
            translate_y: finite(self.translate_y, 0.0),
            scale: finite(self.scale, 1.0).clamp(0.01, 100.0),
            rotation_degrees: finite(self.rotation_degrees, 0.0).rem_euclid(360.0),
        }
    }

    /// Map a canvas position back into layer space
    pub fn inverse_map(&self, x: f32, y: f32, center_x: f32, center_y: f32) -> (f32, f32) {
        let dx = x - center_x - self.translate_x;
        let dy = y - center_y - self.translate_y;
        let (sin, cos) = (-self.rotation_degrees.to_radians()).sin_cos();
        let rx = dx * cos - dy * sin;
        let ry = dx * sin + dy * cos;
        (rx / self.scale + center_x, ry / self.scale + center_y)
    }
}

/// One committed stroke
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    pub id: StrokeId,
    pub layer_id: LayerId,
    pub points: Vec<Point>,
    pub brush_id: String,
    pub base_color: Color,
    pub size: f32,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    /// Rendered dabs, replayed when the layer surface is rebuilt
    pub dabs: Vec<Dab>,
    /// Pixels already live in the layer base (merged strokes)
    #[serde(default)]
    pub baked: bool,
}

impl Stroke {
    /// A stroke ready to hand to `LayerStack::add_stroke`; the stack assigns
    /// its id and layer
    pub fn new(brush: &Brush, base_color: Color, points: Vec<Point>, dabs: Vec<Dab>) -> Self {
        Self {
            id: StrokeId(0),
            layer_id: LayerId(0),
            points,
            brush_id: brush.id.clone(),
            base_color,
            size: brush.size,
            opacity: brush.opacity,
            blend_mode: brush.blend_mode,
            dabs,
            baked: false,
        }
    }
}

/// The user-editable properties of a layer, captured for undo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerProperties {
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub clipping_mask_of: Option<LayerId>,
    pub parent: Option<LayerId>,
    pub transform: Transform,
}

#[derive(Debug, Clone)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub layer_type: LayerType,
    pub visible: bool,
    pub locked: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    /// Base layer this layer is clipped to
    pub clipping_mask_of: Option<LayerId>,
    /// Owning group, for raster layers
    pub parent: Option<LayerId>,
    pub transform: Transform,
    pub strokes: Vec<Stroke>,
    /// Pixels not attributable to live strokes (imports, merges)
    pub base: RgbaImage,
    /// `base` plus every non-baked stroke
    pub surface: RgbaImage,
}

impl Layer {
    pub(crate) fn new(
        id: LayerId,
        name: String,
        layer_type: LayerType,
        base: RgbaImage,
        surface: RgbaImage,
    ) -> Self {
        Self {
            id,
            name,
            layer_type,
            visible: true,
            locked: false,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            clipping_mask_of: None,
            parent: None,
            transform: Transform::default(),
            strokes: Vec::new(),
            base,
            surface,
        }
    }

    pub fn is_group(&self) -> bool {
        self.layer_type == LayerType::Group
    }

    pub fn is_clipping(&self) -> bool {
        self.clipping_mask_of.is_some()
    }

    pub fn properties(&self) -> LayerProperties {
        LayerProperties {
            name: self.name.clone(),
            visible: self.visible,
            locked: self.locked,
            opacity: self.opacity,
            blend_mode: self.blend_mode,
            clipping_mask_of: self.clipping_mask_of,
            parent: self.parent,
            transform: self.transform,
        }
    }

    pub(crate) fn apply_properties(&mut self, props: &LayerProperties) {
        self.name = props.name.clone();
        self.visible = props.visible;
        self.locked = props.locked;
        self.opacity = props.opacity.clamp(0.0, 1.0);
        self.blend_mode = props.blend_mode;
        self.clipping_mask_of = props.clipping_mask_of;
        self.parent = props.parent;
        self.transform = props.transform;
    }

    pub fn stroke(&self, id: StrokeId) -> Option<&Stroke> {
        self.strokes.iter().find(|s| s.id == id)
    }

    /// Bytes held by this layer's pixel buffers
    pub fn pixel_bytes(&self) -> u64 {
        (self.base.as_raw().len() + self.surface.as_raw().len()) as u64
    }
}

#[cfg(test)]
mod layer_type_tests {
    use super::*;

    #[test]
    fn identity_transform_maps_points_to_themselves() {
        let t = Transform::default();
        assert!(t.is_identity());
        assert_eq!(t.inverse_map(12.0, 7.0, 50.0, 50.0), (12.0, 7.0));
    }

    #[test]
    fn translation_is_inverted() {
        let t = Transform {
            translate_x: 10.0,
            translate_y: -5.0,
            ..Transform::default()
        };
        let (x, y) = t.inverse_map(20.0, 20.0, 50.0, 50.0);
        assert!((x - 10.0).abs() < 1e-4 && (y - 25.0).abs() < 1e-4);
    }

    #[test]
    fn scale_is_inverted_around_centre() {
        let t = Transform {
            scale: 2.0,
            ..Transform::default()
        };
        let (x, y) = t.inverse_map(70.0, 50.0, 50.0, 50.0);
        assert!((x - 60.0).abs() < 1e-4 && (y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn sanitized_transform_is_usable() {
        let t = Transform {
            scale: 0.0,
            rotation_degrees: -90.0,
            translate_x: f32::NAN,
            ..Transform::default()
        }
        .sanitized();
        assert_eq!(t.scale, 0.01);
        assert_eq!(t.rotation_degrees, 270.0);
        assert_eq!(t.translate_x, 0.0);
    }

    #[test]
    fn layer_id_displays_with_prefix() {
        assert_eq!(LayerId(7).to_string(), "layer-7");
    }
}
