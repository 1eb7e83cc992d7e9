//! Export/import and storage save data for the layer stack
//!
//! Both directions go through `ExportedLayer`. Import validates and builds
//! the complete replacement stack before touching the live one, so a bad
//! payload leaves the session unchanged.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::{ImageFormat, RgbaImage};
use sha2::{Digest, Sha256};

use super::composite::Compositor;
use super::stack::{rebuild_surface, LayerStack, MAX_LAYERS};
use super::surface::SurfaceBudget;
use super::{Layer, LayerId, LayerProperties, LayerType, Stroke, StrokeId};
use crate::brush::MAX_BRUSH_SIZE;
use crate::core::contracts::{
    ExportedGroup, ExportedLayer, ExportedStroke, LayerExport, LayerSaveData, LAYER_PAYLOAD_VERSION,
};
use crate::core::errors::CoreError;

/// Encode an RGBA image as base64 PNG, returning (blob, content hash)
pub fn encode_png_blob(image: &RgbaImage) -> Result<(String, String), CoreError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    let bytes = buf.into_inner();
    let hash = hex::encode(Sha256::digest(&bytes));
    Ok((BASE64.encode(bytes), hash))
}

/// Decode a base64 PNG blob, verifying its content hash when present
pub fn decode_png_blob(data: &str, expected_hash: Option<&str>) -> Result<RgbaImage, CoreError> {
    let data = data.strip_prefix("data:image/png;base64,").unwrap_or(data);
    let bytes = BASE64.decode(data)?;
    if let Some(expected) = expected_hash {
        let actual = hex::encode(Sha256::digest(&bytes));
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(CoreError::InvalidImport(format!(
                "Content hash mismatch: expected {}, got {}",
                expected, actual
            )));
        }
    }
    let image = image::load_from_memory_with_format(&bytes, ImageFormat::Png)?;
    Ok(image.to_rgba8())
}

fn stroke_to_dto(stroke: &Stroke) -> ExportedStroke {
    ExportedStroke {
        id: stroke.id.0,
        points: stroke.points.clone(),
        brush_id: stroke.brush_id.clone(),
        base_color: stroke.base_color,
        size: stroke.size,
        opacity: stroke.opacity,
        blend_mode: stroke.blend_mode,
        dabs: stroke.dabs.clone(),
        baked: stroke.baked,
    }
}

fn layer_to_dto(layer: &Layer) -> Result<ExportedLayer, CoreError> {
    let (image_data, content_hash) = if layer.is_group() {
        (None, None)
    } else {
        let (blob, hash) = encode_png_blob(&layer.base)?;
        (Some(blob), Some(hash))
    };
    Ok(ExportedLayer {
        id: layer.id.0,
        name: layer.name.clone(),
        layer_type: layer.layer_type,
        visible: layer.visible,
        locked: layer.locked,
        opacity: layer.opacity,
        blend_mode: layer.blend_mode,
        clipping_mask_of: layer.clipping_mask_of.map(|id| id.0),
        parent: layer.parent.map(|id| id.0),
        transform: layer.transform,
        image_data,
        content_hash,
        strokes: layer.strokes.iter().map(stroke_to_dto).collect(),
    })
}

/// Owned copy of a layer stack, ready to encode on another thread
#[derive(Debug, Clone)]
pub struct StackSnapshot {
    width: u32,
    height: u32,
    layers: Vec<Layer>,
    order: Vec<LayerId>,
    active: LayerId,
}

impl StackSnapshot {
    pub fn to_save_data(&self) -> Result<LayerSaveData, CoreError> {
        save_data_from(
            self.width,
            self.height,
            self.layers.iter(),
            &self.order,
            self.active,
        )
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}

fn save_data_from<'a>(
    width: u32,
    height: u32,
    layers: impl Iterator<Item = &'a Layer>,
    order: &[LayerId],
    active: LayerId,
) -> Result<LayerSaveData, CoreError> {
    let layers = layers.map(layer_to_dto).collect::<Result<Vec<_>, _>>()?;
    Ok(LayerSaveData {
        version: LAYER_PAYLOAD_VERSION,
        canvas_width: width,
        canvas_height: height,
        layers,
        order: order.iter().map(|id| id.0).collect(),
        current_layer_id: Some(active.0),
    })
}

/// Fully built replacement for the live stack contents
struct Replacement {
    width: u32,
    height: u32,
    layers: HashMap<LayerId, Layer>,
    order: Vec<LayerId>,
    active: LayerId,
    next_layer_id: u64,
    next_stroke_id: u64,
    budget: SurfaceBudget,
}

impl LayerStack {
    /// Export every layer with inline image data
    pub fn export_all(&self) -> Result<LayerExport, CoreError> {
        let mut layers = Vec::new();
        let mut groups = Vec::new();
        for layer in self.layers_in_order() {
            if layer.is_group() {
                groups.push(ExportedGroup {
                    id: layer.id.0,
                    name: layer.name.clone(),
                    visible: layer.visible,
                    locked: layer.locked,
                    opacity: layer.opacity,
                    blend_mode: layer.blend_mode,
                });
            } else {
                layers.push(layer_to_dto(layer)?);
            }
        }
        tracing::info!(
            "[LayerStack] Exported {} layers and {} groups",
            layers.len(),
            groups.len()
        );
        Ok(LayerExport {
            version: LAYER_PAYLOAD_VERSION,
            canvas_width: self.width,
            canvas_height: self.height,
            layers,
            groups,
            order: self.order.iter().map(|id| id.0).collect(),
            active_layer_id: Some(self.active.0),
        })
    }

    /// Replace the stack with an exported payload; fails atomically
    pub fn import_all(&mut self, data: &LayerExport) -> Result<(), CoreError> {
        let mut layers = data.layers.clone();
        layers.extend(data.groups.iter().cloned().map(ExportedGroup::into_layer));
        let replacement = self.build_replacement(
            data.version,
            data.canvas_width,
            data.canvas_height,
            &layers,
            &data.order,
            data.active_layer_id,
        );
        self.finish_replacement("import", replacement)
    }

    /// Snapshot for the storage collaborator
    pub fn to_save_data(&self) -> Result<LayerSaveData, CoreError> {
        save_data_from(
            self.width,
            self.height,
            self.layers_in_order(),
            &self.order,
            self.active,
        )
    }

    /// Detached copy of the pixel and stroke state, encoded later off-thread
    pub fn snapshot(&self) -> StackSnapshot {
        StackSnapshot {
            width: self.width,
            height: self.height,
            layers: self.layers_in_order().cloned().collect(),
            order: self.order.clone(),
            active: self.active,
        }
    }

    /// Restore from storage; fails atomically
    pub fn restore_save_data(&mut self, data: &LayerSaveData) -> Result<(), CoreError> {
        let replacement = self.build_replacement(
            data.version,
            data.canvas_width,
            data.canvas_height,
            &data.layers,
            &data.order,
            data.current_layer_id,
        );
        self.finish_replacement("restore", replacement)
    }

    fn finish_replacement(
        &mut self,
        what: &str,
        replacement: Result<Replacement, CoreError>,
    ) -> Result<(), CoreError> {
        let replacement = match replacement {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("[LayerStack] Rejected {} payload: {}", what, e);
                return Err(e);
            }
        };
        self.width = replacement.width;
        self.height = replacement.height;
        self.layers = replacement.layers;
        self.order = replacement.order;
        self.active = replacement.active;
        self.next_layer_id = replacement.next_layer_id;
        self.next_stroke_id = replacement.next_stroke_id;
        self.budget = replacement.budget;
        self.compositor = Compositor::new(self.width, self.height);
        self.history.clear();
        tracing::info!(
            "[LayerStack] {} replaced stack with {} layers",
            what,
            self.layers.len()
        );
        Ok(())
    }

    fn build_replacement(
        &mut self,
        version: u32,
        width: u32,
        height: u32,
        layers: &[ExportedLayer],
        order: &[u64],
        active: Option<u64>,
    ) -> Result<Replacement, CoreError> {
        if version != LAYER_PAYLOAD_VERSION {
            return Err(CoreError::UnsupportedVersion(version));
        }
        if width == 0 || height == 0 {
            return Err(CoreError::InvalidImport(format!(
                "Canvas size {}x{} is empty",
                width, height
            )));
        }
        if layers.len() > MAX_LAYERS {
            return Err(CoreError::LayerLimit { max: MAX_LAYERS });
        }

        let by_id: HashMap<u64, &ExportedLayer> = layers.iter().map(|l| (l.id, l)).collect();
        if by_id.len() != layers.len() || by_id.contains_key(&0) {
            return Err(CoreError::InvalidImport("Duplicate or zero layer id".into()));
        }
        let order_set: HashSet<u64> = order.iter().copied().collect();
        if order_set.len() != order.len()
            || order.len() != layers.len()
            || !order.iter().all(|id| by_id.contains_key(id))
        {
            return Err(CoreError::InvalidImport(
                "Layer order does not list every layer exactly once".into(),
            ));
        }
        if !layers.iter().any(|l| l.layer_type == LayerType::Raster) {
            return Err(CoreError::InvalidImport("No raster layer".into()));
        }

        let position: HashMap<u64, usize> = order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        for layer in layers {
            if let Some(base) = layer.clipping_mask_of {
                let valid = by_id.get(&base).is_some_and(|b| {
                    b.layer_type == LayerType::Raster
                        && b.clipping_mask_of.is_none()
                        && position[&base] < position[&layer.id]
                });
                if !valid || layer.layer_type == LayerType::Group {
                    return Err(CoreError::InvalidImport(format!(
                        "Layer {} has an invalid clipping base {}",
                        layer.id, base
                    )));
                }
            }
            if let Some(parent) = layer.parent {
                let valid = by_id
                    .get(&parent)
                    .is_some_and(|g| g.layer_type == LayerType::Group);
                if !valid || layer.layer_type == LayerType::Group {
                    return Err(CoreError::InvalidImport(format!(
                        "Layer {} has an invalid group {}",
                        layer.id, parent
                    )));
                }
            }
        }

        let mut budget = SurfaceBudget::new(self.budget.limit());
        let mut built = HashMap::with_capacity(layers.len());
        let mut strokes = StrokeIds {
            seen: HashSet::new(),
            next: 1,
        };
        for dto in layers {
            let layer = build_layer(dto, width, height, &mut budget, &mut strokes)?;
            built.insert(layer.id, layer);
        }
        // Surfaces render only once the whole payload has proven valid
        for layer in built.values_mut() {
            rebuild_surface(layer, &mut self.stamps);
        }

        let order: Vec<LayerId> = order.iter().map(|id| LayerId(*id)).collect();
        let is_raster = |id: &LayerId| built.get(id).is_some_and(|l: &Layer| !l.is_group());
        let active = active
            .map(LayerId)
            .filter(|id| is_raster(id))
            .or_else(|| order.iter().rev().copied().find(|id| is_raster(id)))
            .ok_or_else(|| CoreError::InvalidImport("No raster layer".into()))?;
        let next_layer_id = layers.iter().map(|l| l.id).max().unwrap_or(0) + 1;

        Ok(Replacement {
            width,
            height,
            layers: built,
            order,
            active,
            next_layer_id,
            next_stroke_id: strokes.next,
            budget,
        })
    }
}

fn build_layer(
    dto: &ExportedLayer,
    width: u32,
    height: u32,
    budget: &mut SurfaceBudget,
    strokes: &mut StrokeIds,
) -> Result<Layer, CoreError> {
    let id = LayerId(dto.id);
    let (base, surface) = match dto.layer_type {
        LayerType::Group => (RgbaImage::new(0, 0), RgbaImage::new(0, 0)),
        LayerType::Raster => {
            let mut base = budget.allocate(width, height)?;
            if let Some(data) = &dto.image_data {
                let decoded = decode_png_blob(data, dto.content_hash.as_deref())?;
                if decoded.dimensions() != (width, height) {
                    return Err(CoreError::InvalidImport(format!(
                        "Layer {} image is {}x{}, canvas is {}x{}",
                        dto.id,
                        decoded.width(),
                        decoded.height(),
                        width,
                        height
                    )));
                }
                base.copy_from_slice(decoded.as_raw());
            }
            let surface = budget.allocate(width, height)?;
            (base, surface)
        }
    };

    let mut layer = Layer::new(id, dto.name.clone(), dto.layer_type, base, surface);
    layer.apply_properties(&LayerProperties {
        name: dto.name.clone(),
        visible: dto.visible,
        locked: dto.locked,
        opacity: if dto.opacity.is_finite() { dto.opacity } else { 1.0 },
        blend_mode: dto.blend_mode,
        clipping_mask_of: dto.clipping_mask_of.map(LayerId),
        parent: dto.parent.map(LayerId),
        transform: dto.transform.sanitized(),
    });
    if !layer.is_group() {
        layer.strokes = dto
            .strokes
            .iter()
            .map(|s| build_stroke(s, id, strokes))
            .collect::<Result<_, _>>()?;
    }
    Ok(layer)
}

/// Stroke ids seen so far in a payload and the next free id
struct StrokeIds {
    seen: HashSet<u64>,
    next: u64,
}

fn build_stroke(s: &ExportedStroke, layer: LayerId, ids: &mut StrokeIds) -> Result<Stroke, CoreError> {
    let next = s
        .id
        .checked_add(1)
        .ok_or_else(|| CoreError::InvalidImport(format!("Stroke id {} is out of range", s.id)))?;
    if s.id == 0 || !ids.seen.insert(s.id) {
        return Err(CoreError::InvalidImport(format!(
            "Stroke id {} is zero or duplicated",
            s.id
        )));
    }
    // Dab sizes drive stamp allocation, so they are checked before any rendering
    let bad_dab = s.dabs.iter().any(|dab| {
        !dab.x.is_finite()
            || !dab.y.is_finite()
            || !dab.paint.size.is_finite()
            || dab.paint.size < 0.0
            || dab.paint.size > MAX_BRUSH_SIZE
    });
    if bad_dab {
        return Err(CoreError::InvalidImport(format!(
            "Stroke {} has a dab outside 0..={} px",
            s.id, MAX_BRUSH_SIZE
        )));
    }
    ids.next = ids.next.max(next);
    Ok(Stroke {
        id: StrokeId(s.id),
        layer_id: layer,
        points: s.points.clone(),
        brush_id: s.brush_id.clone(),
        base_color: s.base_color,
        size: s.size,
        opacity: s.opacity,
        blend_mode: s.blend_mode,
        dabs: s.dabs.clone(),
        baked: s.baked,
    })
}
