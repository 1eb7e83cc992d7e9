//! Layer stack manager
//!
//! Owns the layers, their order and the undo history. Expected failures
//! (unknown ids, locked layers, history boundaries) return `false`/`None`;
//! capacity and allocation failures return `CoreError`. A failed operation
//! never records history.

use std::collections::HashMap;

use image::RgbaImage;

use super::composite::{sample, Compositor};
use super::history::{History, HistoryEntry, HistoryKind, LayerRecord, PixelPatch, PixelSnapshot};
use super::surface::{dab_bounds, render_stroke, SurfaceBudget};
use super::{blend, Layer, LayerId, LayerProperties, LayerType, Stroke, StrokeId, Transform};
use crate::brush::{BlendMode, StampCache};
use crate::core::errors::CoreError;

/// Maximum number of layers (groups included)
pub const MAX_LAYERS: usize = 999;

/// Default surface memory budget (1 GiB)
pub const DEFAULT_SURFACE_BUDGET: u64 = 1 << 30;

pub struct LayerStack {
    pub(super) width: u32,
    pub(super) height: u32,
    pub(super) layers: HashMap<LayerId, Layer>,
    /// Bottom to top
    pub(super) order: Vec<LayerId>,
    pub(super) active: LayerId,
    pub(super) next_layer_id: u64,
    pub(super) next_stroke_id: u64,
    pub(super) history: History,
    pub(super) compositor: Compositor,
    pub(super) stamps: StampCache,
    pub(super) budget: SurfaceBudget,
}

/// Re-render `layer.surface` from its base and live strokes
pub(super) fn rebuild_surface(layer: &mut Layer, stamps: &mut StampCache) {
    if layer.is_group() {
        return;
    }
    layer.surface.clone_from(&layer.base);
    for stroke in layer.strokes.iter().filter(|s| !s.baked) {
        render_stroke(&mut layer.surface, stroke, stamps);
    }
}

impl LayerStack {
    /// Stack with one empty raster layer
    pub fn new(width: u32, height: u32) -> Result<Self, CoreError> {
        Self::with_budget(width, height, DEFAULT_SURFACE_BUDGET)
    }

    pub fn with_budget(width: u32, height: u32, budget_bytes: u64) -> Result<Self, CoreError> {
        if width == 0 || height == 0 {
            return Err(CoreError::InvalidInput(format!(
                "Canvas size {}x{} is empty",
                width, height
            )));
        }
        let mut stack = Self {
            width,
            height,
            layers: HashMap::new(),
            order: Vec::new(),
            active: LayerId(1),
            next_layer_id: 1,
            next_stroke_id: 1,
            history: History::default(),
            compositor: Compositor::new(width, height),
            stamps: StampCache::default(),
            budget: SurfaceBudget::new(budget_bytes),
        };
        let id = stack.alloc_layer_id();
        let layer = stack.new_layer(id, "Layer 1".to_string(), LayerType::Raster)?;
        stack.layers.insert(id, layer);
        stack.order.push(id);
        stack.active = id;
        tracing::info!("[LayerStack] Created {}x{} canvas", width, height);
        Ok(stack)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    /// Layer ids bottom to top
    pub fn layer_order(&self) -> &[LayerId] {
        &self.order
    }

    pub fn layers_in_order(&self) -> impl Iterator<Item = &Layer> {
        self.order.iter().filter_map(|id| self.layers.get(id))
    }

    pub fn active_layer_id(&self) -> LayerId {
        self.active
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.layers.get(&self.active)
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.order.iter().position(|l| *l == id)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Kind of the entry the next `undo` would revert
    pub fn last_action(&self) -> Option<HistoryKind> {
        self.history.undo_target().map(HistoryEntry::kind)
    }

    pub fn surface_bytes(&self) -> u64 {
        self.budget.used()
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn stamps_mut(&mut self) -> &mut StampCache {
        &mut self.stamps
    }

    fn raster_count(&self) -> usize {
        self.layers.values().filter(|l| !l.is_group()).count()
    }

    // ========================================================================
    // Structure
    // ========================================================================

    pub fn set_active_layer(&mut self, id: LayerId) -> bool {
        match self.layers.get(&id) {
            Some(layer) if !layer.is_group() => {
                self.active = id;
                true
            }
            _ => false,
        }
    }

    /// Create a raster layer above the active layer and make it active
    pub fn create_layer(&mut self, name: Option<&str>) -> Result<LayerId, CoreError> {
        self.ensure_capacity()?;
        let id = self.alloc_layer_id();
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("Layer {}", id.0));
        let layer = self.new_layer(id, name, LayerType::Raster)?;
        let index = self.index_of(self.active).map_or(self.order.len(), |i| i + 1);
        Ok(self.insert_created(layer, index))
    }

    /// Create an empty group at the top of the stack
    pub fn create_group(&mut self, name: Option<&str>) -> Result<LayerId, CoreError> {
        self.ensure_capacity()?;
        let id = self.alloc_layer_id();
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("Group {}", id.0));
        let layer = self.new_layer(id, name, LayerType::Group)?;
        let previous_active = self.active;
        let index = self.order.len();
        self.history.push(HistoryEntry::Create {
            record: LayerRecord::capture(&layer),
            index,
            previous_active,
        });
        self.layers.insert(id, layer);
        self.order.insert(index, id);
        tracing::info!("[LayerStack] Created group {}", id);
        Ok(id)
    }

    /// Copy a raster layer (pixels, strokes, properties) directly above it
    pub fn duplicate_layer(&mut self, id: LayerId) -> Result<Option<LayerId>, CoreError> {
        let Some(source) = self.layers.get(&id) else {
            return Ok(None);
        };
        if source.is_group() {
            return Ok(None);
        }
        self.ensure_capacity()?;
        let source_props = source.properties();
        let source_strokes = source.strokes.clone();
        let source_base = source.base.clone();
        let source_surface = source.surface.clone();

        let new_id = self.alloc_layer_id();
        let mut layer = self.new_layer(
            new_id,
            format!("{} copy", source_props.name),
            LayerType::Raster,
        )?;
        let props = LayerProperties {
            name: layer.name.clone(),
            ..source_props
        };
        layer.apply_properties(&props);
        layer.base = source_base;
        layer.surface = source_surface;
        layer.strokes = source_strokes
            .into_iter()
            .map(|mut s| {
                s.id = self.alloc_stroke_id();
                s.layer_id = new_id;
                s
            })
            .collect();

        let index = self.index_of(id).map_or(self.order.len(), |i| i + 1);
        Ok(Some(self.insert_created(layer, index)))
    }

    /// Delete a layer; refuses to remove the last raster layer
    pub fn delete_layer(&mut self, id: LayerId) -> bool {
        let Some(layer) = self.layers.get(&id) else {
            return false;
        };
        if !layer.is_group() && self.raster_count() <= 1 {
            tracing::debug!("[LayerStack] Refusing to delete the last layer {}", id);
            return false;
        }
        let record = LayerRecord::capture(layer);
        let was_active = self.active == id;
        let Some((index, released_clips, released_children)) = self.detach_and_remove(id) else {
            return false;
        };
        self.history.push(HistoryEntry::Delete {
            record,
            index,
            released_clips,
            released_children,
            was_active,
        });
        tracing::info!("[LayerStack] Deleted {}", id);
        true
    }

    /// Move the layer at `from` to position `to` (bottom-based indices)
    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        if from >= self.order.len() || to >= self.order.len() || from == to {
            return false;
        }
        let mut candidate = self.order.clone();
        let id = candidate.remove(from);
        candidate.insert(to, id);
        if !self.clipping_valid_for(&candidate) {
            tracing::debug!("[LayerStack] Reorder {} -> {} would orphan a clipping mask", from, to);
            return false;
        }
        self.order = candidate;
        self.compositor.invalidate_all();
        self.history.push(HistoryEntry::Reorder { from, to });
        true
    }

    /// Merge a raster layer into the raster layer directly below it
    pub fn merge_down(&mut self, id: LayerId) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        if index == 0 {
            return false;
        }
        let lower_id = self.order[index - 1];
        let (Some(upper), Some(lower)) = (self.layers.get(&id), self.layers.get(&lower_id)) else {
            return false;
        };
        if upper.is_group() || lower.is_group() || upper.locked || lower.locked {
            return false;
        }
        if !lower.transform.is_identity() {
            tracing::debug!("[LayerStack] Merge target {} is transformed", lower_id);
            return false;
        }

        let upper_record = LayerRecord::capture(upper);
        let lower_base = PixelSnapshot::capture(&lower.base);
        let lower_strokes = lower.strokes.clone();
        let was_active = self.active == id;

        let released_clips = self.merge_layers(id, lower_id);
        self.history.push(HistoryEntry::Merge {
            upper: upper_record,
            upper_index: index,
            lower_id,
            lower_base,
            lower_strokes,
            released_clips,
            was_active,
        });
        tracing::info!("[LayerStack] Merged {} into {}", id, lower_id);
        true
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Opacity is clamped to [0, 1]; non-finite values are rejected
    pub fn set_opacity(&mut self, id: LayerId, opacity: f32) -> bool {
        if !opacity.is_finite() {
            return false;
        }
        self.change_properties(id, |p| p.opacity = opacity.clamp(0.0, 1.0))
    }

    pub fn set_blend_mode(&mut self, id: LayerId, mode: BlendMode) -> bool {
        self.change_properties(id, |p| p.blend_mode = mode)
    }

    pub fn set_visibility(&mut self, id: LayerId, visible: bool) -> bool {
        self.change_properties(id, |p| p.visible = visible)
    }

    pub fn set_locked(&mut self, id: LayerId, locked: bool) -> bool {
        self.change_properties(id, |p| p.locked = locked)
    }

    pub fn rename(&mut self, id: LayerId, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.change_properties(id, |p| p.name = name.to_string())
    }

    pub fn set_transform(&mut self, id: LayerId, transform: Transform) -> bool {
        if self.layers.get(&id).map_or(true, Layer::is_group) {
            return false;
        }
        let transform = transform.sanitized();
        self.change_properties(id, |p| p.transform = transform)
    }

    /// Clip `id` to `base`, or release it with `None`
    ///
    /// The base must sit below the layer and must not itself be a clipping
    /// mask; a layer that other layers clip to cannot become a mask.
    pub fn set_clipping_mask(&mut self, id: LayerId, base: Option<LayerId>) -> bool {
        let Some(layer) = self.layers.get(&id) else {
            return false;
        };
        if let Some(base_id) = base {
            let Some(base_layer) = self.layers.get(&base_id) else {
                return false;
            };
            let (Some(layer_index), Some(base_index)) = (self.index_of(id), self.index_of(base_id))
            else {
                return false;
            };
            let is_base_of_others = self
                .layers
                .values()
                .any(|l| l.clipping_mask_of == Some(id));
            if layer.is_group()
                || base_layer.is_group()
                || base_layer.is_clipping()
                || base_index >= layer_index
                || is_base_of_others
            {
                return false;
            }
        }
        self.change_properties(id, |p| p.clipping_mask_of = base)
    }

    /// Put a raster layer into `group`, or take it out with `None`
    pub fn set_layer_group(&mut self, id: LayerId, group: Option<LayerId>) -> bool {
        match self.layers.get(&id) {
            Some(layer) if !layer.is_group() => {}
            _ => return false,
        }
        if let Some(group_id) = group {
            if !self.layers.get(&group_id).is_some_and(Layer::is_group) {
                return false;
            }
        }
        self.change_properties(id, |p| p.parent = group)
    }

    fn change_properties<F: FnOnce(&mut LayerProperties)>(&mut self, id: LayerId, edit: F) -> bool {
        let Some(layer) = self.layers.get(&id) else {
            return false;
        };
        let before = layer.properties();
        let mut after = before.clone();
        edit(&mut after);
        if after == before {
            return true;
        }
        self.apply_properties(id, &after);
        self.history.push(HistoryEntry::PropertyChange {
            layer_id: id,
            before,
            after,
        });
        true
    }

    fn apply_properties(&mut self, id: LayerId, props: &LayerProperties) {
        let Some(layer) = self.layers.get_mut(&id) else {
            return;
        };
        let order_affects_others = layer.clipping_mask_of != props.clipping_mask_of;
        layer.apply_properties(props);
        let hidden = !layer.visible;

        if order_affects_others {
            self.compositor.invalidate_all();
        } else {
            self.compositor.invalidate(id, &self.order, &self.layers);
        }
        if hidden {
            self.compositor.prune(id);
        }
    }

    // ========================================================================
    // Pixels
    // ========================================================================

    /// Commit a finished stroke to a raster layer
    pub fn add_stroke(&mut self, layer_id: LayerId, mut stroke: Stroke) -> Option<StrokeId> {
        match self.layers.get(&layer_id) {
            Some(layer) if !layer.is_group() && !layer.locked => {}
            _ => return None,
        }
        stroke.id = self.alloc_stroke_id();
        stroke.layer_id = layer_id;
        stroke.baked = false;
        let (width, height) = (self.width, self.height);

        let layer = self.layers.get_mut(&layer_id)?;
        let patch = PixelPatch::capture(&layer.surface, dab_bounds(&stroke.dabs, width, height));
        render_stroke(&mut layer.surface, &stroke, &mut self.stamps);
        layer.strokes.push(stroke.clone());
        let id = stroke.id;

        self.compositor.invalidate(layer_id, &self.order, &self.layers);
        self.history.push(HistoryEntry::StrokeAdd {
            layer_id,
            stroke,
            patch,
        });
        tracing::debug!("[LayerStack] Stroke {:?} added to {}", id, layer_id);
        Some(id)
    }

    /// Remove a live stroke; baked strokes and locked layers refuse
    pub fn remove_stroke(&mut self, layer_id: LayerId, stroke_id: StrokeId) -> bool {
        let Some(layer) = self.layers.get_mut(&layer_id) else {
            return false;
        };
        if layer.locked {
            return false;
        }
        let Some(index) = layer.strokes.iter().position(|s| s.id == stroke_id) else {
            return false;
        };
        if layer.strokes[index].baked {
            return false;
        }
        let stroke = layer.strokes.remove(index);
        rebuild_surface(layer, &mut self.stamps);
        self.compositor.invalidate(layer_id, &self.order, &self.layers);
        self.history.push(HistoryEntry::StrokeRemove {
            layer_id,
            index,
            stroke,
        });
        true
    }

    /// Erase all pixels and strokes of a raster layer
    pub fn clear_layer(&mut self, id: LayerId) -> bool {
        let Some(layer) = self.layers.get_mut(&id) else {
            return false;
        };
        if layer.is_group() || layer.locked {
            return false;
        }
        let base = PixelSnapshot::capture(&layer.base);
        let strokes = std::mem::take(&mut layer.strokes);
        clear_pixels(layer);
        self.compositor.invalidate(id, &self.order, &self.layers);
        self.history.push(HistoryEntry::Clear {
            layer_id: id,
            base,
            strokes,
        });
        true
    }

    // ========================================================================
    // History
    // ========================================================================

    pub fn undo(&mut self) -> bool {
        let mut history = std::mem::take(&mut self.history);
        let outcome = history.undo_target().map(|entry| (entry.kind(), self.revert(entry)));
        let done = match outcome {
            Some((kind, Ok(()))) => {
                history.step_back();
                tracing::debug!("[LayerStack] Undo {:?}", kind);
                true
            }
            Some((kind, Err(e))) => {
                tracing::error!("[LayerStack] Undo {:?} failed: {}", kind, e);
                false
            }
            None => false,
        };
        self.history = history;
        done
    }

    pub fn redo(&mut self) -> bool {
        let mut history = std::mem::take(&mut self.history);
        let outcome = history.redo_target().map(|entry| (entry.kind(), self.reapply(entry)));
        let done = match outcome {
            Some((kind, Ok(()))) => {
                history.step_forward();
                tracing::debug!("[LayerStack] Redo {:?}", kind);
                true
            }
            Some((kind, Err(e))) => {
                tracing::error!("[LayerStack] Redo {:?} failed: {}", kind, e);
                false
            }
            None => false,
        };
        self.history = history;
        done
    }

    fn revert(&mut self, entry: &HistoryEntry) -> Result<(), CoreError> {
        match entry {
            HistoryEntry::Create {
                record,
                previous_active,
                ..
            } => {
                self.detach_and_remove(record.id)
                    .ok_or_else(|| missing(record.id))?;
                if self.layers.contains_key(previous_active) {
                    self.active = *previous_active;
                }
            }
            HistoryEntry::Delete {
                record,
                index,
                released_clips,
                released_children,
                was_active,
            } => {
                self.insert_record(record, *index)?;
                self.relink(record.id, released_clips, released_children);
                if *was_active {
                    self.active = record.id;
                }
            }
            HistoryEntry::PropertyChange {
                layer_id, before, ..
            } => {
                self.layers.get(layer_id).ok_or_else(|| missing(*layer_id))?;
                self.apply_properties(*layer_id, before);
            }
            HistoryEntry::StrokeAdd {
                layer_id,
                stroke,
                patch,
            } => {
                let layer = self.layers.get_mut(layer_id).ok_or_else(|| missing(*layer_id))?;
                if layer.strokes.last().map(|s| s.id) != Some(stroke.id) {
                    return Err(CoreError::InvalidInput(format!(
                        "Stroke {:?} is not the newest on {}",
                        stroke.id, layer_id
                    )));
                }
                patch.apply(&mut layer.surface)?;
                layer.strokes.pop();
                self.compositor.invalidate(*layer_id, &self.order, &self.layers);
            }
            HistoryEntry::StrokeRemove {
                layer_id,
                index,
                stroke,
            } => {
                let layer = self.layers.get_mut(layer_id).ok_or_else(|| missing(*layer_id))?;
                let index = (*index).min(layer.strokes.len());
                layer.strokes.insert(index, stroke.clone());
                rebuild_surface(layer, &mut self.stamps);
                self.compositor.invalidate(*layer_id, &self.order, &self.layers);
            }
            HistoryEntry::Merge {
                upper,
                upper_index,
                lower_id,
                lower_base,
                lower_strokes,
                released_clips,
                was_active,
            } => {
                let base = lower_base.restore()?;
                let lower = self.layers.get_mut(lower_id).ok_or_else(|| missing(*lower_id))?;
                lower.base = base;
                lower.strokes = lower_strokes.clone();
                rebuild_surface(lower, &mut self.stamps);
                self.insert_record(upper, *upper_index)?;
                self.relink(upper.id, released_clips, &[]);
                if *was_active {
                    self.active = upper.id;
                }
            }
            HistoryEntry::Reorder { from, to } => {
                self.move_in_order(*to, *from);
            }
            HistoryEntry::Clear {
                layer_id,
                base,
                strokes,
            } => {
                let base = base.restore()?;
                let layer = self.layers.get_mut(layer_id).ok_or_else(|| missing(*layer_id))?;
                layer.base = base;
                layer.strokes = strokes.clone();
                rebuild_surface(layer, &mut self.stamps);
                self.compositor.invalidate(*layer_id, &self.order, &self.layers);
            }
        }
        Ok(())
    }

    fn reapply(&mut self, entry: &HistoryEntry) -> Result<(), CoreError> {
        match entry {
            HistoryEntry::Create { record, index, .. } => {
                self.insert_record(record, *index)?;
                if record.layer_type == LayerType::Raster {
                    self.active = record.id;
                }
            }
            HistoryEntry::Delete { record, .. } => {
                self.detach_and_remove(record.id)
                    .ok_or_else(|| missing(record.id))?;
            }
            HistoryEntry::PropertyChange {
                layer_id, after, ..
            } => {
                self.layers.get(layer_id).ok_or_else(|| missing(*layer_id))?;
                self.apply_properties(*layer_id, after);
            }
            HistoryEntry::StrokeAdd {
                layer_id, stroke, ..
            } => {
                let layer = self.layers.get_mut(layer_id).ok_or_else(|| missing(*layer_id))?;
                render_stroke(&mut layer.surface, stroke, &mut self.stamps);
                layer.strokes.push(stroke.clone());
                self.compositor.invalidate(*layer_id, &self.order, &self.layers);
            }
            HistoryEntry::StrokeRemove {
                layer_id, stroke, ..
            } => {
                let layer = self.layers.get_mut(layer_id).ok_or_else(|| missing(*layer_id))?;
                let before = layer.strokes.len();
                layer.strokes.retain(|s| s.id != stroke.id);
                if layer.strokes.len() == before {
                    return Err(CoreError::InvalidInput(format!(
                        "Stroke {:?} missing from {}",
                        stroke.id, layer_id
                    )));
                }
                rebuild_surface(layer, &mut self.stamps);
                self.compositor.invalidate(*layer_id, &self.order, &self.layers);
            }
            HistoryEntry::Merge {
                upper, lower_id, ..
            } => {
                if !self.layers.contains_key(&upper.id) || !self.layers.contains_key(lower_id) {
                    return Err(missing(upper.id));
                }
                self.merge_layers(upper.id, *lower_id);
            }
            HistoryEntry::Reorder { from, to } => {
                self.move_in_order(*from, *to);
            }
            HistoryEntry::Clear { layer_id, .. } => {
                let layer = self.layers.get_mut(layer_id).ok_or_else(|| missing(*layer_id))?;
                layer.strokes.clear();
                clear_pixels(layer);
                self.compositor.invalidate(*layer_id, &self.order, &self.layers);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Rendering and resources
    // ========================================================================

    /// Composite all visible layers
    pub fn composite(&mut self) -> &RgbaImage {
        self.compositor.composite(&self.order, &self.layers)
    }

    /// Drop caches that can be rebuilt on demand
    pub fn handle_memory_pressure(&mut self) {
        tracing::warn!("[LayerStack] Memory pressure: dropping composite and stamp caches");
        self.compositor.clear();
        self.stamps.clear();
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_capacity(&self) -> Result<(), CoreError> {
        if self.layers.len() >= MAX_LAYERS {
            tracing::warn!("[LayerStack] Layer limit {} reached", MAX_LAYERS);
            return Err(CoreError::LayerLimit { max: MAX_LAYERS });
        }
        Ok(())
    }

    fn alloc_layer_id(&mut self) -> LayerId {
        let id = LayerId(self.next_layer_id);
        self.next_layer_id += 1;
        id
    }

    pub(super) fn alloc_stroke_id(&mut self) -> StrokeId {
        let id = StrokeId(self.next_stroke_id);
        self.next_stroke_id += 1;
        id
    }

    /// Allocate pixel buffers for a new layer; groups get none
    fn new_layer(&mut self, id: LayerId, name: String, layer_type: LayerType) -> Result<Layer, CoreError> {
        if layer_type == LayerType::Group {
            return Ok(Layer::new(
                id,
                name,
                layer_type,
                RgbaImage::new(0, 0),
                RgbaImage::new(0, 0),
            ));
        }
        let base = self.budget.allocate(self.width, self.height)?;
        let surface = match self.budget.allocate(self.width, self.height) {
            Ok(surface) => surface,
            Err(e) => {
                self.budget.release(&base);
                return Err(e);
            }
        };
        Ok(Layer::new(id, name, layer_type, base, surface))
    }

    fn insert_created(&mut self, layer: Layer, index: usize) -> LayerId {
        let id = layer.id;
        let previous_active = self.active;
        let index = index.min(self.order.len());
        self.history.push(HistoryEntry::Create {
            record: LayerRecord::capture(&layer),
            index,
            previous_active,
        });
        self.layers.insert(id, layer);
        self.order.insert(index, id);
        self.active = id;
        self.compositor.invalidate_all();
        tracing::info!("[LayerStack] Created {} at index {}", id, index);
        id
    }

    /// Rebuild a layer from a history record and insert it at `index`
    fn insert_record(&mut self, record: &LayerRecord, index: usize) -> Result<(), CoreError> {
        let base = record.base.restore()?;
        let surface = base.clone();
        let mut layer = Layer::new(
            record.id,
            record.properties.name.clone(),
            record.layer_type,
            base,
            surface,
        );
        layer.apply_properties(&record.properties);
        layer.strokes = record.strokes.clone();
        rebuild_surface(&mut layer, &mut self.stamps);
        self.budget.charge(&layer.base);
        self.budget.charge(&layer.surface);

        let index = index.min(self.order.len());
        self.layers.insert(record.id, layer);
        self.order.insert(index, record.id);
        self.next_layer_id = self.next_layer_id.max(record.id.0 + 1);
        self.compositor.invalidate_all();
        Ok(())
    }

    /// Remove a layer, releasing clipping layers and group children
    ///
    /// Returns (index, released clips, released children).
    fn detach_and_remove(&mut self, id: LayerId) -> Option<(usize, Vec<LayerId>, Vec<LayerId>)> {
        let index = self.index_of(id)?;
        let mut released_clips = Vec::new();
        let mut released_children = Vec::new();
        for layer in self.layers.values_mut() {
            if layer.clipping_mask_of == Some(id) {
                layer.clipping_mask_of = None;
                released_clips.push(layer.id);
            }
            if layer.parent == Some(id) {
                layer.parent = None;
                released_children.push(layer.id);
            }
        }
        released_clips.sort();
        released_children.sort();

        self.order.remove(index);
        if let Some(layer) = self.layers.remove(&id) {
            self.budget.release(&layer.base);
            self.budget.release(&layer.surface);
        }
        self.compositor.prune(id);
        self.compositor.invalidate_all();

        if self.active == id {
            self.active = self.fallback_active(index);
        }
        Some((index, released_clips, released_children))
    }

    /// Nearest raster layer at or below `index`, else above
    fn fallback_active(&self, index: usize) -> LayerId {
        let below = self.order[..index.min(self.order.len())]
            .iter()
            .rev()
            .find(|id| self.layers.get(*id).is_some_and(|l| !l.is_group()));
        let above = self
            .order
            .iter()
            .find(|id| self.layers.get(*id).is_some_and(|l| !l.is_group()));
        below.or(above).copied().unwrap_or(self.active)
    }

    fn relink(&mut self, id: LayerId, clips: &[LayerId], children: &[LayerId]) {
        for clip in clips {
            if let Some(layer) = self.layers.get_mut(clip) {
                layer.clipping_mask_of = Some(id);
            }
        }
        for child in children {
            if let Some(layer) = self.layers.get_mut(child) {
                layer.parent = Some(id);
            }
        }
        self.compositor.invalidate_all();
    }

    fn move_in_order(&mut self, from: usize, to: usize) {
        if from < self.order.len() && to < self.order.len() {
            let id = self.order.remove(from);
            self.order.insert(to, id);
            self.compositor.invalidate_all();
        }
    }

    /// Every clipping layer must sit above its base
    fn clipping_valid_for(&self, order: &[LayerId]) -> bool {
        let position: HashMap<LayerId, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        self.layers.values().all(|layer| match layer.clipping_mask_of {
            Some(base) => match (position.get(&layer.id), position.get(&base)) {
                (Some(l), Some(b)) => b < l,
                _ => false,
            },
            None => true,
        })
    }

    /// Bake `upper` into `lower` and remove it; returns the clips that
    /// targeted `upper`
    fn merge_layers(&mut self, upper_id: LayerId, lower_id: LayerId) -> Vec<LayerId> {
        let (Some(upper), Some(lower)) = (self.layers.get(&upper_id), self.layers.get(&lower_id))
        else {
            return Vec::new();
        };

        let mut merged = lower.surface.clone();
        if upper.visible {
            let clip_base = upper.clipping_mask_of.and_then(|b| self.layers.get(&b));
            for y in 0..self.height {
                for x in 0..self.width {
                    let src = sample(&upper.surface, &upper.transform, x, y);
                    if src[3] == 0 {
                        continue;
                    }
                    let mut alpha = src[3] as f32 / 255.0 * upper.opacity;
                    if let Some(base) = clip_base {
                        alpha *= sample(&base.surface, &base.transform, x, y)[3] as f32 / 255.0;
                    }
                    let color = [
                        src[0] as f32 / 255.0,
                        src[1] as f32 / 255.0,
                        src[2] as f32 / 255.0,
                    ];
                    let dst = merged.get_pixel(x, y).0;
                    merged.put_pixel(
                        x,
                        y,
                        image::Rgba(blend::blend_pixel(dst, color, alpha, upper.blend_mode)),
                    );
                }
            }
        }
        let moved: Vec<Stroke> = upper
            .strokes
            .iter()
            .cloned()
            .map(|mut s| {
                s.layer_id = lower_id;
                s.baked = true;
                s
            })
            .collect();

        if let Some(lower) = self.layers.get_mut(&lower_id) {
            for stroke in lower.strokes.iter_mut() {
                stroke.baked = true;
            }
            lower.strokes.extend(moved);
            lower.surface.clone_from(&merged);
            lower.base = merged;
        }

        let was_active = self.active == upper_id;
        let released = self
            .detach_and_remove(upper_id)
            .map(|(_, clips, _)| clips)
            .unwrap_or_default();
        if was_active {
            self.active = lower_id;
        }
        // Clips on the upper layer now clip to the merged pixels
        let lower_can_be_base = self
            .layers
            .get(&lower_id)
            .is_some_and(|l| !l.is_clipping());
        if lower_can_be_base {
            self.relink(lower_id, &released, &[]);
        }
        released
    }
}

fn clear_pixels(layer: &mut Layer) {
    for byte in layer.base.iter_mut() {
        *byte = 0;
    }
    layer.surface.clone_from(&layer.base);
}

fn missing(id: LayerId) -> CoreError {
    CoreError::InvalidInput(format!("{} no longer exists", id))
}
