//! Compositor with a per-layer cache of prepared images
//!
//! A prepared image is a layer's contribution ready to be composited
//! source-over: transform applied, opacity folded into alpha, clipping
//! applied, and for non-normal modes the colour already blended against the
//! backdrop beneath it. Layers whose preparation depends on what lies below
//! (non-normal blend, clipping) are invalidated when anything under them
//! changes.

use std::collections::HashMap;

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use super::blend;
use super::{Layer, LayerId, Transform};

pub struct Compositor {
    width: u32,
    height: u32,
    prepared: HashMap<LayerId, RgbaImage>,
    frame: RgbaImage,
    frame_valid: bool,
    requests: u64,
    rebuilds: u64,
}

impl Compositor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            prepared: HashMap::new(),
            frame: RgbaImage::new(width, height),
            frame_valid: false,
            requests: 0,
            rebuilds: 0,
        }
    }

    /// Invalidate `changed` and every dependent layer above it
    ///
    /// A group changes what its children contribute, so for a group the
    /// scan starts at its lowest child rather than at the group's own slot.
    pub fn invalidate(
        &mut self,
        changed: LayerId,
        order: &[LayerId],
        layers: &HashMap<LayerId, Layer>,
    ) {
        self.frame_valid = false;
        self.prepared.remove(&changed);

        let is_group = layers.get(&changed).is_some_and(Layer::is_group);
        if is_group {
            // Group opacity and visibility flow into every child
            for layer in layers.values().filter(|l| l.parent == Some(changed)) {
                self.prepared.remove(&layer.id);
            }
        }

        let affected = |id: &LayerId| {
            *id == changed
                || (is_group && layers.get(id).is_some_and(|l| l.parent == Some(changed)))
        };
        let Some(position) = order.iter().position(affected) else {
            return;
        };
        for id in &order[position + 1..] {
            let Some(layer) = layers.get(id) else {
                continue;
            };
            let depends_on_backdrop = !layer.blend_mode.is_normal() || layer.is_clipping();
            if depends_on_backdrop {
                self.prepared.remove(id);
            }
        }
    }

    pub fn invalidate_all(&mut self) {
        self.prepared.clear();
        self.frame_valid = false;
    }

    /// Drop one layer's cache entry (hidden or deleted layers)
    pub fn prune(&mut self, id: LayerId) {
        if self.prepared.remove(&id).is_some() {
            tracing::debug!("[Compositor] Pruned cache for {}", id);
        }
        self.frame_valid = false;
    }

    /// Release every cached image, including the last frame
    pub fn clear(&mut self) {
        let dropped = self.prepared.len();
        self.prepared.clear();
        self.prepared.shrink_to_fit();
        self.frame = RgbaImage::new(self.width, self.height);
        self.frame_valid = false;
        tracing::debug!("[Compositor] Cleared {} cached layers", dropped);
    }

    pub fn is_cached(&self, id: LayerId) -> bool {
        self.prepared.contains_key(&id)
    }

    pub fn cached_layers(&self) -> usize {
        self.prepared.len()
    }

    /// (frames requested, frames actually rebuilt)
    pub fn frame_counts(&self) -> (u64, u64) {
        (self.requests, self.rebuilds)
    }

    /// Composite visible layers bottom to top
    pub fn composite(
        &mut self,
        order: &[LayerId],
        layers: &HashMap<LayerId, Layer>,
    ) -> &RgbaImage {
        self.requests += 1;
        if self.frame_valid {
            return &self.frame;
        }
        self.rebuilds += 1;

        let mut accumulator = RgbaImage::new(self.width, self.height);
        for id in order {
            let Some(layer) = layers.get(id) else {
                continue;
            };
            if layer.is_group() {
                continue;
            }
            if !effectively_visible(layer, layers) || !clip_base_visible(layer, layers) {
                self.prepared.remove(id);
                continue;
            }

            if !self.prepared.contains_key(id) {
                let image = prepare_layer(layer, layers, &accumulator);
                self.prepared.insert(*id, image);
            }
            if let Some(prepared) = self.prepared.get(id) {
                fold_over(&mut accumulator, prepared);
            }
        }

        self.frame = accumulator;
        self.frame_valid = true;
        &self.frame
    }
}

fn effectively_visible(layer: &Layer, layers: &HashMap<LayerId, Layer>) -> bool {
    let group_visible = layer
        .parent
        .and_then(|g| layers.get(&g))
        .map_or(true, |g| g.visible);
    layer.visible && group_visible
}

fn effective_opacity(layer: &Layer, layers: &HashMap<LayerId, Layer>) -> f32 {
    let group_opacity = layer
        .parent
        .and_then(|g| layers.get(&g))
        .map_or(1.0, |g| g.opacity);
    (layer.opacity * group_opacity).clamp(0.0, 1.0)
}

/// A clipping layer is only drawn while its base is
fn clip_base_visible(layer: &Layer, layers: &HashMap<LayerId, Layer>) -> bool {
    match layer.clipping_mask_of {
        Some(base) => layers
            .get(&base)
            .is_some_and(|b| effectively_visible(b, layers)),
        None => true,
    }
}

/// Nearest sample of `image` at canvas pixel (x, y) under `transform`
#[inline]
pub(super) fn sample(image: &RgbaImage, transform: &Transform, x: u32, y: u32) -> [u8; 4] {
    let (w, h) = image.dimensions();
    if transform.is_identity() {
        if x < w && y < h {
            return image.get_pixel(x, y).0;
        }
        return [0, 0, 0, 0];
    }
    let (sx, sy) = transform.inverse_map(
        x as f32 + 0.5,
        y as f32 + 0.5,
        w as f32 / 2.0,
        h as f32 / 2.0,
    );
    if sx < 0.0 || sy < 0.0 {
        return [0, 0, 0, 0];
    }
    let (ix, iy) = (sx.floor() as u32, sy.floor() as u32);
    if ix >= w || iy >= h {
        return [0, 0, 0, 0];
    }
    image.get_pixel(ix, iy).0
}

fn prepare_layer(
    layer: &Layer,
    layers: &HashMap<LayerId, Layer>,
    backdrop: &RgbaImage,
) -> RgbaImage {
    let (width, height) = backdrop.dimensions();
    let opacity = effective_opacity(layer, layers);
    let clip_base = layer.clipping_mask_of.and_then(|b| layers.get(&b));
    let mode = layer.blend_mode;

    let mut out = RgbaImage::new(width, height);
    let row_len = width as usize * 4;
    if row_len == 0 {
        return out;
    }
    out.par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let y = y as u32;
            for x in 0..width {
                let src = sample(&layer.surface, &layer.transform, x, y);
                if src[3] == 0 {
                    continue;
                }
                let mut alpha = src[3] as f32 / 255.0 * opacity;
                if let Some(base) = clip_base {
                    alpha *= sample(&base.surface, &base.transform, x, y)[3] as f32 / 255.0;
                }
                if alpha <= 0.0 {
                    continue;
                }
                let mut color = [
                    src[0] as f32 / 255.0,
                    src[1] as f32 / 255.0,
                    src[2] as f32 / 255.0,
                ];
                if !mode.is_normal() {
                    color = blend::blended_source(mode, backdrop.get_pixel(x, y).0, color);
                }
                let i = x as usize * 4;
                row[i] = (color[0] * 255.0).round().clamp(0.0, 255.0) as u8;
                row[i + 1] = (color[1] * 255.0).round().clamp(0.0, 255.0) as u8;
                row[i + 2] = (color[2] * 255.0).round().clamp(0.0, 255.0) as u8;
                row[i + 3] = (alpha * 255.0).round().clamp(0.0, 255.0) as u8;
            }
        });
    out
}

fn fold_over(accumulator: &mut RgbaImage, prepared: &RgbaImage) {
    let row_len = accumulator.width() as usize * 4;
    if row_len == 0 {
        return;
    }
    accumulator
        .par_chunks_mut(row_len)
        .zip(prepared.par_chunks(row_len))
        .for_each(|(dst_row, src_row)| {
            for (dst, src) in dst_row.chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
                let out = blend::over_pixel(
                    [dst[0], dst[1], dst[2], dst[3]],
                    [src[0], src[1], src[2], src[3]],
                );
                dst.copy_from_slice(&out);
            }
        });
}

/// Flatten an already-composited frame onto an opaque background
pub fn flatten_onto(frame: &RgbaImage, background: [u8; 3]) -> RgbaImage {
    let mut out = RgbaImage::from_pixel(
        frame.width(),
        frame.height(),
        Rgba([background[0], background[1], background[2], 255]),
    );
    for (dst, src) in out.pixels_mut().zip(frame.pixels()) {
        dst.0 = blend::over_pixel(dst.0, src.0);
    }
    out
}
