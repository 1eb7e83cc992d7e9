//! Layer pixel surfaces: budgeted allocation, dab rasterisation, regions

use image::RgbaImage;

use super::blend;
use super::Stroke;
use crate::brush::{BlendMode, Dab, Stamp, StampCache};
use crate::core::errors::CoreError;

/// Pixel rectangle on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }

    /// Rectangle covering a float extent, clipped to the canvas
    pub fn from_extent(
        min_x: f32,
        min_y: f32,
        max_x: f32,
        max_y: f32,
        canvas_width: u32,
        canvas_height: u32,
    ) -> Option<Rect> {
        let x0 = min_x.floor().max(0.0) as i64;
        let y0 = min_y.floor().max(0.0) as i64;
        let x1 = (max_x.ceil() as i64).min(canvas_width as i64);
        let y1 = (max_y.ceil() as i64).min(canvas_height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}

/// Canvas area a set of dabs can touch
pub fn dab_bounds(dabs: &[Dab], canvas_width: u32, canvas_height: u32) -> Option<Rect> {
    let mut extent: Option<(f32, f32, f32, f32)> = None;
    for dab in dabs {
        let r = dab.reach();
        let (x0, y0, x1, y1) = (dab.x - r, dab.y - r, dab.x + r, dab.y + r);
        extent = Some(match extent {
            None => (x0, y0, x1, y1),
            Some((a, b, c, d)) => (a.min(x0), b.min(y0), c.max(x1), d.max(y1)),
        });
    }
    let (x0, y0, x1, y1) = extent?;
    Rect::from_extent(x0, y0, x1, y1, canvas_width, canvas_height)
}

/// Tracks pixel memory against a fixed budget
#[derive(Debug, Clone)]
pub struct SurfaceBudget {
    limit: u64,
    used: u64,
}

impl SurfaceBudget {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Allocate a transparent surface, failing when the budget or the
    /// allocator cannot satisfy it
    pub fn allocate(&mut self, width: u32, height: u32) -> Result<RgbaImage, CoreError> {
        let bytes = (width as u64)
            .checked_mul(height as u64)
            .and_then(|px| px.checked_mul(4))
            .filter(|b| *b <= usize::MAX as u64);
        let failure = |bytes: u64| CoreError::SurfaceAllocation {
            width,
            height,
            bytes: bytes.min(usize::MAX as u64) as usize,
        };
        let Some(bytes) = bytes else {
            return Err(failure(u64::MAX));
        };
        if self.used.saturating_add(bytes) > self.limit {
            tracing::warn!(
                "[SurfaceBudget] {} bytes requested, {} of {} in use",
                bytes,
                self.used,
                self.limit
            );
            return Err(failure(bytes));
        }

        let mut buffer: Vec<u8> = Vec::new();
        buffer
            .try_reserve_exact(bytes as usize)
            .map_err(|_| failure(bytes))?;
        buffer.resize(bytes as usize, 0);
        let image = RgbaImage::from_raw(width, height, buffer).ok_or_else(|| failure(bytes))?;
        self.used += bytes;
        Ok(image)
    }

    /// Account for a buffer created outside `allocate` (restores, imports)
    pub fn charge(&mut self, image: &RgbaImage) {
        self.used = self.used.saturating_add(image.as_raw().len() as u64);
    }

    pub fn release(&mut self, image: &RgbaImage) {
        self.used = self.used.saturating_sub(image.as_raw().len() as u64);
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }
}

/// Deterministic value noise in [0, 1] for paper grain
fn grain_noise(x: u32, y: u32, scale: f32) -> f32 {
    let cx = (x as f32 / scale.max(1.0)) as u32;
    let cy = (y as f32 / scale.max(1.0)) as u32;
    let mut h = cx.wrapping_mul(0x8da6_b343) ^ cy.wrapping_mul(0xd816_3841);
    h ^= h >> 13;
    h = h.wrapping_mul(0x5bd1_e995);
    h ^= h >> 15;
    (h & 0xffff) as f32 / 65535.0
}

/// Stamp one dab onto `target`, returning the touched area
pub fn stamp_dab(
    target: &mut RgbaImage,
    dab: &Dab,
    stamp: &Stamp,
    mode: BlendMode,
) -> Option<Rect> {
    let paint = &dab.paint;
    let alpha = paint.dab_alpha();
    if alpha <= 0.0 || stamp.side == 0 {
        return None;
    }
    let (width, height) = target.dimensions();

    let mut color = [paint.color.r, paint.color.g, paint.color.b];
    if paint.wet_pull > 0.0 {
        let (cx, cy) = (dab.x.floor(), dab.y.floor());
        if cx >= 0.0 && cy >= 0.0 && (cx as u32) < width && (cy as u32) < height {
            let under = target.get_pixel(cx as u32, cy as u32).0;
            let pickup = paint.wet_pull * under[3] as f32 / 255.0;
            for c in 0..3 {
                color[c] = color[c] * (1.0 - pickup) + under[c] as f32 / 255.0 * pickup;
            }
        }
    }

    let origin_x = (dab.x - stamp.radius()).round() as i64;
    let origin_y = (dab.y - stamp.radius()).round() as i64;
    let touched = Rect::from_extent(
        origin_x as f32,
        origin_y as f32,
        (origin_x + stamp.side as i64) as f32,
        (origin_y + stamp.side as i64) as f32,
        width,
        height,
    )?;

    for py in touched.y..touched.bottom() {
        let row = (py as i64 - origin_y) as usize;
        for px in touched.x..touched.right() {
            let col = (px as i64 - origin_x) as usize;
            let mut coverage = stamp.coverage(col, row);
            if coverage < 0.001 {
                continue;
            }
            if paint.grain_intensity > 0.0 {
                coverage *= 1.0 - paint.grain_intensity * grain_noise(px, py, paint.grain_scale);
            }
            let dst = target.get_pixel(px, py).0;
            let out = blend::blend_pixel(dst, color, coverage * alpha, mode);
            target.put_pixel(px, py, image::Rgba(out));
        }
    }
    Some(touched)
}

/// Replay every dab of a stroke onto `target`
pub fn render_stroke(target: &mut RgbaImage, stroke: &Stroke, stamps: &mut StampCache) -> Option<Rect> {
    let mut dirty: Option<Rect> = None;
    for dab in &stroke.dabs {
        let stamp = stamps.get_or_create(&stroke.brush_id, &dab.paint);
        if let Some(rect) = stamp_dab(target, dab, &stamp, stroke.blend_mode) {
            dirty = Some(match dirty {
                Some(d) => d.union(&rect),
                None => rect,
            });
        }
    }
    dirty
}

/// Copy the raw RGBA bytes of `rect`
pub fn copy_region(image: &RgbaImage, rect: &Rect) -> Vec<u8> {
    let mut out = Vec::with_capacity(rect.width as usize * rect.height as usize * 4);
    let stride = image.width() as usize * 4;
    let raw = image.as_raw();
    for y in rect.y..rect.bottom() {
        let start = y as usize * stride + rect.x as usize * 4;
        out.extend_from_slice(&raw[start..start + rect.width as usize * 4]);
    }
    out
}

/// Write bytes captured by `copy_region` back into `image`
pub fn paste_region(image: &mut RgbaImage, rect: &Rect, bytes: &[u8]) -> Result<(), CoreError> {
    let row_len = rect.width as usize * 4;
    if rect.right() > image.width()
        || rect.bottom() > image.height()
        || bytes.len() != row_len * rect.height as usize
    {
        return Err(CoreError::InvalidInput(format!(
            "Region {:?} does not fit a {}x{} surface",
            rect,
            image.width(),
            image.height()
        )));
    }
    let stride = image.width() as usize * 4;
    let raw: &mut [u8] = &mut **image;
    for (i, y) in (rect.y..rect.bottom()).enumerate() {
        let start = y as usize * stride + rect.x as usize * 4;
        raw[start..start + row_len].copy_from_slice(&bytes[i * row_len..(i + 1) * row_len]);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::brush::{build_paint, Brush, Color, DynamicsResult};

    fn dab(x: f32, y: f32, size: f32) -> Dab {
        let brush = Brush::default();
        let dynamics = DynamicsResult {
            size,
            opacity: 1.0,
            flow: 1.0,
            ..Default::default()
        };
        Dab {
            x,
            y,
            paint: build_paint(&brush, Color::rgba(1.0, 0.0, 0.0, 1.0), &dynamics),
        }
    }

    #[test]
    fn budget_rejects_oversized_surfaces() {
        let mut budget = SurfaceBudget::new(64);
        assert!(budget.allocate(4, 4).is_ok());
        assert_eq!(budget.used(), 64);

        let err = budget.allocate(1, 1).unwrap_err();
        assert!(err.is_resource_error());
    }

    #[test]
    fn budget_release_frees_space() {
        let mut budget = SurfaceBudget::new(64);
        let image = budget.allocate(4, 4).unwrap();
        budget.release(&image);
        assert_eq!(budget.used(), 0);
        assert!(budget.allocate(4, 4).is_ok());
    }

    #[test]
    fn stamping_paints_the_centre() {
        let mut image = RgbaImage::new(32, 32);
        let mut stamps = StampCache::default();
        let d = dab(16.0, 16.0, 8.0);
        let stamp = stamps.get_or_create("round", &d.paint);

        let rect = stamp_dab(&mut image, &d, &stamp, BlendMode::Normal).unwrap();
        assert!(rect.x <= 16 && rect.right() >= 16);
        assert_eq!(image.get_pixel(16, 16).0, [255, 0, 0, 255]);
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn offscreen_dab_touches_nothing() {
        let mut image = RgbaImage::new(8, 8);
        let mut stamps = StampCache::default();
        let d = dab(-50.0, -50.0, 4.0);
        let stamp = stamps.get_or_create("round", &d.paint);
        assert!(stamp_dab(&mut image, &d, &stamp, BlendMode::Normal).is_none());
    }

    #[test]
    fn region_copy_and_paste_restore_pixels() {
        let mut image = RgbaImage::new(8, 8);
        image.put_pixel(3, 3, image::Rgba([1, 2, 3, 4]));
        let rect = Rect {
            x: 2,
            y: 2,
            width: 3,
            height: 3,
        };
        let saved = copy_region(&image, &rect);
        image.put_pixel(3, 3, image::Rgba([9, 9, 9, 9]));
        paste_region(&mut image, &rect, &saved).unwrap();
        assert_eq!(image.get_pixel(3, 3).0, [1, 2, 3, 4]);

        assert!(paste_region(&mut image, &rect, &saved[..4]).is_err());
    }

    #[test]
    fn dab_bounds_cover_every_dab() {
        let dabs = vec![dab(10.0, 10.0, 4.0), dab(30.0, 12.0, 4.0)];
        let rect = dab_bounds(&dabs, 64, 64).unwrap();
        assert!(rect.x <= 8 && rect.right() >= 32);
        assert!(dab_bounds(&dabs, 0, 0).is_none());
    }

    #[test]
    fn rect_union_ignores_empty() {
        let a = Rect {
            x: 1,
            y: 1,
            width: 2,
            height: 2,
        };
        let empty = Rect {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
        };
        assert_eq!(a.union(&empty), a);
        let b = Rect {
            x: 5,
            y: 0,
            width: 1,
            height: 1,
        };
        assert_eq!(
            a.union(&b),
            Rect {
                x: 1,
                y: 0,
                width: 5,
                height: 3
            }
        );
    }
}
