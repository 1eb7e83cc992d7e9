//! Dab coverage masks and the LRU stamp cache
//!
//! Soft round tips use the Gaussian (erf) falloff profile; hard tips get a
//! one-pixel anti-aliased edge. Masks are cached by a structural key so a
//! stroke with steady dynamics regenerates nothing.

use std::collections::HashMap;
use std::f32::consts::SQRT_2;
use std::sync::Arc;

use hashlink::LruCache;

use super::{BrushShape, PaintState, MAX_BRUSH_SIZE};
use crate::core::errors::CoreError;

/// Default number of cached stamps
pub const STAMP_CACHE_CAPACITY: usize = 256;

/// Hardness at or above which a tip is rendered with a crisp edge
const HARD_EDGE_THRESHOLD: f32 = 0.99;

/// Quantised shape component of a stamp key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ShapeKey {
    Round,
    Square,
    Flat(u16),
    Texture(String),
}

/// Structural cache key: brush id, size (0.5 px steps), rotation (1° steps),
/// hardness (1% steps) and shape
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StampKey {
    brush_id: String,
    half_px: u32,
    rotation_deg: u16,
    hardness_pct: u8,
    shape: ShapeKey,
}

impl StampKey {
    pub fn new(brush_id: &str, paint: &PaintState) -> Self {
        let shape = match &paint.shape {
            BrushShape::Round => ShapeKey::Round,
            BrushShape::Square => ShapeKey::Square,
            BrushShape::Flat { roundness } => {
                ShapeKey::Flat((roundness.clamp(0.0, 1.0) * 1000.0).round() as u16)
            }
            BrushShape::Texture { texture_id } => ShapeKey::Texture(texture_id.clone()),
        };
        // Round tips are rotation invariant
        let rotation_deg = match shape {
            ShapeKey::Round => 0,
            _ => (paint.rotation.rem_euclid(360.0).round() as u16) % 360,
        };
        Self {
            brush_id: brush_id.to_string(),
            half_px: (paint.size.max(0.5).min(MAX_BRUSH_SIZE) * 2.0).round() as u32,
            rotation_deg,
            hardness_pct: (paint.hardness.clamp(0.0, 1.0) * 100.0).round() as u8,
            shape,
        }
    }

    /// Quantised diameter in pixels
    pub fn diameter(&self) -> f32 {
        self.half_px as f32 / 2.0
    }
}

/// A square coverage mask centred on the dab position
#[derive(Debug, Clone, PartialEq)]
pub struct Stamp {
    /// Side length in pixels
    pub side: usize,
    /// Row-major coverage in [0, 1]
    pub mask: Vec<f32>,
}

impl Stamp {
    pub fn coverage(&self, x: usize, y: usize) -> f32 {
        if x >= self.side || y >= self.side {
            return 0.0;
        }
        self.mask[y * self.side + x]
    }

    pub fn radius(&self) -> f32 {
        self.side as f32 / 2.0
    }
}

/// Grayscale tip texture
#[derive(Debug, Clone)]
struct TipTexture {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl TipTexture {
    /// Nearest sample at normalised coordinates in [-1, 1]
    fn sample(&self, u: f32, v: f32) -> f32 {
        if !(-1.0..=1.0).contains(&u) || !(-1.0..=1.0).contains(&v) {
            return 0.0;
        }
        let x = (((u + 1.0) * 0.5) * (self.width - 1) as f32).round() as usize;
        let y = (((v + 1.0) * 0.5) * (self.height - 1) as f32).round() as usize;
        self.data[y.min(self.height - 1) * self.width + x.min(self.width - 1)] as f32 / 255.0
    }
}

/// LRU cache of generated stamps plus the tip texture registry
pub struct StampCache {
    stamps: LruCache<StampKey, Arc<Stamp>>,
    textures: HashMap<String, Arc<TipTexture>>,
    hits: u64,
    misses: u64,
}

impl StampCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            stamps: LruCache::new(capacity.max(1)),
            textures: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Register a grayscale tip texture for `BrushShape::Texture`
    pub fn register_texture(
        &mut self,
        texture_id: &str,
        width: usize,
        height: usize,
        data: Vec<u8>,
    ) -> Result<(), CoreError> {
        if width == 0 || height == 0 || data.len() != width * height {
            return Err(CoreError::InvalidInput(format!(
                "Texture '{}' has {} bytes, expected {}x{}",
                texture_id,
                data.len(),
                width,
                height
            )));
        }
        self.textures.insert(
            texture_id.to_string(),
            Arc::new(TipTexture {
                width,
                height,
                data,
            }),
        );
        // Masks built from a previous texture under this id are stale
        self.stamps.clear();
        tracing::debug!("[StampCache] Registered texture '{}' ({}x{})", texture_id, width, height);
        Ok(())
    }

    pub fn has_texture(&self, texture_id: &str) -> bool {
        self.textures.contains_key(texture_id)
    }

    /// Fetch the stamp for a dab, generating it on a miss
    pub fn get_or_create(&mut self, brush_id: &str, paint: &PaintState) -> Arc<Stamp> {
        let key = StampKey::new(brush_id, paint);
        if let Some(stamp) = self.stamps.get(&key) {
            self.hits += 1;
            return Arc::clone(stamp);
        }

        self.misses += 1;
        let texture = match &key.shape {
            ShapeKey::Texture(id) => self.textures.get(id).cloned(),
            _ => None,
        };
        let stamp = Arc::new(generate_stamp(&key, texture.as_deref()));
        self.stamps.insert(key, Arc::clone(&stamp));
        stamp
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.stamps.capacity()
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Drop every cached mask; textures stay registered
    pub fn clear(&mut self) {
        let dropped = self.stamps.len();
        self.stamps.clear();
        if dropped > 0 {
            tracing::debug!("[StampCache] Pruned {} stamps", dropped);
        }
    }
}

impl Default for StampCache {
    fn default() -> Self {
        Self::new(STAMP_CACHE_CAPACITY)
    }
}

/// Gaussian mask parameters
///
/// Derived once per stamp from hardness and radius.
#[derive(Clone, Debug)]
struct GaussParams {
    center: f32,
    alphafactor: f32,
    distfactor: f32,
}

impl GaussParams {
    fn new(hardness: f32, radius: f32) -> Self {
        let fade = ((1.0 - hardness) * 2.0).clamp(1e-6, 2.0);
        let center = (2.5 * (6761.0 * fade - 10000.0)) / (SQRT_2 * 6761.0 * fade);
        let alphafactor = 255.0 / (2.0 * erf(center));
        let distfactor = SQRT_2 * 12500.0 / (6761.0 * fade * radius.max(0.5));
        Self {
            center,
            alphafactor,
            distfactor,
        }
    }

    /// Transparency at `dist` pixels from the centre (0 = opaque)
    fn fade_at(&self, dist: f32) -> f32 {
        let val_dist = dist * self.distfactor;
        let full_fade =
            self.alphafactor * (erf(val_dist + self.center) - erf(val_dist - self.center));
        ((255.0 - full_fade) / 255.0).clamp(0.0, 1.0)
    }
}

/// Abramowitz and Stegun 7.1.26, |error| < 1.5e-7
#[inline]
fn erf(x: f32) -> f32 {
    let sign = if x >= 0.0 { 1.0 } else { -1.0 };
    let x = x.abs();

    const A1: f32 = 0.254_829_6;
    const A2: f32 = -0.284_496_72;
    const A3: f32 = 1.421_413_8;
    const A4: f32 = -1.453_152_1;
    const A5: f32 = 1.061_405_4;
    const P: f32 = 0.327_591_1;

    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();

    sign * y
}

/// Edge coverage for a normalised distance (1.0 = on the rim)
fn edge_coverage(norm_dist: f32, radius: f32, hardness: f32, gauss: &GaussParams) -> f32 {
    if hardness >= HARD_EDGE_THRESHOLD {
        // One-pixel anti-aliased rim
        let px_from_edge = (1.0 - norm_dist) * radius;
        return (px_from_edge + 0.5).clamp(0.0, 1.0);
    }
    1.0 - gauss.fade_at(norm_dist * radius)
}

fn generate_stamp(key: &StampKey, texture: Option<&TipTexture>) -> Stamp {
    let diameter = key.diameter().clamp(1.0, MAX_BRUSH_SIZE);
    let radius = diameter / 2.0;
    let hardness = key.hardness_pct as f32 / 100.0;
    // Soft falloff reaches past the nominal radius
    let extent = if hardness >= HARD_EDGE_THRESHOLD {
        1.0
    } else {
        1.0 + (1.0 - hardness) * 2.0
    };
    let side = (diameter * extent).ceil() as usize + 2;
    let center = side as f32 / 2.0;
    let gauss = GaussParams::new(hardness, radius);
    let (sin, cos) = (-(key.rotation_deg as f32).to_radians()).sin_cos();

    let mut mask = vec![0.0f32; side * side];
    for row in 0..side {
        for col in 0..side {
            let dx = col as f32 + 0.5 - center;
            let dy = row as f32 + 0.5 - center;
            // Rotate into tip space
            let u = (dx * cos - dy * sin) / radius;
            let v = (dx * sin + dy * cos) / radius;

            let value = match (&key.shape, texture) {
                (ShapeKey::Square, _) => {
                    let norm = u.abs().max(v.abs());
                    edge_coverage(norm, radius, hardness, &gauss)
                }
                (ShapeKey::Flat(roundness), _) => {
                    let ratio = (*roundness as f32 / 1000.0).max(0.05);
                    let norm = (u * u + (v / ratio) * (v / ratio)).sqrt();
                    edge_coverage(norm, radius, hardness, &gauss)
                }
                (ShapeKey::Texture(_), Some(texture)) => texture.sample(u, v),
                // Unknown textures fall back to a round tip
                _ => {
                    let norm = (u * u + v * v).sqrt();
                    edge_coverage(norm, radius, hardness, &gauss)
                }
            };
            mask[row * side + col] = value;
        }
    }

    Stamp { side, mask }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brush::{build_paint, Brush, Color, DynamicsResult};

    fn paint(size: f32, hardness: f32, shape: BrushShape) -> PaintState {
        let brush = Brush {
            hardness,
            shape,
            ..Brush::default()
        };
        let dynamics = DynamicsResult {
            size,
            opacity: 1.0,
            flow: 1.0,
            ..Default::default()
        };
        build_paint(&brush, Color::BLACK, &dynamics)
    }

    #[test]
    fn hard_round_stamp_is_solid_in_the_middle() {
        let mut cache = StampCache::default();
        let stamp = cache.get_or_create("pencil", &paint(10.0, 1.0, BrushShape::Round));
        let mid = stamp.side / 2;
        assert_eq!(stamp.coverage(mid, mid), 1.0);
        assert_eq!(stamp.coverage(0, 0), 0.0);
    }

    #[test]
    fn oversized_paint_is_capped_before_allocation() {
        let huge = StampKey::new("pencil", &paint(1.0e9, 1.0, BrushShape::Round));
        assert_eq!(huge.diameter(), MAX_BRUSH_SIZE);
        let nan = StampKey::new("pencil", &paint(f32::NAN, 1.0, BrushShape::Round));
        assert!(nan.diameter() <= 1.0);
    }

    #[test]
    fn soft_stamp_fades_towards_the_edge() {
        let mut cache = StampCache::default();
        let stamp = cache.get_or_create("air", &paint(40.0, 0.0, BrushShape::Round));
        let mid = stamp.side / 2;
        let centre = stamp.coverage(mid, mid);
        let near_edge = stamp.coverage(mid + 17, mid);
        assert!(centre > near_edge);
        assert!(near_edge > 0.0 && near_edge < 1.0);
    }

    #[test]
    fn nearby_sizes_share_a_cache_entry() {
        let mut cache = StampCache::default();
        cache.get_or_create("pencil", &paint(10.0, 1.0, BrushShape::Round));
        cache.get_or_create("pencil", &paint(10.1, 1.0, BrushShape::Round));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats(), (1, 1));

        cache.get_or_create("pencil", &paint(11.0, 1.0, BrushShape::Round));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let mut cache = StampCache::new(2);
        let a = paint(4.0, 1.0, BrushShape::Round);
        let b = paint(6.0, 1.0, BrushShape::Round);
        let c = paint(8.0, 1.0, BrushShape::Round);

        cache.get_or_create("p", &a);
        cache.get_or_create("p", &b);
        cache.get_or_create("p", &a);
        cache.get_or_create("p", &c);
        assert_eq!(cache.len(), 2);

        // `a` was refreshed, so `b` is gone
        cache.get_or_create("p", &a);
        assert_eq!(cache.stats().0, 2);
        cache.get_or_create("p", &b);
        assert_eq!(cache.stats().1, 4);
    }

    #[test]
    fn unknown_texture_falls_back_to_round() {
        let mut cache = StampCache::default();
        let textured = cache.get_or_create(
            "t",
            &paint(
                10.0,
                1.0,
                BrushShape::Texture {
                    texture_id: "missing".to_string(),
                },
            ),
        );
        let round = cache.get_or_create("t", &paint(10.0, 1.0, BrushShape::Round));
        assert_eq!(textured.mask, round.mask);
    }

    #[test]
    fn registered_texture_is_sampled() {
        let mut cache = StampCache::default();
        assert!(cache.register_texture("bad", 2, 2, vec![0; 3]).is_err());
        assert!(cache.register_texture("half", 2, 1, vec![0, 255]).is_ok());

        let stamp = cache.get_or_create(
            "t",
            &paint(
                10.0,
                1.0,
                BrushShape::Texture {
                    texture_id: "half".to_string(),
                },
            ),
        );
        let mid = stamp.side / 2;
        assert_eq!(stamp.coverage(1, mid), 0.0);
        assert_eq!(stamp.coverage(stamp.side - 2, mid), 1.0);
    }
}
