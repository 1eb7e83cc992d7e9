//! Blend-mode math on straight-alpha RGBA8 pixels
//!
//! Separable W3C compositing: the blended source colour is
//! `(1 - ab) * Cs + ab * B(Cb, Cs)`, composited source-over the backdrop.

use crate::brush::BlendMode;

/// Separable blend function `B(Cb, Cs)` for one channel in [0, 1]
pub fn blend_channel(mode: BlendMode, cb: f32, cs: f32) -> f32 {
    match mode {
        BlendMode::Normal => cs,
        BlendMode::Multiply => cb * cs,
        BlendMode::Screen => 1.0 - (1.0 - cb) * (1.0 - cs),
        BlendMode::Overlay => hard_light(cs, cb),
        BlendMode::Darken => cb.min(cs),
        BlendMode::Lighten => cb.max(cs),
        BlendMode::ColorDodge => {
            if cb <= 0.0 {
                0.0
            } else if cs >= 1.0 {
                1.0
            } else {
                (cb / (1.0 - cs)).min(1.0)
            }
        }
        BlendMode::ColorBurn => {
            if cb >= 1.0 {
                1.0
            } else if cs <= 0.0 {
                0.0
            } else {
                1.0 - ((1.0 - cb) / cs).min(1.0)
            }
        }
        BlendMode::HardLight => hard_light(cb, cs),
        BlendMode::SoftLight => soft_light(cb, cs),
        BlendMode::Difference => (cb - cs).abs(),
        BlendMode::Exclusion => cb + cs - 2.0 * cb * cs,
    }
}

fn hard_light(cb: f32, cs: f32) -> f32 {
    if cs <= 0.5 {
        cb * 2.0 * cs
    } else {
        let s = 2.0 * cs - 1.0;
        cb + s - cb * s
    }
}

fn soft_light(cb: f32, cs: f32) -> f32 {
    if cs <= 0.5 {
        cb - (1.0 - 2.0 * cs) * cb * (1.0 - cb)
    } else {
        let d = if cb <= 0.25 {
            ((16.0 * cb - 12.0) * cb + 4.0) * cb
        } else {
            cb.sqrt()
        };
        cb + (2.0 * cs - 1.0) * (d - cb)
    }
}

#[inline]
fn to_unit(v: u8) -> f32 {
    v as f32 / 255.0
}

#[inline]
fn to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Mix the source colour with the blend result against `backdrop`
///
/// Returns the straight colour to composite source-over; alpha is untouched.
pub fn blended_source(mode: BlendMode, backdrop: [u8; 4], src: [f32; 3]) -> [f32; 3] {
    if mode.is_normal() || backdrop[3] == 0 {
        return src;
    }
    let ab = to_unit(backdrop[3]);
    let mut out = [0.0f32; 3];
    for c in 0..3 {
        let cb = to_unit(backdrop[c]);
        out[c] = (1.0 - ab) * src[c] + ab * blend_channel(mode, cb, src[c]);
    }
    out
}

/// Source-over of a straight colour with alpha `src_alpha` onto `dst`
#[inline]
pub fn source_over(dst: [u8; 4], src: [f32; 3], src_alpha: f32) -> [u8; 4] {
    let sa = src_alpha.clamp(0.0, 1.0);
    if sa <= 0.0 {
        return dst;
    }
    let da = to_unit(dst[3]);
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return [0, 0, 0, 0];
    }
    let mut out = [0u8; 4];
    for c in 0..3 {
        let v = (src[c] * sa + to_unit(dst[c]) * da * (1.0 - sa)) / out_a;
        out[c] = to_u8(v);
    }
    out[3] = to_u8(out_a);
    out
}

/// Blend a straight source colour onto `dst` with the given mode and alpha
pub fn blend_pixel(dst: [u8; 4], src: [f32; 3], src_alpha: f32, mode: BlendMode) -> [u8; 4] {
    let src = blended_source(mode, dst, src);
    source_over(dst, src, src_alpha)
}

/// Composite a full straight-alpha RGBA8 pixel onto `dst`
#[inline]
pub fn over_pixel(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
    if src[3] == 0 {
        return dst;
    }
    if src[3] == 255 {
        return src;
    }
    source_over(
        dst,
        [to_unit(src[0]), to_unit(src[1]), to_unit(src[2])],
        to_unit(src[3]),
    )
}
