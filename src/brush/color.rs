//! RGB / HSB colour handling for paint colour dynamics
//!
//! Colour dynamics run in HSB and convert back to RGB once, at the end, so
//! repeated hue shifts stay numerically stable.

use serde::{Deserialize, Serialize};

/// Straight-alpha RGBA colour, channels in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn from_rgba8(rgba: [u8; 4]) -> Self {
        Self {
            r: rgba[0] as f32 / 255.0,
            g: rgba[1] as f32 / 255.0,
            b: rgba[2] as f32 / 255.0,
            a: rgba[3] as f32 / 255.0,
        }
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        let c = self.clamped();
        [
            (c.r * 255.0).round() as u8,
            (c.g * 255.0).round() as u8,
            (c.b * 255.0).round() as u8,
            (c.a * 255.0).round() as u8,
        ]
    }

    pub fn clamped(self) -> Self {
        let clamp = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            r: clamp(self.r),
            g: clamp(self.g),
            b: clamp(self.b),
            a: clamp(self.a),
        }
    }

    /// Parse `#rrggbb` or `#rrggbbaa`
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.trim().trim_start_matches('#');
        let channel = |i: usize| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok();
        match digits.len() {
            6 => Some(Self::from_rgba8([channel(0)?, channel(2)?, channel(4)?, 255])),
            8 => Some(Self::from_rgba8([
                channel(0)?,
                channel(2)?,
                channel(4)?,
                channel(6)?,
            ])),
            _ => None,
        }
    }

    pub fn to_hsb(self) -> Hsb {
        let max = self.r.max(self.g).max(self.b);
        let min = self.r.min(self.g).min(self.b);
        let delta = max - min;

        let hue = if delta <= f32::EPSILON {
            0.0
        } else if max == self.r {
            60.0 * ((self.g - self.b) / delta).rem_euclid(6.0)
        } else if max == self.g {
            60.0 * ((self.b - self.r) / delta + 2.0)
        } else {
            60.0 * ((self.r - self.g) / delta + 4.0)
        };
        let saturation = if max <= f32::EPSILON { 0.0 } else { delta / max };

        Hsb {
            hue,
            saturation,
            brightness: max,
            alpha: self.a,
        }
    }

    /// Apply a colour shift in HSB space and convert back once
    pub fn shifted(self, shift: ColorShift) -> Self {
        if shift.is_identity() {
            return self;
        }
        let mut hsb = self.to_hsb();
        hsb.hue = (hsb.hue + shift.hue_degrees).rem_euclid(360.0);
        hsb.saturation = (hsb.saturation + shift.saturation).clamp(0.0, 1.0);
        hsb.brightness = (hsb.brightness + shift.brightness).clamp(0.0, 1.0);
        hsb.to_color()
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

/// Hue in degrees [0, 360), saturation and brightness in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsb {
    pub hue: f32,
    pub saturation: f32,
    pub brightness: f32,
    pub alpha: f32,
}

impl Hsb {
    pub fn to_color(self) -> Color {
        let c = self.brightness * self.saturation;
        let h = self.hue.rem_euclid(360.0) / 60.0;
        let x = c * (1.0 - (h.rem_euclid(2.0) - 1.0).abs());
        let m = self.brightness - c;

        let (r, g, b) = match h as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        Color::rgba(r + m, g + m, b + m, self.alpha).clamped()
    }
}

/// Additive HSB offsets produced by colour dynamics
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorShift {
    pub hue_degrees: f32,
    pub saturation: f32,
    pub brightness: f32,
}

impl ColorShift {
    pub fn is_identity(&self) -> bool {
        self.hue_degrees == 0.0 && self.saturation == 0.0 && self.brightness == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Color, b: Color) -> bool {
        (a.r - b.r).abs() < 1e-4
            && (a.g - b.g).abs() < 1e-4
            && (a.b - b.b).abs() < 1e-4
            && (a.a - b.a).abs() < 1e-4
    }

    #[test]
    fn primary_colors_map_to_expected_hues() {
        assert_eq!(Color::rgba(1.0, 0.0, 0.0, 1.0).to_hsb().hue, 0.0);
        assert!((Color::rgba(0.0, 1.0, 0.0, 1.0).to_hsb().hue - 120.0).abs() < 1e-4);
        assert!((Color::rgba(0.0, 0.0, 1.0, 1.0).to_hsb().hue - 240.0).abs() < 1e-4);
    }

    #[test]
    fn hsb_round_trip_is_stable() {
        let color = Color::rgba(0.2, 0.6, 0.9, 0.5);
        assert!(approx(color.to_hsb().to_color(), color));
    }

    #[test]
    fn hue_shift_wraps_around() {
        let red = Color::rgba(1.0, 0.0, 0.0, 1.0);
        let shifted = red.shifted(ColorShift {
            hue_degrees: 360.0 + 120.0,
            ..Default::default()
        });
        assert!(approx(shifted, Color::rgba(0.0, 1.0, 0.0, 1.0)));
    }

    #[test]
    fn brightness_shift_is_clamped() {
        let shifted = Color::WHITE.shifted(ColorShift {
            brightness: 0.5,
            ..Default::default()
        });
        assert!(approx(shifted, Color::WHITE));
    }

    #[test]
    fn parses_hex_colors() {
        assert_eq!(
            Color::from_hex("#ff0000").map(Color::to_rgba8),
            Some([255, 0, 0, 255])
        );
        assert_eq!(
            Color::from_hex("00ff0080").map(Color::to_rgba8),
            Some([0, 255, 0, 128])
        );
        assert!(Color::from_hex("#12").is_none());
    }
}
