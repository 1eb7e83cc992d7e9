//! Input module - touch samples, stroke preprocessing and gesture recognition

pub mod gesture;
mod processor;

pub use gesture::{GestureCommand, GestureEvent, GesturePhase, GestureRecognizer, GestureType};
pub use processor::{InputProcessor, InputProcessorConfig, PressureSmoother};

use serde::{Deserialize, Serialize};

/// A captured input sample on a stroke path
///
/// Pressure and tilt are optional: devices without those capabilities leave
/// them absent and the dynamics terms that depend on them are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    /// X coordinate in canvas space
    pub x: f32,
    /// Y coordinate in canvas space
    pub y: f32,
    /// Pressure value (0.0 - 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f32>,
    /// Tilt X angle in degrees (-90 to 90)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tilt_x: Option<f32>,
    /// Tilt Y angle in degrees (-90 to 90)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tilt_y: Option<f32>,
    /// Capture time in milliseconds
    pub timestamp_ms: u64,
}

impl Point {
    /// Create a point without pressure or tilt
    pub fn new(x: f32, y: f32, timestamp_ms: u64) -> Self {
        Self {
            x,
            y,
            pressure: None,
            tilt_x: None,
            tilt_y: None,
            timestamp_ms,
        }
    }

    /// Create a point with pressure
    pub fn with_pressure(x: f32, y: f32, pressure: f32, timestamp_ms: u64) -> Self {
        Self {
            pressure: clamp_pressure(pressure),
            ..Self::new(x, y, timestamp_ms)
        }
    }

    /// Create with full parameters
    pub fn with_tilt(
        x: f32,
        y: f32,
        pressure: f32,
        tilt_x: f32,
        tilt_y: f32,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            x,
            y,
            pressure: clamp_pressure(pressure),
            tilt_x: clamp_tilt(tilt_x),
            tilt_y: clamp_tilt(tilt_y),
            timestamp_ms,
        }
    }

    /// Tilt is usable only when both axes were reported
    pub fn tilt(&self) -> Option<(f32, f32)> {
        match (self.tilt_x, self.tilt_y) {
            (Some(tx), Some(ty)) => Some((tx, ty)),
            _ => None,
        }
    }

    pub fn distance_to(&self, other: &Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// One active contact in an input frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchPoint {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub pressure: Option<f32>,
    #[serde(default)]
    pub tilt_x: Option<f32>,
    #[serde(default)]
    pub tilt_y: Option<f32>,
    /// Contact radius in pixels, when the platform reports it
    #[serde(default)]
    pub radius: Option<f32>,
}

impl TouchPoint {
    pub fn new(id: u32, x: f32, y: f32) -> Self {
        Self {
            id,
            x,
            y,
            pressure: None,
            tilt_x: None,
            tilt_y: None,
            radius: None,
        }
    }

    /// Convert to a stroke point captured at `timestamp_ms`
    pub fn to_point(&self, timestamp_ms: u64) -> Point {
        Point {
            x: self.x,
            y: self.y,
            pressure: self.pressure.and_then(clamp_pressure),
            tilt_x: self.tilt_x.and_then(clamp_tilt),
            tilt_y: self.tilt_y.and_then(clamp_tilt),
            timestamp_ms,
        }
    }
}

/// Clamp pressure into [0, 1]; non-finite readings count as absent
pub fn clamp_pressure(value: f32) -> Option<f32> {
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 1.0))
}

/// Clamp tilt into [-90, 90] degrees; non-finite readings count as absent
pub fn clamp_tilt(value: f32) -> Option<f32> {
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(-90.0, 90.0))
}
