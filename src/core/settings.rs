//! Session configuration supplied by the settings collaborator.
//!
//! Every struct is `#[serde(default)]`, so a partial or empty settings payload
//! still produces a usable configuration.

use serde::{Deserialize, Serialize};

use crate::core::errors::CoreError;

/// Thresholds used by the gesture recognizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GestureConfig {
    /// Maximum duration of a tap (ms)
    pub tap_duration_ms: u64,
    /// Minimum stationary hold for a long press (ms)
    pub long_press_duration_ms: u64,
    /// Movement before a touch counts as moving (px)
    pub pan_threshold: f32,
    /// Relative distance change that starts a pinch
    pub pinch_threshold: f32,
    /// Angle change that starts a rotation (degrees)
    pub rotation_threshold_deg: f32,
    /// Horizontal travel for a three-finger swipe (px)
    pub swipe_threshold: f32,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            tap_duration_ms: 200,
            long_press_duration_ms: 500,
            pan_threshold: 10.0,
            pinch_threshold: 0.1,
            rotation_threshold_deg: 15.0,
            swipe_threshold: 80.0,
        }
    }
}

/// Brush defaults read at session start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrushDefaults {
    /// Multiplier applied to raw pressure before the response curve
    pub pressure_sensitivity: f32,
    /// Position smoothing strength (0 = off, 1 = maximum)
    pub smoothing: f32,
    /// Builtin brush selected when the session starts
    pub brush_id: String,
}

impl Default for BrushDefaults {
    fn default() -> Self {
        Self {
            pressure_sensitivity: 1.0,
            smoothing: 0.5,
            brush_id: "pencil".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSettings {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub brush: BrushDefaults,
    pub gestures: GestureConfig,
    /// Ignore touches with a contact radius above `palm_radius`
    pub palm_rejection: bool,
    pub palm_radius: f32,
    pub left_handed: bool,
    /// Target 120 fps instead of 60 fps
    pub high_refresh: bool,
    /// Upper bound for all layer surfaces together (bytes)
    pub surface_budget_bytes: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            canvas_width: 1024,
            canvas_height: 768,
            brush: BrushDefaults::default(),
            gestures: GestureConfig::default(),
            palm_rejection: true,
            palm_radius: 30.0,
            left_handed: false,
            high_refresh: false,
            surface_budget_bytes: 1 << 30,
        }
    }
}

impl SessionSettings {
    /// Parse settings JSON, filling every missing field with its default.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let trimmed = json.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        let settings: SessionSettings = serde_json::from_str(trimmed)?;
        Ok(settings.sanitized())
    }

    /// Clamp values the engine cannot work with back into range.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.canvas_width == 0 || self.canvas_height == 0 {
            tracing::warn!(
                "Invalid canvas size {}x{}, using default",
                self.canvas_width,
                self.canvas_height
            );
            self.canvas_width = defaults.canvas_width;
            self.canvas_height = defaults.canvas_height;
        }
        if !self.brush.pressure_sensitivity.is_finite() || self.brush.pressure_sensitivity <= 0.0 {
            self.brush.pressure_sensitivity = defaults.brush.pressure_sensitivity;
        }
        if !self.brush.smoothing.is_finite() {
            self.brush.smoothing = defaults.brush.smoothing;
        }
        self.brush.smoothing = self.brush.smoothing.clamp(0.0, 1.0);
        self
    }

    /// Frame rate the optimizer budgets against
    pub fn target_fps(&self) -> f32 {
        if self.high_refresh {
            120.0
        } else {
            60.0
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_uses_defaults() {
        let settings = SessionSettings::from_json("").unwrap();
        assert_eq!(settings, SessionSettings::default());
    }

    #[test]
    fn partial_payload_keeps_other_defaults() {
        let settings =
            SessionSettings::from_json(r#"{"leftHanded": true, "brush": {"smoothing": 0.2}}"#)
                .unwrap();
        assert!(settings.left_handed);
        assert!((settings.brush.smoothing - 0.2).abs() < f32::EPSILON);
        assert_eq!(settings.brush.pressure_sensitivity, 1.0);
        assert_eq!(settings.gestures.tap_duration_ms, 200);
        assert!(settings.palm_rejection);
    }

    #[test]
    fn out_of_range_values_are_sanitized() {
        let settings = SessionSettings::from_json(
            r#"{"canvasWidth": 0, "brush": {"smoothing": 4.0, "pressureSensitivity": -1}}"#,
        )
        .unwrap();
        assert_eq!(settings.canvas_width, 1024);
        assert_eq!(settings.brush.smoothing, 1.0);
        assert_eq!(settings.brush.pressure_sensitivity, 1.0);
    }

    #[test]
    fn target_fps_follows_refresh_flag() {
        let mut settings = SessionSettings::default();
        assert_eq!(settings.target_fps(), 60.0);
        settings.high_refresh = true;
        assert_eq!(settings.target_fps(), 120.0);
    }
}
