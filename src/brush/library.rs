//! Builtin brush templates and the session brush library

use indexmap::IndexMap;

use super::{
    BlendMode, Brush, BrushShape, ColorDynamics, GrainSettings, ResponseCurve, TiltDynamics,
    VelocityDynamics, WetMix,
};
use crate::core::errors::CoreError;

pub fn pencil() -> Brush {
    Brush {
        id: "pencil".to_string(),
        name: "Pencil".to_string(),
        size: 4.0,
        size_min: 0.5,
        size_max: 24.0,
        hardness: 0.9,
        spacing: 0.15,
        pressure_size: true,
        pressure_opacity: true,
        pressure_curve: ResponseCurve::soft(),
        grain: GrainSettings {
            intensity: 0.35,
            scale: 2.0,
        },
        smoothing: 0.3,
        ..Brush::default()
    }
}

pub fn ink_pen() -> Brush {
    Brush {
        id: "ink-pen".to_string(),
        name: "Ink Pen".to_string(),
        size: 6.0,
        size_min: 1.0,
        size_max: 40.0,
        hardness: 1.0,
        spacing: 0.1,
        pressure_size: true,
        pressure_curve: ResponseCurve::linear(),
        velocity: VelocityDynamics {
            enabled: true,
            curve: ResponseCurve::soft(),
            size_reduction: 0.4,
        },
        smoothing: 0.6,
        ..Brush::default()
    }
}

pub fn marker() -> Brush {
    Brush {
        id: "marker".to_string(),
        name: "Marker".to_string(),
        shape: BrushShape::Square,
        size: 18.0,
        size_min: 4.0,
        size_max: 80.0,
        opacity: 0.7,
        hardness: 0.8,
        spacing: 0.1,
        pressure_size: false,
        pressure_flow: true,
        pressure_curve: ResponseCurve::hard(),
        blend_mode: BlendMode::Multiply,
        smoothing: 0.4,
        ..Brush::default()
    }
}

pub fn airbrush() -> Brush {
    Brush {
        id: "airbrush".to_string(),
        name: "Airbrush".to_string(),
        size: 60.0,
        size_min: 5.0,
        size_max: 300.0,
        opacity: 0.5,
        flow: 0.15,
        hardness: 0.0,
        spacing: 0.1,
        pressure_size: false,
        pressure_flow: true,
        pressure_curve: ResponseCurve::soft(),
        tilt: TiltDynamics {
            enabled: true,
            size_reduction: 0.0,
            opacity_reduction: 0.3,
            angle_weight: 1.0,
        },
        size_jitter: 0.05,
        scatter: 0.05,
        smoothing: 0.5,
        ..Brush::default()
    }
}

pub fn watercolor() -> Brush {
    Brush {
        id: "watercolor".to_string(),
        name: "Watercolor".to_string(),
        size: 40.0,
        size_min: 4.0,
        size_max: 200.0,
        opacity: 0.6,
        flow: 0.4,
        hardness: 0.3,
        spacing: 0.12,
        pressure_size: true,
        pressure_opacity: true,
        pressure_curve: ResponseCurve::soft(),
        color: ColorDynamics {
            hue_jitter: 6.0,
            brightness_jitter: 0.05,
            ..Default::default()
        },
        grain: GrainSettings {
            intensity: 0.2,
            scale: 6.0,
        },
        wet_mix: WetMix {
            enabled: true,
            wetness: 0.6,
            pull: 0.35,
        },
        smoothing: 0.6,
        ..Brush::default()
    }
}

pub fn calligraphy() -> Brush {
    Brush {
        id: "calligraphy".to_string(),
        name: "Calligraphy".to_string(),
        shape: BrushShape::Flat { roundness: 0.25 },
        size: 16.0,
        size_min: 2.0,
        size_max: 80.0,
        hardness: 0.95,
        spacing: 0.05,
        pressure_size: true,
        pressure_curve: ResponseCurve::linear(),
        tilt: TiltDynamics {
            enabled: true,
            size_reduction: 0.2,
            opacity_reduction: 0.0,
            angle_weight: 0.5,
        },
        smoothing: 0.5,
        ..Brush::default()
    }
}

/// All builtin templates in presentation order
pub fn builtin_brushes() -> Vec<Brush> {
    vec![
        pencil(),
        ink_pen(),
        marker(),
        airbrush(),
        watercolor(),
        calligraphy(),
    ]
}

pub fn builtin_brush(id: &str) -> Option<Brush> {
    builtin_brushes().into_iter().find(|b| b.id == id)
}

/// Brush templates available to a session
///
/// Templates are immutable once stored; replacing one bumps its version.
#[derive(Debug, Clone)]
pub struct BrushLibrary {
    brushes: IndexMap<String, Brush>,
}

impl BrushLibrary {
    pub fn with_builtins() -> Self {
        let brushes = builtin_brushes()
            .into_iter()
            .map(|b| (b.id.clone(), b))
            .collect();
        Self { brushes }
    }

    pub fn get(&self, id: &str) -> Option<&Brush> {
        self.brushes.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.brushes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.brushes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brushes.is_empty()
    }

    /// Store a custom template, replacing any brush with the same id
    pub fn insert(&mut self, mut brush: Brush) -> Result<(), CoreError> {
        if brush.id.trim().is_empty() {
            return Err(CoreError::InvalidInput("Brush id cannot be empty".to_string()));
        }
        brush.sanitize();
        if let Some(existing) = self.brushes.get(&brush.id) {
            brush.version = brush.version.max(existing.version.saturating_add(1));
        }
        tracing::info!("[BrushLibrary] Stored brush '{}' v{}", brush.id, brush.version);
        self.brushes.insert(brush.id.clone(), brush);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<Brush> {
        self.brushes.shift_remove(id)
    }
}

impl Default for BrushLibrary {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_have_unique_ids_and_valid_ranges() {
        let brushes = builtin_brushes();
        let library = BrushLibrary::with_builtins();
        assert_eq!(library.len(), brushes.len());

        for brush in brushes {
            let mut sanitized = brush.clone();
            sanitized.sanitize();
            assert_eq!(sanitized, brush, "{} is out of range", brush.id);
            assert!(brush.pressure_curve.is_monotonic());
        }
    }

    #[test]
    fn lookup_by_id() {
        assert_eq!(builtin_brush("watercolor").map(|b| b.name), Some("Watercolor".to_string()));
        assert!(builtin_brush("crayon").is_none());
    }

    #[test]
    fn replacing_a_template_bumps_version() {
        let mut library = BrushLibrary::with_builtins();
        let mut custom = pencil();
        custom.size = 8.0;
        assert!(library.insert(custom).is_ok());

        let stored = library.get("pencil").cloned().unwrap_or_default();
        assert_eq!(stored.size, 8.0);
        assert_eq!(stored.version, 2);
        assert_eq!(library.ids().next(), Some("pencil"));
    }

    #[test]
    fn rejects_blank_ids() {
        let mut library = BrushLibrary::with_builtins();
        assert!(library.insert(Brush::new(" ", "Nameless")).is_err());
    }
}
