//! Serialized payloads exchanged with storage and export collaborators
//!
//! All payloads are camelCase JSON. Pixel content travels as base64 PNG
//! blobs with a SHA-256 content hash, never as raw pixels.

use serde::{Deserialize, Serialize};

use crate::brush::{BlendMode, Color, Dab};
use crate::input::Point;
use crate::layer::{LayerType, Transform};

/// Payload version written and accepted by this build
pub const LAYER_PAYLOAD_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedStroke {
    pub id: u64,
    pub points: Vec<Point>,
    pub brush_id: String,
    pub base_color: Color,
    pub size: f32,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    #[serde(default)]
    pub dabs: Vec<Dab>,
    /// Pixels already present in the layer image
    #[serde(default)]
    pub baked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedLayer {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type", default)]
    pub layer_type: LayerType,
    pub visible: bool,
    pub locked: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clipping_mask_of: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<u64>,
    #[serde(default)]
    pub transform: Transform,
    /// Base64 PNG of the layer's base pixels; absent for groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    /// Hex SHA-256 of the decoded PNG bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub strokes: Vec<ExportedStroke>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedGroup {
    pub id: u64,
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
}

/// `exportAllLayers` payload, consumed verbatim by import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerExport {
    pub version: u32,
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Raster layers
    pub layers: Vec<ExportedLayer>,
    #[serde(default)]
    pub groups: Vec<ExportedGroup>,
    /// Every layer and group id, bottom to top
    pub order: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_layer_id: Option<u64>,
}

/// Storage collaborator payload; groups are stored inline with `type: group`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSaveData {
    pub version: u32,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub layers: Vec<ExportedLayer>,
    pub order: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_layer_id: Option<u64>,
}

impl ExportedGroup {
    pub fn into_layer(self) -> ExportedLayer {
        ExportedLayer {
            id: self.id,
            name: self.name,
            layer_type: LayerType::Group,
            visible: self.visible,
            locked: self.locked,
            opacity: self.opacity,
            blend_mode: self.blend_mode,
            clipping_mask_of: None,
            parent: None,
            transform: Transform::default(),
            image_data: None,
            content_hash: None,
            strokes: Vec::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn save_data_uses_camel_case_keys() {
        let data = LayerSaveData {
            version: LAYER_PAYLOAD_VERSION,
            canvas_width: 4,
            canvas_height: 2,
            layers: Vec::new(),
            order: vec![1],
            current_layer_id: Some(1),
        };
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("\"canvasWidth\":4"));
        assert!(json.contains("\"currentLayerId\":1"));
    }

    #[test]
    fn layer_defaults_fill_missing_fields() {
        let json = r#"{
            "id": 3, "name": "Ink", "visible": true, "locked": false,
            "opacity": 0.5, "blendMode": "multiply"
        }"#;
        let layer: ExportedLayer = serde_json::from_str(json).unwrap();
        assert_eq!(layer.layer_type, LayerType::Raster);
        assert_eq!(layer.blend_mode, BlendMode::Multiply);
        assert!(layer.transform.is_identity());
        assert!(layer.strokes.is_empty());
    }
}
