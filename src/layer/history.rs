//! Linear undo history
//!
//! Each entry carries enough state to invert itself. Pixel payloads are kept
//! LZ4-compressed: whole bases for structural entries, the stroke's bounding
//! box for stroke additions.

use image::RgbaImage;

use super::surface::{copy_region, paste_region, Rect};
use super::{Layer, LayerId, LayerProperties, LayerType, Stroke};
use crate::core::errors::CoreError;

/// Entries kept before the oldest is dropped
pub const HISTORY_LIMIT: usize = 100;

fn corrupt(what: &str) -> CoreError {
    CoreError::InvalidInput(format!("Corrupt history {}", what))
}

/// LZ4-compressed copy of a full surface
#[derive(Debug, Clone, PartialEq)]
pub struct PixelSnapshot {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelSnapshot {
    pub fn capture(image: &RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            data: lz4_flex::compress_prepend_size(image.as_raw()),
        }
    }

    pub fn restore(&self) -> Result<RgbaImage, CoreError> {
        let raw =
            lz4_flex::decompress_size_prepended(&self.data).map_err(|_| corrupt("snapshot"))?;
        RgbaImage::from_raw(self.width, self.height, raw).ok_or_else(|| corrupt("snapshot size"))
    }

    /// Compressed size in bytes
    pub fn compressed_len(&self) -> usize {
        self.data.len()
    }
}

/// LZ4-compressed copy of one region of a surface
#[derive(Debug, Clone, PartialEq)]
pub struct PixelPatch {
    rect: Option<Rect>,
    data: Vec<u8>,
}

impl PixelPatch {
    pub fn capture(image: &RgbaImage, rect: Option<Rect>) -> Self {
        let data = match &rect {
            Some(r) => lz4_flex::compress_prepend_size(&copy_region(image, r)),
            None => Vec::new(),
        };
        Self { rect, data }
    }

    pub fn apply(&self, image: &mut RgbaImage) -> Result<(), CoreError> {
        let Some(rect) = &self.rect else {
            return Ok(());
        };
        let raw = lz4_flex::decompress_size_prepended(&self.data).map_err(|_| corrupt("patch"))?;
        paste_region(image, rect, &raw)
    }

    pub fn rect(&self) -> Option<Rect> {
        self.rect
    }
}

/// Everything needed to bring a deleted layer back
#[derive(Debug, Clone, PartialEq)]
pub struct LayerRecord {
    pub id: LayerId,
    pub layer_type: LayerType,
    pub properties: LayerProperties,
    pub strokes: Vec<Stroke>,
    pub base: PixelSnapshot,
}

impl LayerRecord {
    pub fn capture(layer: &Layer) -> Self {
        Self {
            id: layer.id,
            layer_type: layer.layer_type,
            properties: layer.properties(),
            strokes: layer.strokes.clone(),
            base: PixelSnapshot::capture(&layer.base),
        }
    }
}

/// One reversible layer-stack mutation
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEntry {
    Create {
        record: LayerRecord,
        index: usize,
        previous_active: LayerId,
    },
    Delete {
        record: LayerRecord,
        index: usize,
        /// Clipping layers that pointed at the deleted layer
        released_clips: Vec<LayerId>,
        /// Raster layers that belonged to the deleted group
        released_children: Vec<LayerId>,
        was_active: bool,
    },
    PropertyChange {
        layer_id: LayerId,
        before: LayerProperties,
        after: LayerProperties,
    },
    StrokeAdd {
        layer_id: LayerId,
        stroke: Stroke,
        /// Surface pixels under the stroke before it was drawn
        patch: PixelPatch,
    },
    StrokeRemove {
        layer_id: LayerId,
        index: usize,
        stroke: Stroke,
    },
    Merge {
        upper: LayerRecord,
        upper_index: usize,
        lower_id: LayerId,
        lower_base: PixelSnapshot,
        lower_strokes: Vec<Stroke>,
        released_clips: Vec<LayerId>,
        was_active: bool,
    },
    Reorder {
        from: usize,
        to: usize,
    },
    Clear {
        layer_id: LayerId,
        base: PixelSnapshot,
        strokes: Vec<Stroke>,
    },
}

/// Entry discriminant, for logging and observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryKind {
    Create,
    Delete,
    PropertyChange,
    StrokeAdd,
    StrokeRemove,
    Merge,
    Reorder,
    Clear,
}

impl HistoryEntry {
    pub fn kind(&self) -> HistoryKind {
        match self {
            HistoryEntry::Create { .. } => HistoryKind::Create,
            HistoryEntry::Delete { .. } => HistoryKind::Delete,
            HistoryEntry::PropertyChange { .. } => HistoryKind::PropertyChange,
            HistoryEntry::StrokeAdd { .. } => HistoryKind::StrokeAdd,
            HistoryEntry::StrokeRemove { .. } => HistoryKind::StrokeRemove,
            HistoryEntry::Merge { .. } => HistoryKind::Merge,
            HistoryEntry::Reorder { .. } => HistoryKind::Reorder,
            HistoryEntry::Clear { .. } => HistoryKind::Clear,
        }
    }
}

/// Single linear list with a cursor; no branching
#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<HistoryEntry>,
    cursor: usize,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            limit: limit.max(1),
        }
    }

    /// Record a mutation, discarding any redo entries past the cursor
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.truncate(self.cursor);
        self.entries.push(entry);
        if self.entries.len() > self.limit {
            self.entries.remove(0);
        }
        self.cursor = self.entries.len();
    }

    /// Entry `undo` would revert
    pub fn undo_target(&self) -> Option<&HistoryEntry> {
        self.cursor.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    /// Entry `redo` would reapply
    pub fn redo_target(&self) -> Option<&HistoryEntry> {
        self.entries.get(self.cursor)
    }

    pub fn step_back(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn step_forward(&mut self) {
        self.cursor = (self.cursor + 1).min(self.entries.len());
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.entries.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(HISTORY_LIMIT)
    }
}
