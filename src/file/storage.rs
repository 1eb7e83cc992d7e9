//! Layer persistence through a storage collaborator
//!
//! Storage backends are synchronous; callers run them on tokio's blocking
//! pool so the drawing thread never waits on I/O.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::core::contracts::LayerSaveData;
use crate::core::errors::CoreError;
use crate::layer::StackSnapshot;

/// Where layer payloads are kept between sessions
pub trait LayerStorage: Send + Sync {
    /// `None` when nothing has been saved yet
    fn load_layers(&self) -> Result<Option<LayerSaveData>, CoreError>;

    fn save_layers(&self, data: &LayerSaveData) -> Result<(), CoreError>;
}

/// In-process storage, for tests and previews
#[derive(Default)]
pub struct MemoryStorage {
    slot: Mutex<Option<LayerSaveData>>,
    saves: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: LayerSaveData) -> Self {
        Self {
            slot: Mutex::new(Some(data)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Completed `save_layers` calls
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Acquire)
    }

    pub fn current(&self) -> Option<LayerSaveData> {
        self.slot.lock().clone()
    }
}

impl LayerStorage for MemoryStorage {
    fn load_layers(&self) -> Result<Option<LayerSaveData>, CoreError> {
        Ok(self.slot.lock().clone())
    }

    fn save_layers(&self, data: &LayerSaveData) -> Result<(), CoreError> {
        *self.slot.lock() = Some(data.clone());
        self.saves.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// One JSON document on disk
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/inkstone/layers.json`
    pub fn default_location() -> Self {
        let dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("inkstone");
        Self::new(dir.join("layers.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LayerStorage for JsonFileStorage {
    fn load_layers(&self) -> Result<Option<LayerSaveData>, CoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&self.path)?;
        let data = serde_json::from_str(&json)?;
        tracing::debug!("[Storage] Loaded {}", self.path.display());
        Ok(Some(data))
    }

    fn save_layers(&self, data: &LayerSaveData) -> Result<(), CoreError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        // Write then rename so a crash never leaves a truncated document
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string(data)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!("[Storage] Saved {}", self.path.display());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    Cancelled,
}

/// An in-flight save; dropping it lets the save finish in the background
pub struct SaveHandle {
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<Result<SaveOutcome, CoreError>>,
}

impl SaveHandle {
    /// Ask the save to stop before its next step; a write already under way
    /// completes
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<SaveOutcome, CoreError> {
        self.task
            .await
            .map_err(|e| CoreError::Task(e.to_string()))?
    }
}

/// Encode and write a snapshot on the blocking pool
///
/// Must be called from within a tokio runtime.
pub fn spawn_save(storage: Arc<dyn LayerStorage>, snapshot: StackSnapshot) -> SaveHandle {
    start_save(storage, snapshot, Arc::new(AtomicBool::new(false)))
}

fn start_save(
    storage: Arc<dyn LayerStorage>,
    snapshot: StackSnapshot,
    cancelled: Arc<AtomicBool>,
) -> SaveHandle {
    let flag = Arc::clone(&cancelled);
    let task = tokio::task::spawn_blocking(move || -> Result<SaveOutcome, CoreError> {
        if flag.load(Ordering::Acquire) {
            return Ok(SaveOutcome::Cancelled);
        }
        let data = snapshot.to_save_data()?;
        if flag.load(Ordering::Acquire) {
            tracing::debug!("[Storage] Save cancelled after encoding");
            return Ok(SaveOutcome::Cancelled);
        }
        storage.save_layers(&data)?;
        tracing::info!("[Storage] Saved {} layers", data.layers.len());
        Ok(SaveOutcome::Saved)
    });
    SaveHandle { cancelled, task }
}

/// Read from storage on the blocking pool
pub async fn load_async(storage: Arc<dyn LayerStorage>) -> Result<Option<LayerSaveData>, CoreError> {
    tokio::task::spawn_blocking(move || storage.load_layers())
        .await
        .map_err(|e| CoreError::Task(e.to_string()))?
}
