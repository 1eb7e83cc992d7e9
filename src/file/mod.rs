//! Persistence of layer payloads through storage collaborators

pub mod storage;

pub use storage::{
    load_async, spawn_save, JsonFileStorage, LayerStorage, MemoryStorage, SaveHandle, SaveOutcome,
};
