use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Layer limit reached: at most {max} layers are allowed")]
    LayerLimit { max: usize },

    #[error("Surface allocation failed: {width}x{height} ({bytes} bytes)")]
    SurfaceAllocation { width: u32, height: u32, bytes: usize },

    #[error("Invalid import payload: {0}")]
    InvalidImport(String),

    #[error("Unsupported payload version: {0}")]
    UnsupportedVersion(u32),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl CoreError {
    /// Resource errors are recoverable by lowering rendering quality.
    pub fn is_resource_error(&self) -> bool {
        matches!(self, CoreError::SurfaceAllocation { .. })
    }
}

impl From<CoreError> for String {
    fn from(e: CoreError) -> Self {
        e.to_string()
    }
}
