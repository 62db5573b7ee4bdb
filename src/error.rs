use serde::{Serialize, Serializer};

/// Errors raised inside the classification core.
///
/// None of these ever leave `WasteClassifier::classify`; the orchestrator
/// turns every backend failure into a simulated result.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Remote classification endpoint is not configured")]
    NotConfigured,

    #[error("Remote API error: {0}")]
    RemoteApi(String),

    #[error("Model cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Short machine-readable kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::ModelLoad(_) => "model_load",
            AppError::Inference(_) => "inference",
            AppError::NotConfigured => "not_configured",
            AppError::RemoteApi(_) => "remote_api",
            AppError::Cache(_) => "cache",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
        }
    }
}

// Command surfaces report errors as a plain message.
impl Serialize for AppError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Cache(err.to_string())
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::Inference(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::RemoteApi(err.to_string())
    }
}
