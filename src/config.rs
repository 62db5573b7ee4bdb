use crate::error::AppError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "WASTE_LENSE_";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DEMO_SEED: u64 = 42;

pub fn default_log_filter() -> &'static str {
    "waste_lense=info"
}

/// Read-only settings. Presence of `remote_model_url` and `api_endpoint`
/// decides which load sources and backends are eligible.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote_model_url: Option<String>,
    pub api_endpoint: Option<String>,
    pub api_key: Option<String>,
    pub data_dir: PathBuf,
    pub use_gpu: bool,
    pub request_timeout_secs: u64,
    pub demo_seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote_model_url: None,
            api_endpoint: None,
            api_key: None,
            data_dir: default_data_dir(),
            use_gpu: false,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            demo_seed: DEFAULT_DEMO_SEED,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("waste-lense")
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config JSON: {}", e)))?;
        Ok(config.normalized())
    }

    /// Overrides from `WASTE_LENSE_*` environment variables.
    pub fn with_env(self) -> Result<Self, AppError> {
        self.with_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    /// Applies overrides from `lookup`, which maps an unprefixed key such as
    /// `API_ENDPOINT` to its value.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("REMOTE_MODEL_URL") {
            self.remote_model_url = Some(v);
        }
        if let Some(v) = lookup("API_ENDPOINT") {
            self.api_endpoint = Some(v);
        }
        if let Some(v) = lookup("API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = lookup("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("USE_GPU") {
            self.use_gpu = parse_bool(&v)
                .ok_or_else(|| AppError::Config(format!("Invalid boolean for USE_GPU: {}", v)))?;
        }
        if let Some(v) = lookup("TIMEOUT_SECS") {
            self.request_timeout_secs = v
                .trim()
                .parse()
                .map_err(|e| AppError::Config(format!("Invalid TIMEOUT_SECS '{}': {}", v, e)))?;
        }
        Ok(self.normalized())
    }

    // Blank strings are treated the same as absent values.
    fn normalized(mut self) -> Self {
        self.remote_model_url = non_blank(self.remote_model_url);
        self.api_endpoint = non_blank(self.api_endpoint);
        self.api_key = non_blank(self.api_key);
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = DEFAULT_TIMEOUT_SECS;
        }
        self
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("model_cache.db")
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
