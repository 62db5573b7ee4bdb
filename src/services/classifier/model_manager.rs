use crate::config::Config;
use crate::error::AppError;
use crate::models::classify_types::{LoadState, ModelInfo, ModelSource};
use crate::services::classifier::inference::{DemoModel, InferenceModel, OnnxModel};
use crate::services::db::{ModelCache, SqliteModelCache};
use futures::StreamExt;
use ort::session::Session;
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Fixed key the offline copy of the model is stored under.
pub const MODEL_CACHE_KEY: &str = "waste-classifier-model";

const MODEL_NAME: &str = "WasteNet MobileNetV3";
const MODEL_VERSION: &str = "1.0.0";
const MODEL_ACCURACY: f32 = 92.5;

const DEMO_MODEL_NAME: &str = "WasteNet Demo";
const DEMO_MODEL_VERSION: &str = "0.1.0-demo";
const DEMO_MODEL_ACCURACY: f32 = 70.0;

// Content-Length is only a hint; the buffer grows past this as bytes arrive.
const MAX_PREALLOC_BYTES: u64 = 64 << 20;

const SUPPORTED_FORMATS: [&str; 5] = ["image/jpeg", "image/png", "image/webp", "image/bmp", "image/gif"];

/// Turns a serialized model artifact into something that can run inference.
pub trait ModelRuntime: Send + Sync {
    fn load_from_bytes(&self, bytes: &[u8]) -> Result<Box<dyn InferenceModel>, AppError>;
}

/// ONNX Runtime backed model loading.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxRuntime {
    pub use_gpu: bool,
}

impl ModelRuntime for OnnxRuntime {
    fn load_from_bytes(&self, bytes: &[u8]) -> Result<Box<dyn InferenceModel>, AppError> {
        let _ = ort::init().with_name("waste-lense").commit();

        let mut builder = Session::builder()
            .map_err(|e| AppError::ModelLoad(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| AppError::ModelLoad(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(4)
            .map_err(|e| AppError::ModelLoad(format!("Failed to set intra threads: {}", e)))?;

        if self.use_gpu {
            builder = builder
                .with_execution_providers([
                    ort::execution_providers::DirectMLExecutionProvider::default().build(),
                    ort::execution_providers::CoreMLExecutionProvider::default().build(),
                    ort::execution_providers::CUDAExecutionProvider::default().build(),
                    ort::execution_providers::CPUExecutionProvider::default().build(),
                ])
                .map_err(|e| AppError::ModelLoad(format!("Failed to register GPU execution providers: {}", e)))?;
        } else {
            builder = builder
                .with_execution_providers([ort::execution_providers::CPUExecutionProvider::default().build()])
                .map_err(|e| AppError::ModelLoad(format!("Failed to register CPU execution provider: {}", e)))?;
        }

        let session = builder
            .commit_from_memory(bytes)
            .map_err(|e| AppError::ModelLoad(format!("Failed to load ONNX model: {}", e)))?;

        Ok(Box::new(OnnxModel::new(session)))
    }
}

pub type SharedModel = Arc<std::sync::Mutex<Option<Box<dyn InferenceModel>>>>;

/// Owns the one on-device model for the process.
///
/// Cheap to clone; all clones share the same model slot, state and load
/// guard, so at most one load runs at a time.
#[derive(Clone)]
pub struct ModelManager {
    remote_model_url: Option<String>,
    demo_seed: u64,
    client: reqwest::Client,
    cache: Arc<dyn ModelCache>,
    runtime: Arc<dyn ModelRuntime>,
    model: SharedModel,
    info: Arc<RwLock<Option<ModelInfo>>>,
    load_guard: Arc<Mutex<()>>,
    persist_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ModelManager {
    pub fn new(
        config: &Config,
        cache: Arc<dyn ModelCache>,
        runtime: Arc<dyn ModelRuntime>,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            remote_model_url: config.remote_model_url.clone(),
            demo_seed: config.demo_seed,
            client,
            cache,
            runtime,
            model: Arc::new(std::sync::Mutex::new(None)),
            info: Arc::new(RwLock::new(None)),
            load_guard: Arc::new(Mutex::new(())),
            persist_task: Arc::new(Mutex::new(None)),
        })
    }

    /// SQLite cache under the data dir and the ONNX runtime.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let cache = SqliteModelCache::new(config.cache_path())?;
        let runtime = OnnxRuntime {
            use_gpu: config.use_gpu,
        };
        Self::new(config, Arc::new(cache), Arc::new(runtime))
    }

    pub fn model_info(&self) -> Option<ModelInfo> {
        self.info.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn load_state(&self) -> Option<LoadState> {
        self.info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|i| i.load_state)
    }

    pub fn is_ready(&self) -> bool {
        self.load_state() == Some(LoadState::Loaded)
    }

    pub fn is_loading(&self) -> bool {
        self.load_state() == Some(LoadState::Loading)
    }

    pub fn last_error(&self) -> Option<String> {
        self.model_info().and_then(|i| i.error)
    }

    pub fn get_model_lock(&self) -> SharedModel {
        self.model.clone()
    }

    fn set_info(&self, info: ModelInfo) {
        *self.info.write().unwrap_or_else(PoisonError::into_inner) = Some(info);
    }

    fn set_model(&self, model: Option<Box<dyn InferenceModel>>) {
        *self.model.lock().unwrap_or_else(PoisonError::into_inner) = model;
    }

    /// Whether the offline cache holds a model.
    pub async fn has_cached_model(&self) -> bool {
        let cache = self.cache.clone();
        matches!(
            tokio::task::spawn_blocking(move || cache.contains(MODEL_CACHE_KEY)).await,
            Ok(Ok(true))
        )
    }

    /// Drops the offline copy; the loaded model, if any, stays in memory.
    pub async fn clear_cache(&self) -> Result<(), AppError> {
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || cache.remove(MODEL_CACHE_KEY))
            .await
            .map_err(|e| AppError::Cache(format!("Cache task failed: {}", e)))??;
        tracing::info!("Offline model cache cleared");
        Ok(())
    }

    /// Loads the model unless one is already loaded.
    ///
    /// Callers that arrive while another load is in flight wait for it and
    /// then see its outcome instead of starting a second load.
    pub async fn load(&self) -> Result<ModelInfo, AppError> {
        let _guard = self.load_guard.lock().await;
        if let Some(info) = self.model_info() {
            if info.load_state == LoadState::Loaded {
                return Ok(info);
            }
        }
        self.load_locked().await
    }

    /// Starts a fresh load attempt even if a model is loaded.
    pub async fn reload(&self) -> Result<ModelInfo, AppError> {
        let _guard = self.load_guard.lock().await;
        self.load_locked().await
    }

    pub async fn unload(&self) {
        let _guard = self.load_guard.lock().await;
        self.set_model(None);
        *self.info.write().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::info!("Model unloaded");
    }

    /// Waits for a pending background cache write, if any.
    pub async fn wait_for_persist(&self) {
        let handle = self.persist_task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn load_locked(&self) -> Result<ModelInfo, AppError> {
        let mut info = new_model_info();
        info.load_state = LoadState::Loading;
        self.set_info(info.clone());
        tracing::info!("Model load started");

        match self.load_from_sources().await {
            Ok((model, source)) => {
                self.set_model(Some(model));
                info.load_state = LoadState::Loaded;
                info.source = Some(source);
                match source {
                    ModelSource::Cache => info.offline_capable = true,
                    ModelSource::Remote => info.offline_capable = false,
                    ModelSource::Demo => {
                        info.name = DEMO_MODEL_NAME.to_string();
                        info.version = DEMO_MODEL_VERSION.to_string();
                        info.accuracy_percent = DEMO_MODEL_ACCURACY;
                        info.offline_capable = true;
                    }
                }
                self.set_info(info.clone());
                tracing::info!(
                    "Model loaded from {:?}: {} v{} (offline_capable={})",
                    source,
                    info.name,
                    info.version,
                    info.offline_capable
                );
                Ok(info)
            }
            Err(e) => {
                self.set_model(None);
                info.load_state = LoadState::Error;
                info.error = Some(e.to_string());
                self.set_info(info);
                tracing::error!("Model load failed: {}", e);
                Err(e)
            }
        }
    }

    // Sources in priority order: offline cache, remote artifact, demo model.
    // A source that fails is logged and skipped; only a crashed worker task
    // aborts the whole attempt.
    async fn load_from_sources(&self) -> Result<(Box<dyn InferenceModel>, ModelSource), AppError> {
        match self.read_cache().await? {
            Ok(Some(bytes)) => match self.build_model(bytes).await? {
                Ok(model) => return Ok((model, ModelSource::Cache)),
                Err(e) => tracing::warn!("Cached model unusable, trying next source: {}", e),
            },
            Ok(None) => tracing::debug!("No cached model under '{}'", MODEL_CACHE_KEY),
            Err(e) => tracing::warn!("Failed to read model cache: {}", e),
        }

        if let Some(url) = self.remote_model_url.clone() {
            match self.download_model(&url).await {
                Ok(bytes) => match self.build_model(bytes.clone()).await? {
                    Ok(model) => {
                        self.persist_in_background(bytes).await;
                        return Ok((model, ModelSource::Remote));
                    }
                    Err(e) => tracing::warn!("Remote model from {} unusable: {}", url, e),
                },
                Err(e) => tracing::warn!("Failed to fetch remote model from {}: {}", url, e),
            }
        }

        tracing::info!("Falling back to built-in demo model");
        let demo: Box<dyn InferenceModel> = Box::new(DemoModel::new(self.demo_seed));
        Ok((demo, ModelSource::Demo))
    }

    // Outer error: the blocking task itself failed. Inner error: the cache read failed.
    async fn read_cache(&self) -> Result<Result<Option<Vec<u8>>, AppError>, AppError> {
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || cache.load(MODEL_CACHE_KEY))
            .await
            .map_err(|e| AppError::ModelLoad(format!("Cache read task failed: {}", e)))
    }

    // Outer error: the blocking task itself failed. Inner error: the bytes are not a usable model.
    async fn build_model(
        &self,
        bytes: Vec<u8>,
    ) -> Result<Result<Box<dyn InferenceModel>, AppError>, AppError> {
        let runtime = self.runtime.clone();
        tokio::task::spawn_blocking(move || runtime.load_from_bytes(&bytes))
            .await
            .map_err(|e| AppError::ModelLoad(format!("Model build task failed: {}", e)))
    }

    async fn download_model(&self, url: &str) -> Result<Vec<u8>, AppError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::ModelLoad(format!("Failed to request {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(AppError::ModelLoad(format!(
                "Failed to download {}: HTTP {}",
                url,
                response.status()
            )));
        }

        let total_size = response.content_length().unwrap_or(0);
        let mut bytes = Vec::with_capacity(total_size.min(MAX_PREALLOC_BYTES) as usize);
        let mut stream = response.bytes_stream();
        let mut last_logged = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| AppError::ModelLoad(format!("Failed to download {}: {}", url, e)))?;
            bytes.extend_from_slice(&chunk);

            if total_size > 0 {
                let progress = (bytes.len() as u64 * 100) / total_size;
                if progress >= last_logged + 10 {
                    tracing::debug!("Model download {}%", progress);
                    last_logged = progress;
                }
            }
        }

        tracing::info!("Downloaded model artifact ({} bytes)", bytes.len());
        Ok(bytes)
    }

    async fn persist_in_background(&self, bytes: Vec<u8>) {
        let cache = self.cache.clone();
        let handle = tokio::task::spawn_blocking(move || match cache.save(MODEL_CACHE_KEY, &bytes) {
            Ok(()) => tracing::info!("Model saved to offline cache"),
            Err(e) => tracing::warn!("Failed to save model to offline cache: {}", e),
        });
        *self.persist_task.lock().await = Some(handle);
    }
}

fn new_model_info() -> ModelInfo {
    ModelInfo {
        name: MODEL_NAME.to_string(),
        version: MODEL_VERSION.to_string(),
        accuracy_percent: MODEL_ACCURACY,
        supported_formats: SUPPORTED_FORMATS.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        load_state: LoadState::Idle,
        offline_capable: false,
        source: None,
        error: None,
    }
}
