pub mod inference;
pub mod model_manager;
pub mod orchestrator;
pub mod remote;

#[cfg(test)]
pub(crate) mod test_support {
    use super::inference::InferenceModel;
    use super::model_manager::{ModelManager, ModelRuntime};
    use crate::config::Config;
    use crate::error::AppError;
    use crate::services::db::ModelCache;
    use ndarray::Array4;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;

    /// Accepted by `FakeRuntime`; scores Recyclable highest.
    pub const FAKE_MODEL_BYTES: &[u8] = b"fake-onnx-model";
    /// Accepted by `FakeRuntime`; every forward pass fails.
    pub const FAILING_MODEL_BYTES: &[u8] = b"failing-onnx-model";

    pub struct FixedModel(pub Vec<f32>);

    impl InferenceModel for FixedModel {
        fn predict(&mut self, _input: Array4<f32>) -> Result<Vec<f32>, AppError> {
            Ok(self.0.clone())
        }
    }

    pub struct FailingModel;

    impl InferenceModel for FailingModel {
        fn predict(&mut self, _input: Array4<f32>) -> Result<Vec<f32>, AppError> {
            Err(AppError::Inference("device lost".to_string()))
        }
    }

    #[derive(Default)]
    pub struct FakeRuntime {
        loads: AtomicUsize,
    }

    impl FakeRuntime {
        /// Number of successful model builds.
        pub fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    impl ModelRuntime for FakeRuntime {
        fn load_from_bytes(&self, bytes: &[u8]) -> Result<Box<dyn InferenceModel>, AppError> {
            let model: Box<dyn InferenceModel> = if bytes == FAKE_MODEL_BYTES {
                Box::new(FixedModel(vec![0.1, 3.0, 0.2]))
            } else if bytes == FAILING_MODEL_BYTES {
                Box::new(FailingModel)
            } else {
                return Err(AppError::ModelLoad("not an ONNX model".to_string()));
            };
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(model)
        }
    }

    /// Builds models like `FakeRuntime`, but each build blocks until the
    /// paired sender signals (or is dropped).
    pub struct GatedRuntime {
        release: std::sync::Mutex<mpsc::Receiver<()>>,
    }

    impl GatedRuntime {
        pub fn new() -> (Self, mpsc::Sender<()>) {
            let (tx, rx) = mpsc::channel();
            (
                Self {
                    release: std::sync::Mutex::new(rx),
                },
                tx,
            )
        }
    }

    impl ModelRuntime for GatedRuntime {
        fn load_from_bytes(&self, bytes: &[u8]) -> Result<Box<dyn InferenceModel>, AppError> {
            let _ = self.release.lock().unwrap().recv();
            FakeRuntime::default().load_from_bytes(bytes)
        }
    }

    pub struct PanickingRuntime;

    impl ModelRuntime for PanickingRuntime {
        fn load_from_bytes(&self, _bytes: &[u8]) -> Result<Box<dyn InferenceModel>, AppError> {
            panic!("runtime crashed");
        }
    }

    pub struct FailingCache;

    impl ModelCache for FailingCache {
        fn save(&self, _key: &str, _blob: &[u8]) -> Result<(), AppError> {
            Err(AppError::Cache("disk full".to_string()))
        }

        fn load(&self, _key: &str) -> Result<Option<Vec<u8>>, AppError> {
            Ok(None)
        }

        fn contains(&self, _key: &str) -> Result<bool, AppError> {
            Ok(false)
        }

        fn remove(&self, _key: &str) -> Result<(), AppError> {
            Err(AppError::Cache("disk full".to_string()))
        }
    }

    pub fn manager_with(
        remote_model_url: Option<String>,
        cache: Arc<dyn ModelCache>,
        runtime: Arc<dyn ModelRuntime>,
    ) -> ModelManager {
        let config = Config {
            remote_model_url,
            request_timeout_secs: 5,
            ..Config::default()
        };
        ModelManager::new(&config, cache, runtime).unwrap()
    }
}
