//! Per-call backend selection.
//!
//! ```text
//!   request ──▶ select_backend(availability, request)
//!                 │ Loaded model + Image      ──▶ OnDevice ─┐
//!                 │ endpoint + File           ──▶ Remote   ─┤ error
//!                 │ otherwise                 ──▶ Simulated ◀┘ (once)
//!                 ▼
//!              enrich ──▶ ClassificationResult
//! ```
//!
//! `classify` never fails: any backend error drops to the simulated
//! classifier exactly once, with no further retries.

use crate::config::Config;
use crate::error::AppError;
use crate::models::classify_types::{
    Backend, ClassificationRequest, ClassificationResult, ModelInfo, RawPrediction, WasteCategory,
};
use crate::services::classifier::inference::classify_on_device;
use crate::services::classifier::model_manager::ModelManager;
use crate::services::classifier::remote::RemoteClassifier;
use crate::services::enrichment::{self, FacilityLookup, StaticFacilities};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Simulated latency window in milliseconds.
pub const SIMULATED_DELAY_MS: RangeInclusive<u64> = 350..=750;
/// Simulated confidence window.
pub const SIMULATED_CONFIDENCE: RangeInclusive<u8> = 85..=99;

/// Which backends could serve a call right now. Computed fresh every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendAvailability {
    pub model_loaded: bool,
    pub remote_configured: bool,
}

/// Picks the backend for a request. The request shape is a capability
/// constraint: only decoded images run on-device, only file blobs go remote.
pub fn select_backend(availability: &BackendAvailability, request: &ClassificationRequest) -> Backend {
    match request {
        ClassificationRequest::Image(_) if availability.model_loaded => Backend::OnDevice,
        ClassificationRequest::File(_) if availability.remote_configured => Backend::Remote,
        _ => Backend::Simulated,
    }
}

pub struct WasteClassifier {
    model_manager: ModelManager,
    remote: RemoteClassifier,
    facilities: Arc<dyn FacilityLookup>,
    rng: Mutex<StdRng>,
}

impl WasteClassifier {
    pub fn new(
        model_manager: ModelManager,
        remote: RemoteClassifier,
        facilities: Arc<dyn FacilityLookup>,
    ) -> Self {
        Self {
            model_manager,
            remote,
            facilities,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Production wiring: SQLite cache, ONNX runtime, static facilities.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Ok(Self::new(
            ModelManager::from_config(config)?,
            RemoteClassifier::new(config)?,
            Arc::new(StaticFacilities),
        ))
    }

    /// Replaces the random source with a seeded one.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn model_manager(&self) -> &ModelManager {
        &self.model_manager
    }

    pub fn model_info(&self) -> Option<ModelInfo> {
        self.model_manager.model_info()
    }

    pub fn is_ready(&self) -> bool {
        self.model_manager.is_ready()
    }

    pub fn availability(&self) -> BackendAvailability {
        BackendAvailability {
            model_loaded: self.model_manager.is_ready(),
            remote_configured: self.remote.is_configured(),
        }
    }

    pub async fn classify(&self, request: ClassificationRequest) -> ClassificationResult {
        let availability = self.availability();
        let backend = select_backend(&availability, &request);
        tracing::info!("Classifying {} request via {:?}", request.kind(), backend);

        let attempt = match (backend, request) {
            (Backend::OnDevice, ClassificationRequest::Image(image)) => {
                Some(classify_on_device(&self.model_manager, image).await)
            }
            (Backend::Remote, ClassificationRequest::File(blob)) => Some(self.remote.classify(&blob).await),
            _ => None,
        };

        let raw = match attempt {
            Some(Ok(raw)) => raw,
            Some(Err(e)) => {
                tracing::warn!(
                    kind = e.kind(),
                    "{:?} backend failed, falling back to simulation: {}",
                    backend,
                    e
                );
                self.simulate().await
            }
            None => self.simulate().await,
        };

        let profile_index = self.with_rng(|rng| rng.gen::<usize>());
        let result = enrichment::enrich(raw, profile_index, self.facilities.as_ref());
        tracing::info!(
            "Classified as {} ({}%) by {:?} in {} ms",
            result.category,
            result.confidence,
            result.backend,
            result.processing_time_ms
        );
        result
    }

    /// Emulates backend latency and returns a random category.
    async fn simulate(&self) -> RawPrediction {
        let start = tokio::time::Instant::now();
        let (delay_ms, category, confidence) = self.with_rng(|rng| {
            let delay = rng.gen_range(SIMULATED_DELAY_MS);
            let category = WasteCategory::ALL[rng.gen_range(0..WasteCategory::ALL.len())];
            let confidence = rng.gen_range(SIMULATED_CONFIDENCE);
            (delay, category, confidence)
        });

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        RawPrediction {
            category,
            confidence,
            processing_time_ms: start.elapsed().as_millis() as u64,
            image_analysis: None,
            sub_category: None,
            material: None,
            backend: Backend::Simulated,
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::classify_types::{FileBlob, ImageQuality};
    use crate::services::classifier::model_manager::{ModelRuntime, MODEL_CACHE_KEY};
    use crate::services::classifier::test_support::{
        manager_with, FakeRuntime, GatedRuntime, FAILING_MODEL_BYTES, FAKE_MODEL_BYTES,
    };
    use crate::services::db::{ModelCache, SqliteModelCache};
    use image::{DynamicImage, Rgb, RgbImage};
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gray_image(value: u8) -> ClassificationRequest {
        ClassificationRequest::Image(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            64,
            64,
            Rgb([value, value, value]),
        )))
    }

    fn file_request() -> ClassificationRequest {
        ClassificationRequest::File(FileBlob::new(vec![1, 2, 3], "can.png", "image/png"))
    }

    fn classifier(cached_model: Option<&[u8]>, api_endpoint: Option<String>) -> WasteClassifier {
        let cache = Arc::new(SqliteModelCache::in_memory().unwrap());
        if let Some(bytes) = cached_model {
            cache.save(MODEL_CACHE_KEY, bytes).unwrap();
        }
        let runtime: Arc<dyn ModelRuntime> = Arc::new(FakeRuntime::default());
        let manager = manager_with(None, cache, runtime);
        let config = Config {
            api_endpoint,
            request_timeout_secs: 5,
            ..Config::default()
        };
        WasteClassifier::new(manager, RemoteClassifier::new(&config).unwrap(), Arc::new(StaticFacilities))
            .with_seed(7)
    }

    fn assert_simulated(result: &ClassificationResult) {
        assert_eq!(result.backend, Backend::Simulated);
        assert!(SIMULATED_CONFIDENCE.contains(&result.confidence));
        assert!(result.processing_time_ms >= *SIMULATED_DELAY_MS.start());
        assert!(result.image_analysis.is_none());
    }

    #[test]
    fn test_select_backend_matrix() {
        let all = BackendAvailability {
            model_loaded: true,
            remote_configured: true,
        };
        let none = BackendAvailability {
            model_loaded: false,
            remote_configured: false,
        };
        assert_eq!(select_backend(&all, &gray_image(10)), Backend::OnDevice);
        assert_eq!(select_backend(&all, &file_request()), Backend::Remote);
        assert_eq!(select_backend(&none, &gray_image(10)), Backend::Simulated);
        assert_eq!(select_backend(&none, &file_request()), Backend::Simulated);

        let remote_only = BackendAvailability {
            model_loaded: false,
            remote_configured: true,
        };
        assert_eq!(select_backend(&remote_only, &gray_image(10)), Backend::Simulated);
        let model_only = BackendAvailability {
            model_loaded: true,
            remote_configured: false,
        };
        assert_eq!(select_backend(&model_only, &file_request()), Backend::Simulated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_backends_simulates_within_window() {
        let classifier = classifier(None, None);
        assert!(!classifier.is_ready());
        assert!(classifier.model_info().is_none());

        for request in [gray_image(128), file_request()] {
            let result = classifier.classify(request).await;
            assert_simulated(&result);
            assert!(SIMULATED_DELAY_MS.contains(&result.processing_time_ms));
            assert!(WasteCategory::ALL.contains(&result.category));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_same_simulated_result() {
        let a = classifier(None, None).classify(file_request()).await;
        let b = classifier(None, None).classify(file_request()).await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_loaded_model_classifies_on_device() {
        let classifier = classifier(Some(FAKE_MODEL_BYTES), None);
        classifier.model_manager().load().await.unwrap();
        assert!(classifier.is_ready());

        let result = classifier.classify(gray_image(128)).await;
        assert_eq!(result.backend, Backend::OnDevice);
        assert_eq!(result.category, WasteCategory::Recyclable);
        let analysis = result.image_analysis.as_ref().unwrap();
        assert_eq!(analysis.quality, ImageQuality::Good);
        assert!((analysis.clarity - 52.0).abs() < 0.01);
        assert!(result.confidence <= 99);
        assert_eq!(result.details.recommendations, enrichment::recommendations(WasteCategory::Recyclable));
    }

    #[tokio::test]
    async fn test_dark_image_lowers_confidence() {
        let classifier = classifier(Some(FAKE_MODEL_BYTES), None);
        classifier.model_manager().load().await.unwrap();

        let bright = classifier.classify(gray_image(128)).await;
        let dark = classifier.classify(gray_image(20)).await;
        assert_eq!(dark.backend, Backend::OnDevice);
        assert!(dark.confidence < bright.confidence);
    }

    #[tokio::test]
    async fn test_inference_failure_falls_back_to_simulation() {
        let classifier = classifier(Some(FAILING_MODEL_BYTES), None);
        classifier.model_manager().load().await.unwrap();

        let result = classifier.classify(gray_image(128)).await;
        assert_simulated(&result);
    }

    #[tokio::test]
    async fn test_extreme_aspect_image_falls_back_to_simulation() {
        let classifier = classifier(Some(FAKE_MODEL_BYTES), None);
        classifier.model_manager().load().await.unwrap();

        let strip = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 100_000, Rgb([128, 128, 128])));
        let result = classifier.classify(ClassificationRequest::Image(strip)).await;
        assert_simulated(&result);
    }

    #[tokio::test]
    async fn test_classify_while_loading_simulates() {
        let cache = Arc::new(SqliteModelCache::in_memory().unwrap());
        cache.save(MODEL_CACHE_KEY, FAKE_MODEL_BYTES).unwrap();
        let (runtime, release) = GatedRuntime::new();
        let manager = manager_with(None, cache, Arc::new(runtime));
        let remote = RemoteClassifier::new(&Config::default()).unwrap();
        let classifier = WasteClassifier::new(manager.clone(), remote, Arc::new(StaticFacilities)).with_seed(3);

        let loader = manager.clone();
        let handle = tokio::spawn(async move { loader.load().await });
        while !manager.is_loading() {
            tokio::task::yield_now().await;
        }

        assert!(!classifier.availability().model_loaded);
        let result = classifier.classify(gray_image(128)).await;
        assert_simulated(&result);
        assert!(manager.is_loading());

        release.send(()).unwrap();
        handle.await.unwrap().unwrap();
        let result = classifier.classify(gray_image(128)).await;
        assert_eq!(result.backend, Backend::OnDevice);
    }

    #[tokio::test]
    async fn test_remote_500_falls_back_to_simulation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let classifier = classifier(None, Some(server.uri()));
        let result = classifier.classify(file_request()).await;
        assert_simulated(&result);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_remote_result_is_enriched_locally() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "category": "hazardous",
                "confidence": 0.97,
                "recommendations": ["Put it in the sink"]
            })))
            .mount(&server)
            .await;

        let classifier = classifier(None, Some(server.uri()));
        let result = classifier.classify(file_request()).await;
        assert_eq!(result.backend, Backend::Remote);
        assert_eq!(result.category, WasteCategory::Hazardous);
        assert_eq!(result.confidence, 97);
        assert_eq!(result.details.recommendations, enrichment::recommendations(WasteCategory::Hazardous));
        assert_eq!(result.alternative_disposal, enrichment::alternative_disposal(WasteCategory::Hazardous));
    }
}
