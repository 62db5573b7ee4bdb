use crate::config::Config;
use crate::error::AppError;
use crate::models::classify_types::{Backend, FileBlob, RawPrediction, WasteCategory};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;

const MAX_CONFIDENCE: f64 = 99.0;

/// Client for an external classification endpoint.
#[derive(Clone)]
pub struct RemoteClassifier {
    endpoint: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl RemoteClassifier {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.api_endpoint.clone(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Uploads the file as multipart form data and parses the reply.
    pub async fn classify(&self, blob: &FileBlob) -> Result<RawPrediction, AppError> {
        let endpoint = self.endpoint.as_deref().ok_or(AppError::NotConfigured)?;
        let start = tokio::time::Instant::now();

        let part = Part::bytes(blob.bytes.clone())
            .file_name(blob.file_name.clone())
            .mime_str(&blob.mime_type)
            .map_err(|e| AppError::RemoteApi(format!("Invalid MIME type '{}': {}", blob.mime_type, e)))?;
        let form = Form::new().part("image", part);

        let mut request = self.client.post(endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::RemoteApi(status.to_string()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::RemoteApi(format!("Failed to parse response body: {}", e)))?;

        let mut prediction = parse_response(&body)?;
        prediction.processing_time_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            "Remote API classified {} as {} ({}%)",
            blob.file_name,
            prediction.category,
            prediction.confidence
        );
        Ok(prediction)
    }
}

/// Reads the fields we understand; anything else is ignored.
pub fn parse_response(body: &Value) -> Result<RawPrediction, AppError> {
    let category: WasteCategory = body
        .get("category")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::RemoteApi("Response has no category".to_string()))?
        .parse()
        .map_err(AppError::RemoteApi)?;

    let confidence = body
        .get("confidence")
        .map(normalize_confidence)
        .unwrap_or(0);

    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| body.get(*k).and_then(Value::as_str))
            .map(str::to_string)
    };

    Ok(RawPrediction {
        category,
        confidence,
        processing_time_ms: 0,
        image_analysis: None,
        sub_category: text(&["subCategory", "sub_category"]),
        material: text(&["material"]),
        backend: Backend::Remote,
    })
}

// Integers are percentages. Floats up to 1.0 are probabilities, larger
// floats are percentages. Non-numbers count as 0.
fn normalize_confidence(raw: &Value) -> u8 {
    let percent = match (raw.as_i64(), raw.as_u64(), raw.as_f64()) {
        (Some(i), _, _) => i as f64,
        (None, Some(u), _) => u as f64,
        (None, None, Some(f)) if f.is_finite() && f <= 1.0 => f * 100.0,
        (None, None, Some(f)) if f.is_finite() => f,
        _ => return 0,
    };
    percent.clamp(0.0, MAX_CONFIDENCE).round() as u8
}
