use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WasteCategory {
    Biodegradable,
    Recyclable,
    Hazardous,
}

impl WasteCategory {
    /// Categories in model output order.
    pub const ALL: [WasteCategory; 3] = [
        WasteCategory::Biodegradable,
        WasteCategory::Recyclable,
        WasteCategory::Hazardous,
    ];

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WasteCategory::Biodegradable => "Biodegradable",
            WasteCategory::Recyclable => "Recyclable",
            WasteCategory::Hazardous => "Hazardous",
        }
    }
}

impl fmt::Display for WasteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WasteCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "biodegradable" => Ok(WasteCategory::Biodegradable),
            "recyclable" => Ok(WasteCategory::Recyclable),
            "hazardous" => Ok(WasteCategory::Hazardous),
            other => Err(format!("unknown waste category '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ImageQuality {
    Good,
    Fair,
    Poor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightingCondition {
    Good,
    Low,
    Overexposed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ImageQualityReport {
    pub quality: ImageQuality,
    pub lighting_condition: LightingCondition,
    pub clarity: f32,
    pub object_count: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EnvironmentalImpact {
    pub co2_saved_kg: f64,
    pub energy_saved_kwh: f64,
    pub water_saved_liters: f64,
    pub decomposition_time: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClassificationDetails {
    pub sub_category: String,
    pub material: String,
    pub recommendations: Vec<String>,
    pub environmental_impact: EnvironmentalImpact,
    pub reduction_tips: Vec<String>,
    pub nearby_facilities: Vec<String>,
}

/// Which backend produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    OnDevice,
    Remote,
    Simulated,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClassificationResult {
    pub category: WasteCategory,
    pub confidence: u8,
    pub processing_time_ms: u64,
    pub image_analysis: Option<ImageQualityReport>,
    pub details: ClassificationDetails,
    pub alternative_disposal: Vec<String>,
    pub carbon_footprint_kg: f64,
    pub backend: Backend,
}

/// Backend output before enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPrediction {
    pub category: WasteCategory,
    pub confidence: u8,
    pub processing_time_ms: u64,
    pub image_analysis: Option<ImageQualityReport>,
    pub sub_category: Option<String>,
    pub material: Option<String>,
    pub backend: Backend,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    Idle,
    Loading,
    Loaded,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSource {
    Cache,
    Remote,
    Demo,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    pub version: String,
    pub accuracy_percent: f32,
    pub supported_formats: BTreeSet<String>,
    pub load_state: LoadState,
    pub offline_capable: bool,
    pub source: Option<ModelSource>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ModelStatus {
    pub cached: bool,
    pub loading: bool,
    pub ready: bool,
    pub error: Option<String>,
    pub info: Option<ModelInfo>,
}

/// An undecoded image file, as handed over by an upload form or file picker.
#[derive(Debug, Clone)]
pub struct FileBlob {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
}

impl FileBlob {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn decode(&self) -> Result<DynamicImage, image::ImageError> {
        image::load_from_memory(&self.bytes)
    }
}

pub enum ClassificationRequest {
    Image(DynamicImage),
    File(FileBlob),
}

impl ClassificationRequest {
    /// Reads a file from disk into a `File` request.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let mime_type = mime_for_path(path).to_string();
        Ok(ClassificationRequest::File(FileBlob::new(bytes, file_name, mime_type)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClassificationRequest::Image(_) => "image",
            ClassificationRequest::File(_) => "file",
        }
    }
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
