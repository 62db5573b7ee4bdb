use crate::error::AppError;
use crate::models::classify_types::{Backend, RawPrediction, WasteCategory};
use crate::services::classifier::model_manager::ModelManager;
use crate::services::enrichment::adjust_confidence;
use crate::services::quality_service;
use image::DynamicImage;
use ndarray::{s, Array4};
use ort::session::Session;
use ort::value::Value;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::PoisonError;

/// Square input resolution the classifier was trained on.
pub const INPUT_SIZE: u32 = 224;

const CROP_PCT: f32 = 0.875;

// Bounds the intermediate resize buffer; the long edge never exceeds 32x the short one.
const MAX_ASPECT_RATIO: f64 = 32.0;

// ImageNet normalization constants
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// A loaded model that maps an NCHW tensor to one score per category.
pub trait InferenceModel: Send {
    fn predict(&mut self, input: Array4<f32>) -> Result<Vec<f32>, AppError>;
}

pub struct OnnxModel {
    session: Session,
}

impl OnnxModel {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

impl InferenceModel for OnnxModel {
    fn predict(&mut self, input: Array4<f32>) -> Result<Vec<f32>, AppError> {
        // Get the input name from the model (assuming single input)
        let input_name = self.session.inputs()[0].name().to_string();

        let input_tensor = Value::from_array(input)
            .map_err(|e| AppError::Inference(format!("Failed to create tensor value: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_name.as_str() => input_tensor])
            .map_err(|e| AppError::Inference(format!("Forward pass failed: {}", e)))?;

        let output_value = outputs
            .values()
            .next()
            .ok_or_else(|| AppError::Inference("Model produced no outputs".to_string()))?;

        let (_, data) = output_value
            .try_extract_tensor::<f32>()
            .map_err(|e| AppError::Inference(format!("Failed to extract output tensor: {}", e)))?;

        Ok(data.to_vec())
    }
}

/// Built-in fallback network: a single dense layer over per-channel means.
///
/// Weights come from a seeded generator, so two demo models built with the
/// same seed score every image identically.
pub struct DemoModel {
    weights: [[f32; 3]; 3],
    bias: [f32; 3],
}

impl DemoModel {
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut weights = [[0f32; 3]; 3];
        for row in weights.iter_mut() {
            for w in row.iter_mut() {
                *w = rng.gen_range(-1.0..1.0);
            }
        }
        let mut bias = [0f32; 3];
        for b in bias.iter_mut() {
            *b = rng.gen_range(-0.1..0.1);
        }
        Self { weights, bias }
    }
}

impl InferenceModel for DemoModel {
    fn predict(&mut self, input: Array4<f32>) -> Result<Vec<f32>, AppError> {
        if input.shape()[1] != 3 {
            return Err(AppError::Inference(format!(
                "Demo model expects 3 channels, got {}",
                input.shape()[1]
            )));
        }

        let mut features = [0f32; 3];
        for (c, feature) in features.iter_mut().enumerate() {
            *feature = input.slice(s![0, c, .., ..]).mean().unwrap_or(0.0);
        }

        let scores = self
            .weights
            .iter()
            .zip(self.bias.iter())
            .map(|(row, b)| row.iter().zip(features.iter()).map(|(w, x)| w * x).sum::<f32>() + b)
            .collect();
        Ok(scores)
    }
}

/// Resize + center crop to `crop_size` and normalize into a 1x3xHxW tensor.
pub fn preprocess_image(img: &DynamicImage, crop_size: u32) -> Result<Array4<f32>, AppError> {
    let (w, h) = (img.width(), img.height());
    if w == 0 || h == 0 {
        return Err(AppError::Inference("Image has no pixels".to_string()));
    }

    let aspect = w.max(h) as f64 / w.min(h) as f64;
    if aspect > MAX_ASPECT_RATIO {
        return Err(AppError::Inference(format!(
            "Image aspect ratio {}x{} is too extreme to classify",
            w, h
        )));
    }

    // Resize shortest edge to ceil(crop_size / crop_pct), then center crop
    let resize_size = (crop_size as f32 / CROP_PCT).ceil() as u32;
    let long_edge = (aspect * resize_size as f64).round() as u32;
    let (new_w, new_h) = if w < h {
        (resize_size, long_edge)
    } else {
        (long_edge, resize_size)
    };
    let resized = img.resize_exact(new_w, new_h, image::imageops::FilterType::Triangle);

    let crop_x = (new_w.saturating_sub(crop_size)) / 2;
    let crop_y = (new_h.saturating_sub(crop_size)) / 2;
    let cropped = resized.crop_imm(crop_x, crop_y, crop_size, crop_size);
    let rgb = cropped.to_rgb8();

    // Pass 1: normalize in HWC order.
    let raw = rgb.into_raw();
    let hw = (crop_size * crop_size) as usize;
    let mut interleaved = vec![0f32; 3 * hw];
    for (i, pixel) in raw.chunks_exact(3).enumerate() {
        let off = i * 3;
        interleaved[off] = (pixel[0] as f32 / 255.0 - MEAN[0]) / STD[0];
        interleaved[off + 1] = (pixel[1] as f32 / 255.0 - MEAN[1]) / STD[1];
        interleaved[off + 2] = (pixel[2] as f32 / 255.0 - MEAN[2]) / STD[2];
    }

    // Pass 2: transpose HWC -> CHW in tiles.
    let mut data = vec![0f32; 3 * hw];
    const TILE: usize = 1024;
    for base in (0..hw).step_by(TILE) {
        let end = (base + TILE).min(hw);
        for i in base..end {
            let src = i * 3;
            data[i] = interleaved[src];
            data[hw + i] = interleaved[src + 1];
            data[2 * hw + i] = interleaved[src + 2];
        }
    }

    Array4::from_shape_vec((1, 3, crop_size as usize, crop_size as usize), data)
        .map_err(|e| AppError::Inference(format!("Failed to create tensor: {}", e)))
}

/// Softmax over the three category scores, returning the winner and its probability.
pub fn top_category(scores: &[f32]) -> Result<(WasteCategory, f32), AppError> {
    if scores.len() != WasteCategory::ALL.len() {
        return Err(AppError::Inference(format!(
            "Expected {} category scores, got {}",
            WasteCategory::ALL.len(),
            scores.len()
        )));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(AppError::Inference("Model produced non-finite scores".to_string()));
    }

    let max_logit = scores.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp_sum: f32 = scores.iter().map(|&x| (x - max_logit).exp()).sum();

    let (idx, prob) = scores
        .iter()
        .map(|&x| (x - max_logit).exp() / exp_sum)
        .enumerate()
        .fold((0usize, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });

    let category = WasteCategory::from_index(idx)
        .ok_or_else(|| AppError::Inference(format!("No category for index {}", idx)))?;
    Ok((category, prob))
}

/// Runs the loaded on-device model against a decoded image.
pub async fn classify_on_device(
    manager: &ModelManager,
    image: DynamicImage,
) -> Result<RawPrediction, AppError> {
    let start = tokio::time::Instant::now();

    if !manager.is_ready() {
        return Err(AppError::Inference("Model not loaded".to_string()));
    }

    let report = quality_service::analyze(&image);
    let model_lock = manager.get_model_lock();

    let scores = tokio::task::spawn_blocking(move || -> Result<Vec<f32>, AppError> {
        let tensor = preprocess_image(&image, INPUT_SIZE)?;
        let mut guard = model_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let model = guard
            .as_mut()
            .ok_or_else(|| AppError::Inference("Model unloaded during classification".to_string()))?;
        model.predict(tensor)
    })
    .await
    .map_err(|e| AppError::Inference(format!("Inference task failed: {}", e)))??;

    let (category, prob) = top_category(&scores)?;
    let confidence = adjust_confidence(prob * 100.0, &report);

    tracing::debug!(
        "On-device inference: category={} raw={:.3} adjusted={} quality={:?}",
        category,
        prob,
        confidence,
        report.quality
    );

    Ok(RawPrediction {
        category,
        confidence,
        processing_time_ms: start.elapsed().as_millis() as u64,
        image_analysis: Some(report),
        sub_category: None,
        material: None,
        backend: Backend::OnDevice,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(w: u32, h: u32, rgb: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb(rgb)))
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let tensor = preprocess_image(&solid(640, 480, [255, 0, 128]), INPUT_SIZE).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);

        let r = tensor[[0, 0, 100, 100]];
        let g = tensor[[0, 1, 100, 100]];
        assert!((r - (1.0 - MEAN[0]) / STD[0]).abs() < 1e-3);
        assert!((g - (0.0 - MEAN[1]) / STD[1]).abs() < 1e-3);
    }

    #[test]
    fn test_preprocess_portrait_image() {
        let tensor = preprocess_image(&solid(100, 300, [10, 20, 30]), INPUT_SIZE).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_preprocess_rejects_empty_image() {
        let err = preprocess_image(&DynamicImage::ImageRgb8(RgbImage::new(0, 0)), INPUT_SIZE);
        assert!(matches!(err, Err(AppError::Inference(_))));
    }

    #[test]
    fn test_preprocess_rejects_extreme_aspect_ratio() {
        let err = preprocess_image(&solid(1, 100_000, [90, 90, 90]), INPUT_SIZE);
        assert!(matches!(err, Err(AppError::Inference(_))));
        let err = preprocess_image(&solid(100_000, 1, [90, 90, 90]), INPUT_SIZE);
        assert!(matches!(err, Err(AppError::Inference(_))));

        let tensor = preprocess_image(&solid(32, 1024, [90, 90, 90]), INPUT_SIZE).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_top_category_picks_max() {
        let (category, prob) = top_category(&[0.1, 2.0, 0.3]).unwrap();
        assert_eq!(category, WasteCategory::Recyclable);
        assert!(prob > 0.5 && prob < 1.0);
    }

    #[test]
    fn test_top_category_rejects_bad_output() {
        assert!(top_category(&[1.0, 2.0]).is_err());
        assert!(top_category(&[1.0, f32::NAN, 0.0]).is_err());
    }

    #[test]
    fn test_demo_model_is_deterministic() {
        let input = preprocess_image(&solid(64, 64, [120, 180, 60]), INPUT_SIZE).unwrap();
        let a = DemoModel::new(7).predict(input.clone()).unwrap();
        let b = DemoModel::new(7).predict(input).unwrap();
        assert_eq!(a.len(), 3);
        assert_eq!(a, b);
    }
}
