use crate::models::classify_types::{ImageQuality, ImageQualityReport, LightingCondition};
use image::DynamicImage;

// Object detection is not implemented; every image counts as one item.
const OBJECT_COUNT: u32 = 1;

/// Scores an image by its mean brightness. Never fails.
pub fn analyze(img: &DynamicImage) -> ImageQualityReport {
    report_for_luminance(mean_luminance(img))
}

/// Mean of per-pixel (R + G + B) / 3 over the whole image, 0 for an empty image.
pub fn mean_luminance(img: &DynamicImage) -> f32 {
    let rgb = img.to_rgb8();
    let count = rgb.width() as u64 * rgb.height() as u64;
    if count == 0 {
        return 0.0;
    }

    let mut sum: u64 = 0;
    for p in rgb.pixels() {
        sum += p[0] as u64 + p[1] as u64 + p[2] as u64;
    }

    (sum as f64 / (3 * count) as f64) as f32
}

pub fn report_for_luminance(luminance: f32) -> ImageQualityReport {
    ImageQualityReport {
        quality: quality_for(luminance),
        lighting_condition: lighting_for(luminance),
        clarity: clarity_for(luminance),
        object_count: OBJECT_COUNT,
    }
}

pub fn quality_for(luminance: f32) -> ImageQuality {
    if luminance > 100.0 && luminance < 200.0 {
        ImageQuality::Good
    } else if luminance > 50.0 && luminance <= 100.0 {
        ImageQuality::Fair
    } else {
        ImageQuality::Poor
    }
}

pub fn lighting_for(luminance: f32) -> LightingCondition {
    if luminance > 180.0 {
        LightingCondition::Overexposed
    } else if luminance < 80.0 {
        LightingCondition::Low
    } else {
        LightingCondition::Good
    }
}

pub fn clarity_for(luminance: f32) -> f32 {
    ((luminance - 50.0) / 1.5).clamp(0.0, 100.0)
}
