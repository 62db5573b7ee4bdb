use crate::error::AppError;
use crate::models::classify_types::{
    ClassificationRequest, ClassificationResult, ModelInfo, ModelStatus,
};
use crate::services::classifier::orchestrator::WasteClassifier;
use std::path::Path;

pub async fn get_model_status(classifier: &WasteClassifier) -> ModelStatus {
    let manager = classifier.model_manager();
    ModelStatus {
        cached: manager.has_cached_model().await,
        loading: manager.is_loading(),
        ready: manager.is_ready(),
        error: manager.last_error(),
        info: manager.model_info(),
    }
}

pub async fn load_model(classifier: &WasteClassifier, reload: bool) -> Result<ModelInfo, AppError> {
    let manager = classifier.model_manager();
    if reload {
        manager.reload().await
    } else {
        manager.load().await
    }
}

pub async fn clear_cache(classifier: &WasteClassifier) -> Result<(), AppError> {
    classifier.model_manager().clear_cache().await
}

/// Classifies an image file from disk.
///
/// The file is decoded locally unless `as_file` is set; a file that cannot
/// be decoded is submitted as a raw blob instead.
pub async fn classify_image(
    classifier: &WasteClassifier,
    path: &Path,
    as_file: bool,
) -> Result<ClassificationResult, AppError> {
    let request = ClassificationRequest::from_path(path)?;

    let request = match request {
        ClassificationRequest::File(blob) if !as_file => match blob.decode() {
            Ok(image) => ClassificationRequest::Image(image),
            Err(e) => {
                tracing::warn!("Failed to decode {}, sending as file: {}", path.display(), e);
                ClassificationRequest::File(blob)
            }
        },
        other => other,
    };

    Ok(classifier.classify(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::classify_types::{Backend, LoadState, ModelSource};
    use image::{Rgb, RgbImage};

    fn classifier(dir: &Path) -> WasteClassifier {
        let config = Config {
            data_dir: dir.to_path_buf(),
            ..Config::default()
        };
        WasteClassifier::from_config(&config).unwrap().with_seed(1)
    }

    #[tokio::test]
    async fn test_status_before_and_after_load() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = classifier(dir.path());

        let status = get_model_status(&classifier).await;
        assert!(!status.ready);
        assert!(!status.cached);
        assert!(status.info.is_none());

        let info = load_model(&classifier, false).await.unwrap();
        assert_eq!(info.load_state, LoadState::Loaded);
        assert_eq!(info.source, Some(ModelSource::Demo));

        let status = get_model_status(&classifier).await;
        assert!(status.ready);
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn test_classify_png_on_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("item.png");
        RgbImage::from_pixel(40, 30, Rgb([130, 140, 120])).save(&path).unwrap();

        let classifier = classifier(dir.path());
        load_model(&classifier, false).await.unwrap();

        let result = classify_image(&classifier, &path, false).await.unwrap();
        assert_eq!(result.backend, Backend::OnDevice);
        assert!(result.image_analysis.is_some());
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = classifier(dir.path());
        let err = classify_image(&classifier, &dir.path().join("nope.jpg"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
    }
}
