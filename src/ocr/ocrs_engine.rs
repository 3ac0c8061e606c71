//! Pure-Rust OCR using the `ocrs` models.
//!
//! Needs two model files, `text-detection.rten` and `text-recognition.rten`.
//! Running `ocrs-cli` once downloads them into `$XDG_CACHE_HOME/ocrs`, which is
//! where we look by default.

use std::sync::Arc;

use ocrs::{ImageSource, OcrEngineParams};
use rten::Model;

use super::{OcrEngine, OcrPageInput, OcrPrediction};
use crate::{
    async_utils::blocking::spawn_blocking_propagating_panics,
    prelude::*,
};

const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

/// `$XDG_CACHE_HOME/ocrs`, falling back to `~/.cache/ocrs`.
fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

/// Where to find the `ocrs` models.
#[derive(Clone, Debug)]
pub struct OcrsConfig {
    pub detection_model_path: PathBuf,
    pub recognition_model_path: PathBuf,
}

impl Default for OcrsConfig {
    fn default() -> Self {
        Self::from_dir(default_model_dir())
    }
}

impl OcrsConfig {
    /// Look for both models in `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detection_model_path: dir.join(DETECTION_MODEL_FILENAME),
            recognition_model_path: dir.join(RECOGNITION_MODEL_FILENAME),
        }
    }
}

/// OCR engine backed by `ocrs`. Language hints are ignored, because the models
/// are tied to a single script.
pub struct OcrsOcrEngine {
    engine: Arc<ocrs::OcrEngine>,
}

impl OcrsOcrEngine {
    /// Load the models. This is slow, so we do it once per run.
    #[instrument(level = "debug", skip_all, fields(
        detection = %config.detection_model_path.display(),
        recognition = %config.recognition_model_path.display(),
    ))]
    pub fn new(config: OcrsConfig) -> Result<Self> {
        let detection_model =
            Model::load_file(&config.detection_model_path).with_context(|| {
                format!(
                    "failed to load detection model from {:?} (run `ocrs-cli` once to download it)",
                    config.detection_model_path.display()
                )
            })?;
        let recognition_model = Model::load_file(&config.recognition_model_path)
            .with_context(|| {
                format!(
                    "failed to load recognition model from {:?} (run `ocrs-cli` once to download it)",
                    config.recognition_model_path.display()
                )
            })?;
        let engine = ocrs::OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .context("failed to initialise ocrs engine")?;
        info!("Loaded ocrs models");
        Ok(Self {
            engine: Arc::new(engine),
        })
    }
}

#[async_trait]
impl OcrEngine for OcrsOcrEngine {
    #[instrument(level = "debug", skip_all, fields(id = %input.document_id, page = %input.page_idx))]
    async fn recognize(&self, input: OcrPageInput<'_>) -> Result<OcrPrediction> {
        if !input.language_hints.is_empty() {
            trace!(hints = ?input.language_hints, "ocrs ignores language hints");
        }
        let engine = self.engine.clone();
        let image = input.image;
        spawn_blocking_propagating_panics(move || -> Result<OcrPrediction> {
            let (width, height) = image.dimensions();
            let source = ImageSource::from_bytes(image.as_raw(), (width, height))
                .with_context(|| {
                    format!("failed to create image source ({}x{})", width, height)
                })?;
            let input = engine
                .prepare_input(source)
                .context("OCR preprocessing failed")?;

            // Detect words, group them into lines, then read each line.
            let word_rects = engine.detect_words(&input).context("word detection failed")?;
            let line_rects = engine.find_text_lines(&input, &word_rects);
            let line_texts = engine
                .recognize_text(&input, &line_rects)
                .context("line recognition failed")?;

            Ok(OcrPrediction::from_lines(
                line_texts
                    .iter()
                    .flatten()
                    .map(|line| line.to_string())
                    .filter(|text| !text.trim().is_empty()),
            ))
        })
        .await
    }
}
