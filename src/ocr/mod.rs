//! OCR engine interface.
//!
//! An engine takes one RGB page image and returns the recognized lines of text
//! in its own reading order. We don't try to improve on that order.

use std::sync::Arc;

use clap::ValueEnum;
use image::RgbImage;
use serde::Deserialize;

use crate::prelude::*;

#[cfg(feature = "ocrs")]
pub mod ocrs_engine;
pub mod tesseract;

/// Which OCR engine to use.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OcrEngineKind {
    /// The `tesseract` CLI tool.
    #[default]
    Tesseract,
    /// The pure-Rust `ocrs` engine (requires the `ocrs` feature).
    Ocrs,
}

/// Input describing one page to OCR.
pub struct OcrPageInput<'a> {
    /// The ID of the document.
    pub document_id: &'a str,

    /// The index of the page within the document, starting at 0.
    pub page_idx: usize,

    /// The page itself.
    pub image: RgbImage,

    /// Language codes to pass to the engine. These are not validated here.
    pub language_hints: &'a [String],
}

/// One line of recognized text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextLine {
    pub text: String,
}

/// What the engine saw on one page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OcrPrediction {
    /// Lines in the engine's reading order.
    pub text_lines: Vec<TextLine>,
}

impl OcrPrediction {
    /// Build a prediction from raw line strings.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            text_lines: lines
                .into_iter()
                .map(|text| TextLine { text: text.into() })
                .collect(),
        }
    }

    /// The text of each line, in order.
    pub fn line_texts(&self) -> Vec<&str> {
        self.text_lines.iter().map(|line| line.text.as_str()).collect()
    }
}

/// Interface to an OCR engine.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// OCR a single page.
    async fn recognize(&self, input: OcrPageInput<'_>) -> Result<OcrPrediction>;
}

/// Create the OCR engine of the requested kind.
pub fn ocr_engine_for_kind(
    kind: OcrEngineKind,
    ocrs_model_dir: Option<&Path>,
) -> Result<Arc<dyn OcrEngine>> {
    match kind {
        OcrEngineKind::Tesseract => {
            if ocrs_model_dir.is_some() {
                warn!("ocrs model directory is ignored by the tesseract engine");
            }
            Ok(Arc::new(tesseract::TesseractOcrEngine::new()))
        }
        #[cfg(feature = "ocrs")]
        OcrEngineKind::Ocrs => {
            let config = match ocrs_model_dir {
                Some(dir) => ocrs_engine::OcrsConfig::from_dir(dir),
                None => ocrs_engine::OcrsConfig::default(),
            };
            Ok(Arc::new(ocrs_engine::OcrsOcrEngine::new(config)?))
        }
        #[cfg(not(feature = "ocrs"))]
        OcrEngineKind::Ocrs => Err(anyhow!(
            "the ocrs engine was not compiled in (rebuild with `--features ocrs`)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prediction_keeps_line_order() {
        let prediction = OcrPrediction::from_lines(["Hello", "World"]);
        assert_eq!(prediction.line_texts(), vec!["Hello", "World"]);
    }

    #[test]
    fn tesseract_engine_is_always_available() {
        assert!(ocr_engine_for_kind(OcrEngineKind::Tesseract, None).is_ok());
    }

    #[cfg(not(feature = "ocrs"))]
    #[test]
    fn ocrs_engine_requires_feature() {
        assert!(ocr_engine_for_kind(OcrEngineKind::Ocrs, None).is_err());
    }
}
