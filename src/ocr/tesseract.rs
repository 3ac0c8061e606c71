//! Tesseract OCR engine.

use image::ImageFormat;
use tokio::process::Command;

use super::{OcrEngine, OcrPageInput, OcrPrediction};
use crate::{async_utils::check_for_command_failure, prelude::*};

/// OCR engine wrapping the `tesseract` CLI tool.
#[derive(Default)]
#[non_exhaustive]
pub struct TesseractOcrEngine {}

impl TesseractOcrEngine {
    /// Create a new `tesseract` engine.
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    #[instrument(level = "debug", skip_all, fields(id = %input.document_id, page = %input.page_idx))]
    async fn recognize(&self, input: OcrPageInput<'_>) -> Result<OcrPrediction> {
        // Write our page to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join("input.png");
        input
            .image
            .save_with_format(&input_path, ImageFormat::Png)
            .context("cannot write tesseract input file")?;

        // Run tesseract, printing recognized text to standard output.
        let mut cmd = Command::new("tesseract");
        cmd.arg(&input_path).arg("stdout");
        if let Some(languages) = language_arg(input.language_hints) {
            cmd.arg("-l").arg(languages);
        }
        let output = cmd.output().await.context("cannot run tesseract")?;
        check_for_command_failure("tesseract", &output, None)?;

        let text = String::from_utf8(output.stdout)
            .context("tesseract output was not valid UTF-8")?;
        Ok(parse_tesseract_output(&text))
    }
}

/// Tesseract wants multiple languages joined with `+`, as in `ara+eng`.
fn language_arg(language_hints: &[String]) -> Option<String> {
    if language_hints.is_empty() {
        None
    } else {
        Some(language_hints.join("+"))
    }
}

/// Tesseract separates blocks with blank lines and ends pages with a form
/// feed. Everything else is a line of text.
fn parse_tesseract_output(text: &str) -> OcrPrediction {
    OcrPrediction::from_lines(
        text.lines()
            .map(|line| line.trim_matches('\x0C'))
            .filter(|line| !line.trim().is_empty()),
    )
}
