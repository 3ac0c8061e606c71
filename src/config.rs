//! Batch configuration.
//!
//! Everything the batch needs to know lives in one [`BatchConfig`] value, which
//! is built from built-in defaults, an optional config file, and command-line
//! overrides (in that order).

use clap::Args;
use serde::Deserialize;

use crate::{ocr::OcrEngineKind, prelude::*};

/// Configuration for one batch run.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Directory containing the documents to convert.
    pub source_dir: PathBuf,

    /// Directory receiving one text file per converted document. Created if
    /// missing.
    pub output_dir: PathBuf,

    /// Append-only record of converted document IDs.
    pub processed_set_path: PathBuf,

    /// Append-only log of failures.
    pub error_log_path: PathBuf,

    /// Language codes passed to the OCR engine on every page.
    pub language_hints: Vec<String>,

    /// Only files ending in `.<document_extension>` are converted.
    pub document_extension: String,

    /// Appended to the document's stem to name its output file.
    pub output_suffix: String,

    /// Resolution used when rasterizing pages.
    pub rasterize_dpi: u32,

    /// Which OCR engine to use.
    pub engine: OcrEngineKind,

    /// Where the `ocrs` engine looks for its models.
    pub ocrs_model_dir: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("books"),
            output_dir: PathBuf::from("output_cleaned_texts"),
            processed_set_path: PathBuf::from("processed_files.log"),
            error_log_path: PathBuf::from("ocr_processing.log"),
            language_hints: vec!["ara".to_owned()],
            document_extension: "pdf".to_owned(),
            output_suffix: "_cleaned".to_owned(),
            rasterize_dpi: 200,
            engine: OcrEngineKind::default(),
            ocrs_model_dir: None,
        }
    }
}

impl BatchConfig {
    /// Load a config file. Files ending in `.json` are parsed as JSON, and
    /// everything else as TOML. Missing keys take their default values.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let data = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {:?}", path.display()))?;
        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&data).with_context(|| {
                format!("Failed to parse JSON from config file {:?}", path.display())
            })
        } else {
            toml::from_str(&data).with_context(|| {
                format!("Failed to parse TOML from config file {:?}", path.display())
            })
        }
    }

    /// Check for values that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.document_extension.is_empty() || self.document_extension.contains('.') {
            return Err(anyhow!(
                "document extension {:?} must be non-empty and must not contain a dot",
                self.document_extension
            ));
        }
        if self.output_suffix.contains(['/', '\\']) {
            return Err(anyhow!(
                "output suffix {:?} must not contain a path separator",
                self.output_suffix
            ));
        }
        if self.rasterize_dpi == 0 {
            return Err(anyhow!("rasterize DPI must be greater than zero"));
        }
        Ok(())
    }

    /// The output path for a document ID: `foo.pdf` becomes
    /// `<output_dir>/foo_cleaned.txt`.
    pub fn output_path_for(&self, document_id: &str) -> PathBuf {
        let stem = document_id
            .strip_suffix(&format!(".{}", self.document_extension))
            .unwrap_or(document_id);
        self.output_dir
            .join(format!("{}{}.txt", stem, self.output_suffix))
    }
}

/// Command-line options shared by subcommands that need a [`BatchConfig`].
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigOpts {
    /// Read settings from a TOML (or `.json`) file. Flags override the file.
    #[clap(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// Directory containing the PDFs to convert [default: books].
    #[clap(long)]
    pub source_dir: Option<PathBuf>,

    /// Directory to write text files to [default: output_cleaned_texts].
    #[clap(long)]
    pub output_dir: Option<PathBuf>,

    /// Record of already-converted documents [default: processed_files.log].
    #[clap(long)]
    pub processed_set: Option<PathBuf>,

    /// Log of failed documents [default: ocr_processing.log].
    #[clap(long)]
    pub error_log: Option<PathBuf>,

    /// Language to pass to the OCR engine. May be repeated [default: ara].
    #[clap(short = 'l', long = "lang", value_name = "CODE")]
    pub language_hints: Vec<String>,

    /// Resolution to rasterize pages at [default: 200].
    #[clap(long)]
    pub rasterize_dpi: Option<u32>,

    /// OCR engine to use [default: tesseract].
    #[clap(long, value_enum)]
    pub engine: Option<OcrEngineKind>,

    /// Directory containing `ocrs` models.
    #[clap(long)]
    pub ocrs_model_dir: Option<PathBuf>,
}

impl ConfigOpts {
    /// Build the effective configuration.
    pub async fn load(&self) -> Result<BatchConfig> {
        let config = match &self.config_path {
            Some(path) => BatchConfig::from_path(path).await?,
            None => BatchConfig::default(),
        };
        let config = self.apply_overrides(config);
        config.validate()?;
        debug!(?config, "Loaded configuration");
        Ok(config)
    }

    /// Replace any values set on the command line.
    fn apply_overrides(&self, mut config: BatchConfig) -> BatchConfig {
        if let Some(source_dir) = &self.source_dir {
            config.source_dir = source_dir.clone();
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = output_dir.clone();
        }
        if let Some(processed_set) = &self.processed_set {
            config.processed_set_path = processed_set.clone();
        }
        if let Some(error_log) = &self.error_log {
            config.error_log_path = error_log.clone();
        }
        if !self.language_hints.is_empty() {
            config.language_hints = self.language_hints.clone();
        }
        if let Some(dpi) = self.rasterize_dpi {
            config.rasterize_dpi = dpi;
        }
        if let Some(engine) = self.engine {
            config.engine = engine;
        }
        if let Some(dir) = &self.ocrs_model_dir {
            config.ocrs_model_dir = Some(dir.clone());
        }
        config
    }
}
