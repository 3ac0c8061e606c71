//! One resumable pass over a directory of documents.
//!
//! The invariant we maintain: a document's ID is in the processed set if and
//! only if its output file was fully written. Everything else (failed
//! documents, documents with no text) gets logged and retried next run.

use std::{collections::HashSet, io::Write as _};

use crate::{
    async_utils::blocking::sync_dir,
    config::BatchConfig,
    error_log::{ErrorLog, Severity},
    prelude::*,
    processed_set::ProcessedSetStore,
    processor::{Document, DocumentProcessor},
    ui::{ProgressConfig, Ui},
};

/// What happened to one document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentOutcome {
    /// Skipped, because an earlier run already converted it.
    AlreadyProcessed,
    /// Converted, written and recorded.
    Converted,
    /// OCR worked, but found no text. Not recorded, so it will be retried.
    Empty,
    /// Could not be converted or written. Not recorded, so it will be retried.
    Failed,
}

/// Counts of outcomes for one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of candidate documents found.
    pub total: usize,
    pub already_processed: usize,
    pub converted: usize,
    pub empty: usize,
    pub failed: usize,
}

impl RunSummary {
    fn add(&mut self, outcome: DocumentOutcome) {
        match outcome {
            DocumentOutcome::AlreadyProcessed => self.already_processed += 1,
            DocumentOutcome::Converted => self.converted += 1,
            DocumentOutcome::Empty => self.empty += 1,
            DocumentOutcome::Failed => self.failed += 1,
        }
    }
}

/// A candidate whose name can't be used as a document ID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedCandidate {
    pub path: PathBuf,
    pub reason: &'static str,
}

/// The result of scanning the source directory.
#[derive(Clone, Debug, Default)]
pub struct DocumentScan {
    /// Convertible documents, sorted by ID.
    pub documents: Vec<Document>,
    /// Files with the right extension that we can never convert, because
    /// their names don't fit in the processed set.
    pub rejected: Vec<RejectedCandidate>,
}

/// List every candidate document in the configured source directory, sorted
/// by file name.
///
/// Only an unreadable directory is an error. An entry we can't inspect (such
/// as a dangling symlink) is still returned as a document, and fails when we
/// try to convert it.
pub async fn find_documents(config: &BatchConfig) -> Result<DocumentScan> {
    let suffix = format!(".{}", config.document_extension);
    let source_dir = &config.source_dir;
    let mut entries = tokio::fs::read_dir(source_dir).await.with_context(|| {
        format!("cannot read source directory {:?}", source_dir.display())
    })?;

    let mut scan = DocumentScan::default();
    while let Some(entry) = entries.next_entry().await.with_context(|| {
        format!("cannot read entry in source directory {:?}", source_dir.display())
    })? {
        let name = entry.file_name();
        if !name.to_string_lossy().ends_with(&suffix) {
            continue;
        }
        let path = entry.path();
        if !is_file_or_unknown(&entry).await {
            continue;
        }

        // IDs go into a line-based record.
        let Ok(id) = name.into_string() else {
            scan.rejected.push(RejectedCandidate {
                path,
                reason: "file name is not valid UTF-8",
            });
            continue;
        };
        if id.contains(['\n', '\r']) {
            scan.rejected.push(RejectedCandidate {
                path,
                reason: "file name contains a line break",
            });
            continue;
        }
        scan.documents.push(Document { id, path });
    }
    scan.documents.sort_by(|a, b| a.id.cmp(&b.id));
    scan.rejected.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(scan)
}

/// Is this entry a regular file (following symlinks)? Entries we can't stat
/// count as files, so that the failure is reported against the document.
async fn is_file_or_unknown(entry: &tokio::fs::DirEntry) -> bool {
    match entry.file_type().await {
        Ok(file_type) if file_type.is_file() => true,
        Ok(file_type) if !file_type.is_symlink() => false,
        _ => match tokio::fs::metadata(entry.path()).await {
            Ok(metadata) => metadata.is_file(),
            Err(err) => {
                debug!(path = %entry.path().display(), "cannot stat candidate: {}", err);
                true
            }
        },
    }
}

/// Drives a full pass over the source directory.
pub struct BatchRunner {
    config: BatchConfig,
    processor: DocumentProcessor,
    processed_set: ProcessedSetStore,
    error_log: ErrorLog,
    ui: Ui,
}

impl BatchRunner {
    /// Create a runner. Nothing touches the filesystem until [`Self::run`].
    pub fn new(config: BatchConfig, processor: DocumentProcessor, ui: Ui) -> Self {
        let processed_set = ProcessedSetStore::new(&config.processed_set_path);
        let error_log = ErrorLog::new(&config.error_log_path);
        Self {
            config,
            processor,
            processed_set,
            error_log,
            ui,
        }
    }

    /// Attempt every candidate document once.
    ///
    /// Problems with an individual document are logged and never stop the
    /// run. Problems with the run itself (an unreadable source directory, a
    /// corrupt processed set, an unwritable log) are returned as errors.
    #[instrument(level = "debug", skip_all, fields(source_dir = %self.config.source_dir.display()))]
    pub async fn run(&self) -> Result<RunSummary> {
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .with_context(|| {
                format!(
                    "cannot create output directory {:?}",
                    self.config.output_dir.display()
                )
            })?;
        let DocumentScan {
            documents,
            rejected,
        } = find_documents(&self.config).await?;
        let processed = self.processed_set.load().await?;
        info!(
            total = documents.len() + rejected.len(),
            already_processed = processed.len(),
            processed_set = %self.processed_set.path().display(),
            "Starting batch"
        );

        let pb = self.ui.new_progress_bar(
            &ProgressConfig {
                emoji: "📄",
                msg: "OCRing documents",
                done_msg: "OCRed documents",
            },
            documents.len() as u64,
        );
        let mut summary = RunSummary {
            total: documents.len() + rejected.len(),
            ..RunSummary::default()
        };
        for candidate in &rejected {
            self.report_rejected(candidate).await?;
            summary.add(DocumentOutcome::Failed);
        }
        for (index, doc) in documents.iter().enumerate() {
            let outcome = self
                .run_one(doc, index + 1, documents.len(), &processed)
                .await?;
            summary.add(outcome);
            pb.inc(1);
        }
        pb.finish_using_style();

        self.ui.display_message(
            "✅",
            &format!(
                "All documents processed: {} converted, {} already done, {} empty, {} failed",
                summary.converted, summary.already_processed, summary.empty, summary.failed
            ),
        );
        Ok(summary)
    }

    /// Log a candidate that can never be converted under its current name.
    async fn report_rejected(&self, candidate: &RejectedCandidate) -> Result<()> {
        let name = candidate
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.ui.display_message(
            "❌",
            &format!("Cannot process {:?}: {}. Rename it to convert it.", name, candidate.reason),
        );
        self.error_log
            .append(
                Severity::Error,
                &format!("Cannot process {:?}: {}", candidate.path.display(), candidate.reason),
            )
            .await
    }

    /// Handle a single document. Only run-level failures are returned as
    /// errors.
    #[instrument(level = "debug", skip_all, fields(id = %doc.id))]
    async fn run_one(
        &self,
        doc: &Document,
        position: usize,
        total: usize,
        processed: &HashSet<String>,
    ) -> Result<DocumentOutcome> {
        if processed.contains(&doc.id) {
            debug!("Already processed, skipping");
            return Ok(DocumentOutcome::AlreadyProcessed);
        }

        self.ui
            .display_message("⏳", &format!("Processing {} ({}/{})", doc.id, position, total));
        let text = match self
            .processor
            .process(doc, &self.config.language_hints)
            .await
        {
            Ok(text) => text,
            Err(err) => {
                self.ui.display_message(
                    "❌",
                    &format!(
                        "Error processing {}. Check {:?} for details.",
                        err.document(),
                        self.error_log.path().display()
                    ),
                );
                self.error_log.log_failure(err).await?;
                return Ok(DocumentOutcome::Failed);
            }
        };

        if text.is_empty() {
            self.ui.display_message(
                "⚠️",
                &format!("Skipping {}: no text was recognized", doc.id),
            );
            self.error_log
                .append(
                    Severity::Warning,
                    &format!("Skipped {}: OCR produced no text", doc.id),
                )
                .await?;
            return Ok(DocumentOutcome::Empty);
        }

        let output_path = self.config.output_path_for(&doc.id);
        if let Err(err) = write_output_atomically(&output_path, text).await {
            self.ui.display_message(
                "❌",
                &format!("Could not save output for {}. Check log for details.", doc.id),
            );
            self.error_log
                .append(
                    Severity::Error,
                    &format!("Error saving output for {}: {:#}", doc.id, err),
                )
                .await?;
            return Ok(DocumentOutcome::Failed);
        }

        // Only record the document once its output is safely on disk.
        if let Err(err) = self.processed_set.record(&doc.id).await {
            self.reconcile_failed_record(doc, &output_path).await;
            return Err(err.context(format!(
                "cannot record {} as processed; stopping so that resume state stays consistent",
                doc.id
            )));
        }

        self.ui.display_message(
            "💾",
            &format!("Processed and saved {} ({}/{})", doc.id, position, total),
        );
        Ok(DocumentOutcome::Converted)
    }

    /// After a failed [`ProcessedSetStore::record`], make the output file
    /// agree with whatever actually reached the record. The append may have
    /// landed even though a later flush or sync failed.
    async fn reconcile_failed_record(&self, doc: &Document, output_path: &Path) {
        match self.processed_set.load().await {
            Ok(ids) if ids.contains(&doc.id) => {
                warn!(id = %doc.id, "record reported an error but contains the document; keeping output");
            }
            _ => {
                if let Err(err) = tokio::fs::remove_file(output_path).await {
                    error!(
                        path = %output_path.display(),
                        "failed to remove unrecorded output: {}",
                        err
                    );
                }
            }
        }
    }
}

/// Write `text` to `path` so that readers see either no file or the complete
/// file, never a partial one.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
async fn write_output_atomically(path: &Path, text: String) -> Result<()> {
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| anyhow!("output path {:?} has no parent", path.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).with_context(|| {
            format!("cannot create temporary file in {:?}", dir.display())
        })?;
        tmp.write_all(text.as_bytes())
            .context("cannot write output text")?;
        tmp.as_file()
            .sync_all()
            .context("cannot sync output text to disk")?;
        tmp.persist(&path)
            .with_context(|| format!("cannot move output into place at {:?}", path.display()))?;
        sync_dir(dir)
    })
    .await
    .context("output writer task failed")?
}
