//! The persistent, human-readable failure log.
//!
//! Entries look like `2024-05-01 13:45:12,345 - ERROR - message`, one per line.
//! Nothing parses this file; it exists so an operator can see what went wrong
//! without re-running the batch.

use std::fmt;

use tokio::{fs::OpenOptions, io::AsyncWriteExt as _};

use crate::{prelude::*, processor::ProcessingError};

/// Severity of an [`ErrorLog`] entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("WARNING"),
            Severity::Error => f.write_str("ERROR"),
        }
    }
}

/// Append-only failure log.
#[derive(Clone, Debug)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    /// Create a log backed by the file at `path`. The file is created on the
    /// first [`Self::append`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, and mirror it to our tracing output.
    pub async fn append(&self, severity: Severity, message: &str) -> Result<()> {
        match severity {
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }

        let entry = format_entry(chrono::Local::now(), severity, message);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("cannot open error log {:?}", self.path.display()))?;
        file.write_all(entry.as_bytes())
            .await
            .with_context(|| format!("cannot write to error log {:?}", self.path.display()))?;
        file.flush().await.context("cannot flush error log")?;
        Ok(())
    }

    /// Record a document that could not be processed, including the full
    /// chain of causes.
    pub async fn log_failure(&self, err: ProcessingError) -> Result<()> {
        let err = anyhow::Error::from(err);
        self.append(Severity::Error, &format!("{:#}", err)).await
    }
}

/// Format a single entry. Line breaks inside `message` are flattened so that
/// every entry stays on one line.
fn format_entry<Tz>(
    timestamp: chrono::DateTime<Tz>,
    severity: Severity,
    message: &str,
) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: fmt::Display,
{
    let message = message.lines().map(str::trim).collect::<Vec<_>>().join(" | ");
    format!(
        "{} - {} - {}\n",
        timestamp.format("%Y-%m-%d %H:%M:%S,%3f"),
        severity,
        message
    )
}
