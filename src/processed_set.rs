//! The durable record of documents we have already converted.
//!
//! This is a plain text file with one document ID (the input file name) per
//! line. We only ever append to it. Duplicate lines are harmless, because the
//! only thing we ever do with the record is test membership.

use std::{
    collections::HashSet,
    io::{ErrorKind, SeekFrom},
};

use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt as _, AsyncSeekExt as _, AsyncWriteExt as _},
};

use crate::{
    async_utils::blocking::{spawn_blocking_propagating_panics, sync_dir},
    prelude::*,
};

/// Append-only store of processed document IDs.
#[derive(Clone, Debug)]
pub struct ProcessedSetStore {
    /// The backing record.
    path: PathBuf,
}

impl ProcessedSetStore {
    /// Create a store backed by the file at `path`. Nothing is read or
    /// created until [`Self::load`] or [`Self::record`] is called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The path of the backing record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load a snapshot of the processed set.
    ///
    /// A missing record means nothing has been processed yet. A record we
    /// can't read or decode is an error, because guessing would either redo
    /// expensive work or silently skip documents.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<HashSet<String>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("No processed set record yet, starting fresh");
                return Ok(HashSet::new());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "cannot read processed set record {:?}",
                        self.path.display()
                    )
                });
            }
        };
        let contents = String::from_utf8(bytes).with_context(|| {
            format!(
                "processed set record {:?} is not valid UTF-8; cannot establish resume state",
                self.path.display()
            )
        })?;
        let ids = contents
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect::<HashSet<_>>();
        debug!(count = ids.len(), "Loaded processed set");
        Ok(ids)
    }

    /// Append `id` to the record. When this returns `Ok`, the entry has been
    /// synced to disk.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display(), id = %id))]
    pub async fn record(&self, id: &str) -> Result<()> {
        if id.is_empty() || id.contains(['\n', '\r']) {
            return Err(anyhow!(
                "cannot record document ID {:?}: IDs must be non-empty and fit on one line",
                id
            ));
        }

        let created = !tokio::fs::try_exists(&self.path).await.unwrap_or(false);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| {
                format!(
                    "cannot open processed set record {:?}",
                    self.path.display()
                )
            })?;

        // An earlier append may have been cut short. Start a fresh line rather
        // than gluing our ID onto a fragment.
        let mut line = String::with_capacity(id.len() + 2);
        if ends_mid_line(&mut file).await? {
            line.push('\n');
        }
        line.push_str(id);
        line.push('\n');
        file.write_all(line.as_bytes()).await.with_context(|| {
            format!(
                "cannot append to processed set record {:?}",
                self.path.display()
            )
        })?;
        file.flush().await.context("cannot flush processed set record")?;
        file.sync_all()
            .await
            .context("cannot sync processed set record to disk")?;

        if created {
            let dir = self.path.parent().unwrap_or(Path::new(".")).to_owned();
            spawn_blocking_propagating_panics(move || sync_dir(&dir)).await?;
        }
        Ok(())
    }
}

/// Is the last byte of a non-empty record something other than a newline?
async fn ends_mid_line(file: &mut File) -> Result<bool> {
    let len = file
        .metadata()
        .await
        .context("cannot stat processed set record")?
        .len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))
        .await
        .context("cannot seek in processed set record")?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)
        .await
        .context("cannot read end of processed set record")?;
    Ok(last[0] != b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_record_loads_as_empty() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("processed")?;
        let store = ProcessedSetStore::new(dir.path().join("processed_files.log"));
        assert!(store.load().await?.is_empty());
        // Loading must not create the file.
        assert!(!store.path().exists());
        Ok(())
    }

    #[tokio::test]
    async fn recorded_ids_are_loaded_back() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("processed")?;
        let store = ProcessedSetStore::new(dir.path().join("processed_files.log"));
        store.record("a.pdf").await?;
        store.record("كتاب عربي.pdf").await?;
        let ids = store.load().await?;
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("a.pdf"));
        assert!(ids.contains("كتاب عربي.pdf"));
        Ok(())
    }

    #[tokio::test]
    async fn record_only_appends() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("processed")?;
        let path = dir.path().join("processed_files.log");
        std::fs::write(&path, "old.pdf\n")?;
        let store = ProcessedSetStore::new(&path);
        store.record("new.pdf").await?;
        store.record("new.pdf").await?;
        assert_eq!(std::fs::read_to_string(&path)?, "old.pdf\nnew.pdf\nnew.pdf\n");
        let ids = store.load().await?;
        assert_eq!(ids.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn blank_lines_and_crlf_are_tolerated() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("processed")?;
        let path = dir.path().join("processed_files.log");
        std::fs::write(&path, "a.pdf\r\n\nb.pdf\n")?;
        let ids = ProcessedSetStore::new(&path).load().await?;
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("a.pdf") && ids.contains("b.pdf"));
        Ok(())
    }

    #[tokio::test]
    async fn undecodable_record_is_an_error() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("processed")?;
        let path = dir.path().join("processed_files.log");
        std::fs::write(&path, [0x61, 0xff, 0xfe, b'\n'])?;
        assert!(ProcessedSetStore::new(&path).load().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn truncated_last_line_is_not_glued_to_the_next_id() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("processed")?;
        let path = dir.path().join("processed_files.log");
        std::fs::write(&path, "a.pdf\nhalf-writ")?;
        let store = ProcessedSetStore::new(&path);
        store.record("b.pdf").await?;
        assert_eq!(std::fs::read_to_string(&path)?, "a.pdf\nhalf-writ\nb.pdf\n");
        let ids = store.load().await?;
        assert!(ids.contains("a.pdf") && ids.contains("b.pdf"));
        Ok(())
    }

    #[test]
    fn bare_file_name_has_a_syncable_parent() -> Result<()> {
        let parent = Path::new("processed_files.log").parent();
        assert_eq!(parent, Some(Path::new("")));
        sync_dir(Path::new(""))?;
        Ok(())
    }

    #[tokio::test]
    async fn first_record_creates_the_file() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("processed")?;
        let store = ProcessedSetStore::new(dir.path().join("processed_files.log"));
        store.record("a.pdf").await?;
        assert_eq!(std::fs::read_to_string(store.path())?, "a.pdf\n");
        Ok(())
    }

    #[tokio::test]
    async fn multiline_ids_are_rejected() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("processed")?;
        let store = ProcessedSetStore::new(dir.path().join("processed_files.log"));
        assert!(store.record("evil\nother.pdf").await.is_err());
        assert!(store.record("").await.is_err());
        assert!(store.load().await?.is_empty());
        Ok(())
    }
}
