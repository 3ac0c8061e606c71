//! Running blocking work without stalling the Tokio executor.

use crate::prelude::*;

/// Run `f` on Tokio's blocking thread pool. If `f` panics, the panic is
/// resumed in the caller rather than being turned into a [`JoinError`].
///
/// [`JoinError`]: tokio::task::JoinError
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(err) => std::panic::resume_unwind(err.into_panic()),
    }
}

/// Flush a directory's entries to disk, so that files created or renamed in
/// it survive a crash. Blocks, so call it from blocking code.
pub fn sync_dir(dir: &Path) -> Result<()> {
    // An empty parent means the current directory.
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    #[cfg(unix)]
    std::fs::File::open(dir)
        .and_then(|handle| handle.sync_all())
        .with_context(|| format!("cannot sync directory {:?}", dir.display()))?;
    #[cfg(not(unix))]
    trace!(dir = %dir.display(), "directory sync not supported on this platform");
    Ok(())
}

/// Pulls items from a CPU-heavy iterator on the blocking pool, one at a time.
///
/// The iterator is moved onto a worker thread for each call to
/// [`Self::next`] and handed back afterwards, so items arrive in exactly the
/// order the iterator produces them. Once the iterator is exhausted it is
/// dropped, and every later call returns `None`.
pub struct BlockingIter<I> {
    iter: Option<I>,
}

impl<I, T> BlockingIter<I>
where
    I: Iterator<Item = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    pub fn new(iter: I) -> Self {
        Self { iter: Some(iter) }
    }

    /// Fetch the next item.
    pub async fn next(&mut self) -> Option<Result<T>> {
        let mut iter = self.iter.take()?;
        let (item, iter) = spawn_blocking_propagating_panics(move || {
            let item = iter.next();
            (item, iter)
        })
        .await;
        if item.is_some() {
            self.iter = Some(iter);
        }
        item
    }
}
