//! Removal of the temporary files a request leaves behind.
//!
//! Every upload, download, converted file and segment directory is pushed
//! onto a [`CleanupList`] as soon as its path is known, before anything is
//! written to it. The list is drained once when the request ends, whatever
//! the outcome. A [`CleanupGuard`] covers the case where the request future
//! is dropped before it gets there, such as when the client disconnects.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Append-only list of temporary paths owned by one request.
///
/// Cloning yields another handle to the same list, so concurrent tasks can
/// register paths while the request is in flight.
#[derive(Debug, Clone, Default)]
pub struct CleanupList {
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl CleanupList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a file or directory for removal.
    pub fn push(&self, path: impl Into<PathBuf>) {
        self.paths.lock().push(path.into());
    }

    pub fn extend<I>(&self, paths: I)
    where
        I: IntoIterator,
        I::Item: Into<PathBuf>,
    {
        self.paths.lock().extend(paths.into_iter().map(Into::into));
    }

    /// Snapshot of the registered paths, in registration order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.lock().clone()
    }

    /// Removes everything registered so far and empties the list.
    ///
    /// Returns the number of paths that were actually removed.
    pub async fn run(self) -> usize {
        let paths = std::mem::take(&mut *self.paths.lock());
        cleanup(&paths).await
    }
}

/// Owns a request's [`CleanupList`] and drains it exactly once.
///
/// Call [`CleanupGuard::run`] on the normal exit path. If the guard is
/// dropped without that, the list is drained on a background task instead.
#[derive(Debug)]
pub struct CleanupGuard {
    list: CleanupList,
    armed: bool,
}

impl CleanupGuard {
    pub fn new(list: CleanupList) -> Self {
        Self { list, armed: true }
    }

    /// Handle for registering paths while the request runs.
    pub fn list(&self) -> &CleanupList {
        &self.list
    }

    /// Removes everything registered and disarms the guard.
    pub async fn run(mut self) -> usize {
        self.armed = false;
        self.list.clone().run().await
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let list = self.list.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(
                    registered = list.paths.lock().len(),
                    "Request dropped before finishing, cleaning up in background"
                );
                handle.spawn(list.run());
            }
            Err(_) => {
                warn!(paths = ?list.paths(), "No runtime to clean up dropped request");
            }
        }
    }
}

/// Best-effort removal of `paths`.
///
/// Files go first, then directories along with whatever is left inside
/// them. A failure is logged and the remaining paths are still attempted.
/// Paths that no longer exist are skipped quietly.
pub async fn cleanup(paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    let mut dirs = Vec::new();

    for path in paths {
        match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_dir() => dirs.push(path),
            Ok(_) => {
                if remove(path, tokio::fs::remove_file(path).await) {
                    removed += 1;
                }
            }
            Err(e) => report(path, e),
        }
    }

    for dir in dirs {
        if remove(dir, tokio::fs::remove_dir_all(dir).await) {
            removed += 1;
        }
    }

    debug!(removed, registered = paths.len(), "Cleaned up temporary files");
    removed
}

fn remove(path: &Path, result: std::io::Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            report(path, e);
            false
        }
    }
}

fn report(path: &Path, error: std::io::Error) {
    if error.kind() == ErrorKind::NotFound {
        debug!(path = ?path, "Temporary file already gone");
    } else {
        warn!(path = ?path, error = %error, "Failed to delete temporary file");
    }
}
