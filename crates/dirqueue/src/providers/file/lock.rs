//! Cross-process mutual exclusion through atomic directory creation.
//!
//! `mkdir` either creates the directory or fails because it exists, so exactly
//! one contender wins. The lock has no owner record: a holder that dies
//! without releasing leaves the directory behind and every later `acquire`
//! ends in [`QueueError::LockTimeout`] until an operator removes it.

use crate::error::QueueError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{trace, warn};

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;

/// Lock backed by the existence of a directory
#[derive(Debug, Clone)]
pub(crate) struct DirLock {
    path: PathBuf,
    retry_interval: Duration,
    timeout: Option<Duration>,
}

impl DirLock {
    /// Create a lock at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Directory whose existence means "held"; its parent must exist
    /// * `retry_interval` - Sleep between attempts while another holder has it
    /// * `timeout` - Give up after this long; `None` retries forever
    pub(crate) fn new(path: PathBuf, retry_interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            path,
            retry_interval,
            timeout,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Wait until the lock directory can be created
    ///
    /// Cancel safe: dropping the future never leaves the lock held.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` when the configured timeout elapses and `Storage`
    /// when the directory cannot be created for any reason other than
    /// already existing.
    pub(crate) async fn acquire(&self) -> Result<DirLockGuard, QueueError> {
        let started = Instant::now();

        loop {
            // Creating the directory and the guard must not be split by an
            // await, or a cancelled caller would leave the lock held
            match std::fs::create_dir(&self.path) {
                Ok(()) => {
                    trace!(path = %self.path.display(), "Lock acquired");
                    return Ok(DirLockGuard {
                        path: self.path.clone(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let waited = started.elapsed();
                    if let Some(timeout) = self.timeout {
                        if waited >= timeout {
                            return Err(QueueError::LockTimeout {
                                path: self.path.display().to_string(),
                                waited,
                            });
                        }
                    }
                    tokio::time::sleep(self.retry_interval).await;
                }
                Err(e) => return Err(QueueError::storage(&self.path, e)),
            }
        }
    }
}

/// Held lock; dropping it removes the lock directory
#[derive(Debug)]
pub(crate) struct DirLockGuard {
    path: PathBuf,
}

impl Drop for DirLockGuard {
    fn drop(&mut self) {
        match std::fs::remove_dir(&self.path) {
            Ok(()) => trace!(path = %self.path.display(), "Lock released"),
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove lock directory; the queue stays locked"
            ),
        }
    }
}
