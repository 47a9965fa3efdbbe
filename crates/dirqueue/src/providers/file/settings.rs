//! Visibility timeout shared by every process that opens a queue directory.
//!
//! The value lives in `.conf/timeout` as a plain integer number of seconds.
//! Writers hold the queue lock and replace the file by rename, so lock-free
//! readers never see a partial value. Propagation to other processes is
//! eventually consistent: see [`super::watcher`].

use super::lock::DirLock;
use super::store::replace_file;
use crate::config::MAX_VISIBILITY_TIMEOUT_SECS;
use crate::error::{ConfigurationError, QueueError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;

/// In-memory copy of the shared visibility timeout
#[derive(Debug)]
pub(crate) struct SharedSettings {
    timeout_path: PathBuf,
    visibility_timeout_secs: AtomicU64,
}

impl SharedSettings {
    /// Adopt the timeout already stored for the queue, or publish `default_secs`
    ///
    /// # Errors
    ///
    /// A `timeout` file that does not hold an integer between 0 and
    /// [`MAX_VISIBILITY_TIMEOUT_SECS`] is a fatal `ConfigurationError`.
    pub(crate) async fn initialize(
        timeout_path: PathBuf,
        default_secs: u64,
        lock: &DirLock,
    ) -> Result<Self, QueueError> {
        let _guard = lock.acquire().await?;

        let secs = match read_timeout(&timeout_path).await? {
            Some(stored) => stored,
            None => {
                write_counter(&timeout_path, default_secs).await?;
                default_secs
            }
        };

        Ok(Self {
            timeout_path,
            visibility_timeout_secs: AtomicU64::new(secs),
        })
    }

    pub(crate) fn timeout_path(&self) -> &Path {
        &self.timeout_path
    }

    pub(crate) fn visibility_timeout_secs(&self) -> u64 {
        self.visibility_timeout_secs.load(Ordering::SeqCst)
    }

    /// Persist a new timeout for every process sharing the directory
    pub(crate) async fn publish(&self, secs: u64, lock: &DirLock) -> Result<(), QueueError> {
        {
            let _guard = lock.acquire().await?;
            write_counter(&self.timeout_path, secs).await?;
        }
        self.visibility_timeout_secs.store(secs, Ordering::SeqCst);
        Ok(())
    }

    /// Re-read the shared timeout, keeping the last known value on failure
    ///
    /// Returns the value now in effect.
    pub(crate) async fn reload(&self) -> u64 {
        match read_timeout(&self.timeout_path).await {
            Ok(Some(secs)) => {
                let previous = self.visibility_timeout_secs.swap(secs, Ordering::SeqCst);
                if previous != secs {
                    info!(
                        path = %self.timeout_path.display(),
                        previous_secs = previous,
                        secs,
                        "Visibility timeout changed"
                    );
                }
                secs
            }
            Ok(None) => {
                debug!(
                    path = %self.timeout_path.display(),
                    "Timeout file missing, keeping last known value"
                );
                self.visibility_timeout_secs()
            }
            Err(e) => {
                warn!(
                    path = %self.timeout_path.display(),
                    error = %e,
                    "Could not reload visibility timeout, keeping last known value"
                );
                self.visibility_timeout_secs()
            }
        }
    }
}

/// Read a file holding a single integer; `None` when the file does not exist
pub(crate) async fn read_counter(path: &Path) -> Result<Option<u64>, QueueError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(QueueError::storage(path, e)),
    };

    contents.trim().parse::<u64>().map(Some).map_err(|_| {
        ConfigurationError::Parsing {
            message: format!(
                "{} holds {:?}, expected a non-negative integer",
                path.display(),
                contents.trim()
            ),
        }
        .into()
    })
}

/// Read the shared timeout file, rejecting values outside the allowed range
async fn read_timeout(path: &Path) -> Result<Option<u64>, QueueError> {
    match read_counter(path).await? {
        Some(secs) if secs > MAX_VISIBILITY_TIMEOUT_SECS => Err(ConfigurationError::Parsing {
            message: format!(
                "{} holds {}, expected at most {} seconds",
                path.display(),
                secs,
                MAX_VISIBILITY_TIMEOUT_SECS
            ),
        }
        .into()),
        stored => Ok(stored),
    }
}

/// Replace the contents of an integer file
pub(crate) async fn write_counter(path: &Path, value: u64) -> Result<(), QueueError> {
    replace_file(path, &format!("{}\n", value)).await
}
