//! Line-oriented backing store of available messages.
//!
//! None of these operations lock; callers hold the queue's [`DirLock`] around
//! every read-modify-write.
//!
//! [`DirLock`]: super::lock::DirLock

use crate::error::QueueError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

/// The `messages` file of one queue
#[derive(Debug, Clone)]
pub(crate) struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Append one encoded record to the end of the store
    pub(crate) async fn append(&self, record: &str) -> Result<(), QueueError> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| QueueError::storage(&self.path, e))?;

        let mut line = String::with_capacity(record.len() + 1);
        line.push_str(record);
        line.push('\n');

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| QueueError::storage(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| QueueError::storage(&self.path, e))
    }

    /// Read every non-empty record in store order; a missing file is empty
    pub(crate) async fn read_all(&self) -> Result<Vec<String>, QueueError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(contents
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(QueueError::storage(&self.path, e)),
        }
    }

    /// Replace the whole store with `records`
    pub(crate) async fn rewrite(&self, records: &[String]) -> Result<(), QueueError> {
        let mut contents = String::new();
        for record in records {
            contents.push_str(record);
            contents.push('\n');
        }
        replace_file(&self.path, &contents).await
    }

    /// Delete the store; a missing file is not an error
    pub(crate) async fn remove(&self) -> Result<(), QueueError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QueueError::storage(&self.path, e)),
        }
    }
}

/// Write `contents` to a temporary sibling, then rename it over `path`
///
/// Readers that do not take the lock see either the old or the new contents.
pub(crate) async fn replace_file(path: &Path, contents: &str) -> Result<(), QueueError> {
    let temp_path = path.with_extension("tmp");

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| QueueError::storage(&temp_path, e))?;
    file.write_all(contents.as_bytes())
        .await
        .map_err(|e| QueueError::storage(&temp_path, e))?;
    file.flush()
        .await
        .map_err(|e| QueueError::storage(&temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| QueueError::storage(path, e))
}
