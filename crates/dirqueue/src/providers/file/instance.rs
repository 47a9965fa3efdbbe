//! Process-instance numbering.
//!
//! `.conf/process` holds the last instance id handed out for a queue
//! directory. Every `FileQueue::open` takes the next one under the lock, so
//! ids are never reused and handles (`<instance>_<sequence>`) stay unique for
//! the life of the directory.

use super::lock::DirLock;
use super::settings::{read_counter, write_counter};
use crate::error::{ConfigurationError, QueueError};
use std::path::Path;
use tracing::info;

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;

/// Claim the next instance id recorded in `process_path`
///
/// The first opener of a directory gets 0.
pub(crate) async fn claim_instance_id(process_path: &Path, lock: &DirLock) -> Result<u64, QueueError> {
    let _guard = lock.acquire().await?;

    let instance_id = match read_counter(process_path).await? {
        Some(last) => last.checked_add(1).ok_or_else(|| ConfigurationError::Invalid {
            message: format!("{} has no instance ids left", process_path.display()),
        })?,
        None => 0,
    };

    write_counter(process_path, instance_id).await?;
    info!(path = %process_path.display(), instance_id, "Claimed process instance id");

    Ok(instance_id)
}
