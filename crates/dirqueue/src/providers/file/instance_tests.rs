//! Tests for process-instance numbering.

use super::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn test_lock(dir: &TempDir) -> DirLock {
    DirLock::new(
        dir.path().join(".lock"),
        Duration::from_millis(2),
        Some(Duration::from_secs(30)),
    )
}

#[tokio::test]
async fn test_first_claim_is_zero_and_persisted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("process");

    let id = claim_instance_id(&path, &test_lock(&dir)).await.unwrap();

    assert_eq!(id, 0);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "0\n");
}

#[tokio::test]
async fn test_claims_increment_from_stored_value() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("process");
    std::fs::write(&path, "41").unwrap();
    let lock = test_lock(&dir);

    assert_eq!(claim_instance_id(&path, &lock).await.unwrap(), 42);
    assert_eq!(claim_instance_id(&path, &lock).await.unwrap(), 43);
}

#[tokio::test]
async fn test_malformed_process_file_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("process");
    std::fs::write(&path, "x").unwrap();

    let result = claim_instance_id(&path, &test_lock(&dir)).await;
    assert!(matches!(result, Err(QueueError::ConfigurationError(_))));
}

#[tokio::test]
async fn test_exhausted_counter_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("process");
    std::fs::write(&path, u64::MAX.to_string()).unwrap();

    let result = claim_instance_id(&path, &test_lock(&dir)).await;
    assert!(matches!(
        result,
        Err(QueueError::ConfigurationError(ConfigurationError::Invalid { .. }))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_are_distinct() {
    let dir = TempDir::new().unwrap();
    let path = Arc::new(dir.path().join("process"));
    let lock = Arc::new(test_lock(&dir));

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let path = Arc::clone(&path);
        let lock = Arc::clone(&lock);
        tasks.push(tokio::spawn(async move {
            claim_instance_id(&path, &lock).await.unwrap()
        }));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        assert!(ids.insert(task.await.unwrap()));
    }

    assert_eq!(ids, (0..20).collect::<HashSet<u64>>());
}
