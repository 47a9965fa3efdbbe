//! Tests for the dirqueue library surface.

use super::*;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_queue_name_validation() {
    // Valid names
    assert!(QueueName::new("test-queue".to_string()).is_ok());
    assert!(QueueName::new("queue_123".to_string()).is_ok());
    assert!(QueueName::new("a".to_string()).is_ok());

    // Invalid names
    assert!(QueueName::new("".to_string()).is_err());
    assert!(QueueName::new("../escape".to_string()).is_err());
    assert!(QueueName::new("with/slash".to_string()).is_err());
    assert!(QueueName::new("special@chars".to_string()).is_err());
}

#[test]
fn test_provider_capabilities() {
    assert!(ProviderType::File.is_shared());
    assert!(!ProviderType::File.is_strict_fifo());
    assert!(!ProviderType::InMemory.is_shared());
    assert!(ProviderType::InMemory.is_strict_fifo());
    assert!(ProviderType::AwsSqs.is_shared());
}

/// Exercise the contract through a trait object the way callers use it
async fn push_pull_delete(queue: Arc<dyn MessageQueue>) {
    let handle = queue.push("payload").await.unwrap();
    let message = queue.pull().await.unwrap().unwrap();
    assert_eq!(message.handle, handle);
    assert_eq!(message.body, "payload");

    queue.delete(&message.handle).await.unwrap();
    assert!(queue.pull().await.unwrap().is_none());

    queue.close().await.unwrap();
    assert!(matches!(
        queue.pull().await,
        Err(QueueError::QueueClosed { .. })
    ));
}

#[tokio::test]
async fn test_contract_on_file_backend() {
    let dir = TempDir::new().unwrap();
    let registry = QueueRegistry::from_config(&ProviderConfig::File(FileQueueConfig {
        watch_mode: WatchMode::Poll,
        ..FileQueueConfig::new(dir.path())
    }));

    let queue = registry
        .get_queue(&QueueName::new("contract".to_string()).unwrap())
        .await
        .unwrap();
    push_pull_delete(queue).await;
}

#[tokio::test]
async fn test_contract_on_in_memory_backend() {
    let registry = QueueRegistry::from_config(&ProviderConfig::InMemory(InMemoryConfig::default()));

    let queue = registry
        .get_queue(&QueueName::new("contract".to_string()).unwrap())
        .await
        .unwrap();
    push_pull_delete(queue).await;
}
