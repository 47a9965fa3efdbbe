//! Tests for the queue registry.

use super::*;
use crate::message::{Message, MessageHandle};
use chrono::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

fn queue_name(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

fn same_queue(a: &Arc<dyn MessageQueue>, b: &Arc<dyn MessageQueue>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Queue whose close always fails
struct BrokenQueue {
    name: QueueName,
}

#[async_trait]
impl MessageQueue for BrokenQueue {
    async fn set_visibility_timeout(&self, _timeout: Duration) -> Result<(), QueueError> {
        Ok(())
    }

    async fn push(&self, _body: &str) -> Result<MessageHandle, QueueError> {
        Ok(MessageHandle::new("0_0"))
    }

    async fn pull(&self) -> Result<Option<Message>, QueueError> {
        Ok(None)
    }

    async fn delete(&self, _handle: &MessageHandle) -> Result<(), QueueError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        Err(QueueError::ConnectionFailed {
            message: "close failed".to_string(),
        })
    }

    fn visibility_timeout(&self) -> Duration {
        Duration::seconds(10)
    }

    fn queue_name(&self) -> &QueueName {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

/// Factory counting constructions; names starting with "broken" get a
/// [`BrokenQueue`] and "missing" fails to construct
#[derive(Default)]
struct CountingFactory {
    created: Arc<AtomicUsize>,
}

#[async_trait]
impl QueueFactory for CountingFactory {
    async fn create_queue(&self, name: &QueueName) -> Result<Arc<dyn MessageQueue>, QueueError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        if name.as_str() == "missing" {
            return Err(QueueError::QueueNotFound {
                queue_name: name.to_string(),
            });
        }
        if name.as_str().starts_with("broken") {
            return Ok(Arc::new(BrokenQueue { name: name.clone() }));
        }
        Ok(Arc::new(InMemoryQueue::new(
            name.clone(),
            &InMemoryConfig::default(),
        )))
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

fn counting_registry() -> (QueueRegistry, Arc<AtomicUsize>) {
    let factory = CountingFactory::default();
    let created = Arc::clone(&factory.created);
    (QueueRegistry::new(Box::new(factory)), created)
}

#[tokio::test]
async fn test_repeated_lookups_share_one_queue() {
    let (registry, created) = counting_registry();

    let first = registry.get_queue(&queue_name("orders")).await.unwrap();
    let second = registry.get_queue(&queue_name("orders")).await.unwrap();

    assert!(same_queue(&first, &second));
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(registry.len().await, 1);
    assert!(registry.contains(&queue_name("orders")).await);
}

#[tokio::test]
async fn test_different_names_get_different_queues() {
    let (registry, created) = counting_registry();

    let orders = registry.get_queue(&queue_name("orders")).await.unwrap();
    let invoices = registry.get_queue(&queue_name("invoices")).await.unwrap();

    assert!(!same_queue(&orders, &invoices));
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lookups_construct_once() {
    let (registry, created) = counting_registry();
    let registry = Arc::new(registry);

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let registry = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move {
            registry.get_queue(&queue_name("orders")).await.unwrap()
        }));
    }

    let mut queues = Vec::new();
    for task in tasks {
        queues.push(task.await.unwrap());
    }

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(queues.iter().all(|queue| same_queue(queue, &queues[0])));
}

/// Factory whose "slow" queue is not built until the gate opens
struct GatedFactory {
    gate: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl QueueFactory for GatedFactory {
    async fn create_queue(&self, name: &QueueName) -> Result<Arc<dyn MessageQueue>, QueueError> {
        if name.as_str() == "slow" {
            self.gate.notified().await;
        }
        Ok(Arc::new(InMemoryQueue::new(
            name.clone(),
            &InMemoryConfig::default(),
        )))
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_construction_does_not_block_other_names() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let registry = Arc::new(QueueRegistry::new(Box::new(GatedFactory {
        gate: Arc::clone(&gate),
    })));

    let slow = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.get_queue(&queue_name("slow")).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let orders = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        registry.get_queue(&queue_name("orders")),
    )
    .await
    .expect("lookup of another name is not blocked");
    assert!(orders.is_ok());
    assert!(!registry.contains(&queue_name("slow")).await);
    assert_eq!(registry.len().await, 1);

    gate.notify_one();
    slow.await.unwrap().unwrap();
    assert!(registry.contains(&queue_name("slow")).await);
    assert_eq!(registry.len().await, 2);
}

#[tokio::test]
async fn test_failed_construction_is_not_cached() {
    let (registry, created) = counting_registry();

    assert!(registry.get_queue(&queue_name("missing")).await.is_err());
    assert!(registry.get_queue(&queue_name("missing")).await.is_err());

    assert_eq!(created.load(Ordering::SeqCst), 2);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_delete_queue_closes_and_evicts() {
    let (registry, created) = counting_registry();
    let queue = registry.get_queue(&queue_name("orders")).await.unwrap();
    queue.push("m").await.unwrap();

    let deleted = registry
        .delete_queue(&queue_name("orders"))
        .await
        .unwrap()
        .unwrap();

    assert!(same_queue(&queue, &deleted));
    assert!(matches!(
        queue.push("m").await,
        Err(QueueError::QueueClosed { .. })
    ));
    assert!(!registry.contains(&queue_name("orders")).await);

    // A later lookup builds a fresh queue
    let fresh = registry.get_queue(&queue_name("orders")).await.unwrap();
    assert!(!same_queue(&queue, &fresh));
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_delete_unknown_queue_returns_none() {
    let (registry, _) = counting_registry();

    let deleted = registry.delete_queue(&queue_name("orders")).await.unwrap();

    assert!(deleted.is_none());
}

#[tokio::test]
async fn test_shutdown_closes_everything_and_reports_failure() {
    let (registry, _) = counting_registry();
    let healthy = registry.get_queue(&queue_name("orders")).await.unwrap();
    registry.get_queue(&queue_name("broken-a")).await.unwrap();

    let result = registry.shutdown().await;

    assert!(matches!(result, Err(QueueError::ConnectionFailed { .. })));
    assert!(registry.is_empty().await);
    assert!(matches!(
        healthy.pull().await,
        Err(QueueError::QueueClosed { .. })
    ));
}

#[tokio::test]
async fn test_shutdown_of_empty_registry() {
    let (registry, _) = counting_registry();
    assert!(registry.shutdown().await.is_ok());
}

#[tokio::test]
async fn test_from_config_selects_provider() {
    let dir = TempDir::new().unwrap();

    let file = QueueRegistry::from_config(&ProviderConfig::File(FileQueueConfig::new(dir.path())));
    let memory = QueueRegistry::from_config(&ProviderConfig::InMemory(InMemoryConfig::default()));
    let sqs = QueueRegistry::from_config(&ProviderConfig::AwsSqs(AwsSqsConfig::default()));

    assert_eq!(file.provider_type(), ProviderType::File);
    assert_eq!(memory.provider_type(), ProviderType::InMemory);
    assert_eq!(sqs.provider_type(), ProviderType::AwsSqs);
}

#[tokio::test]
async fn test_in_memory_factory_rejects_oversized_default_timeout() {
    let registry = QueueRegistry::from_config(&ProviderConfig::InMemory(InMemoryConfig {
        default_visibility_timeout_secs: u64::MAX,
    }));

    let result = registry.get_queue(&queue_name("orders")).await;

    assert!(matches!(result, Err(QueueError::ConfigurationError(_))));
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_file_registry_creates_queue_directories() {
    let dir = TempDir::new().unwrap();
    let registry =
        QueueRegistry::from_config(&ProviderConfig::File(FileQueueConfig::new(dir.path())));

    let queue = registry.get_queue(&queue_name("orders")).await.unwrap();
    queue.push("m").await.unwrap();

    assert_eq!(queue.provider_type(), ProviderType::File);
    assert!(dir.path().join("orders/messages").exists());

    registry.shutdown().await.unwrap();
    assert!(!dir.path().join("orders/messages").exists());
}
