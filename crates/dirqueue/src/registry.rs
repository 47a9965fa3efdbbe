//! Lazily constructed queues keyed by name.

use crate::config::{AwsSqsConfig, FileQueueConfig, InMemoryConfig, ProviderConfig, ProviderType};
use crate::error::QueueError;
use crate::message::QueueName;
use crate::providers::{FileQueue, InMemoryQueue, SqsQueue};
use crate::queue::MessageQueue;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info};

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

/// Constructs queues of one provider type
#[async_trait]
pub trait QueueFactory: Send + Sync {
    async fn create_queue(&self, name: &QueueName) -> Result<Arc<dyn MessageQueue>, QueueError>;

    fn provider_type(&self) -> ProviderType;
}

/// Opens [`FileQueue`]s under one root directory
pub struct FileQueueFactory {
    config: FileQueueConfig,
}

impl FileQueueFactory {
    pub fn new(config: FileQueueConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl QueueFactory for FileQueueFactory {
    async fn create_queue(&self, name: &QueueName) -> Result<Arc<dyn MessageQueue>, QueueError> {
        Ok(Arc::new(FileQueue::open(name.clone(), &self.config).await?))
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::File
    }
}

/// Creates process-local [`InMemoryQueue`]s
#[derive(Default)]
pub struct InMemoryQueueFactory {
    config: InMemoryConfig,
}

impl InMemoryQueueFactory {
    pub fn new(config: InMemoryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl QueueFactory for InMemoryQueueFactory {
    async fn create_queue(&self, name: &QueueName) -> Result<Arc<dyn MessageQueue>, QueueError> {
        self.config.validate()?;
        Ok(Arc::new(InMemoryQueue::new(name.clone(), &self.config)))
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

/// Opens [`SqsQueue`] proxies
pub struct SqsQueueFactory {
    config: AwsSqsConfig,
}

impl SqsQueueFactory {
    pub fn new(config: AwsSqsConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl QueueFactory for SqsQueueFactory {
    async fn create_queue(&self, name: &QueueName) -> Result<Arc<dyn MessageQueue>, QueueError> {
        Ok(Arc::new(SqsQueue::open(name.clone(), &self.config).await?))
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AwsSqs
    }
}

/// Process-wide map from queue names to open queues
///
/// The first lookup of a name constructs the queue; later lookups share it.
/// Each name has its own once-cell, so concurrent lookups of one name
/// construct it once while lookups of other names proceed. A lookup can still
/// wait as long as construction takes, which for the file provider includes
/// waiting for the queue lock.
pub struct QueueRegistry {
    factory: Box<dyn QueueFactory>,
    queues: Mutex<HashMap<QueueName, Arc<QueueSlot>>>,
}

type QueueSlot = OnceCell<Arc<dyn MessageQueue>>;

impl QueueRegistry {
    pub fn new(factory: Box<dyn QueueFactory>) -> Self {
        Self {
            factory,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Create a registry for the provider named in `config`
    pub fn from_config(config: &ProviderConfig) -> Self {
        let factory: Box<dyn QueueFactory> = match config {
            ProviderConfig::File(file) => Box::new(FileQueueFactory::new(file.clone())),
            ProviderConfig::InMemory(memory) => Box::new(InMemoryQueueFactory::new(memory.clone())),
            ProviderConfig::AwsSqs(aws) => Box::new(SqsQueueFactory::new(aws.clone())),
        };
        Self::new(factory)
    }

    pub fn provider_type(&self) -> ProviderType {
        self.factory.provider_type()
    }

    /// Get the queue named `name`, constructing it on first use
    pub async fn get_queue(&self, name: &QueueName) -> Result<Arc<dyn MessageQueue>, QueueError> {
        let slot = {
            let mut queues = self.queues.lock().await;
            Arc::clone(queues.entry(name.clone()).or_default())
        };

        let result = slot
            .get_or_try_init(|| async {
                let queue = self.factory.create_queue(name).await?;
                debug!(queue = %name, provider = ?self.factory.provider_type(), "Queue registered");
                Ok::<_, QueueError>(queue)
            })
            .await
            .map(Arc::clone);

        if result.is_err() {
            // Leave no empty slot behind unless another lookup is retrying it
            let mut queues = self.queues.lock().await;
            if let Some(current) = queues.get(name) {
                if Arc::ptr_eq(current, &slot) && !slot.initialized() {
                    queues.remove(name);
                }
            }
        }

        result
    }

    /// Close and evict the queue named `name`
    ///
    /// Returns the evicted queue, or `None` if it was never opened. The queue
    /// is evicted even when closing it fails.
    pub async fn delete_queue(
        &self,
        name: &QueueName,
    ) -> Result<Option<Arc<dyn MessageQueue>>, QueueError> {
        let Some(slot) = self.queues.lock().await.remove(name) else {
            return Ok(None);
        };
        let Some(queue) = slot.get().cloned() else {
            return Ok(None);
        };

        queue.close().await?;
        info!(queue = %name, "Queue deleted");

        Ok(Some(queue))
    }

    /// Close and evict every queue
    ///
    /// All queues are closed even if some fail; the first failure is returned.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        let queues: Vec<_> = self
            .queues
            .lock()
            .await
            .drain()
            .filter_map(|(name, slot)| slot.get().cloned().map(|queue| (name, queue)))
            .collect();
        let count = queues.len();

        let mut first_error = None;
        for (name, queue) in queues {
            if let Err(e) = queue.close().await {
                error!(queue = %name, error = %e, "Failed to close queue during shutdown");
                first_error.get_or_insert(e);
            }
        }

        info!(queues = count, "Queue registry shut down");
        first_error.map_or(Ok(()), Err)
    }

    /// Number of open queues
    pub async fn len(&self) -> usize {
        self.queues
            .lock()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether `name` has been opened; a lookup still constructing it does not count
    pub async fn contains(&self, name: &QueueName) -> bool {
        self.queues
            .lock()
            .await
            .get(name)
            .is_some_and(|slot| slot.initialized())
    }
}
