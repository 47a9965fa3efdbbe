//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a process-local queue that:
//! - Delivers in strict FIFO order with O(1) push and pull
//! - Implements visibility timeouts through the shared redelivery scheduler
//! - Keeps its visibility timeout local to the instance
//!
//! It is the reference backend other providers are compared against in tests.

use crate::config::{
    visibility_timeout_from_secs, visibility_timeout_secs, InMemoryConfig, ProviderType,
    MAX_VISIBILITY_TIMEOUT_SECS,
};
use crate::error::QueueError;
use crate::message::{validate_body, Message, MessageHandle, QueueName};
use crate::queue::MessageQueue;
use crate::redelivery::{RedeliveryScheduler, RedeliveryTarget};
use async_trait::async_trait;
use chrono::Duration;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Message storage shared with the redelivery task
struct MemoryStore {
    name: QueueName,
    messages: Mutex<VecDeque<Message>>,
    next_sequence: AtomicU64,
    closed: AtomicBool,
}

impl MemoryStore {
    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::QueueClosed {
                queue_name: self.name.to_string(),
            });
        }
        Ok(())
    }

    async fn push(&self, body: &str) -> Result<MessageHandle, QueueError> {
        self.ensure_open()?;
        validate_body(body)?;

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let handle = MessageHandle::from_parts(0, sequence);
        self.messages
            .lock()
            .await
            .push_back(Message::new(handle.clone(), body));

        Ok(handle)
    }
}

#[async_trait]
impl RedeliveryTarget for MemoryStore {
    async fn redeliver(&self, body: &str) -> Result<MessageHandle, QueueError> {
        self.push(body).await
    }
}

// ============================================================================
// In-Memory Queue
// ============================================================================

/// Strict FIFO queue living in the memory of one process
///
/// Redelivered messages rejoin at the back of the queue.
pub struct InMemoryQueue {
    name: QueueName,
    store: Arc<MemoryStore>,
    scheduler: RedeliveryScheduler,
    visibility_timeout_secs: AtomicU64,
}

impl InMemoryQueue {
    /// Create an empty queue; must be called within a tokio runtime
    ///
    /// A default timeout above [`MAX_VISIBILITY_TIMEOUT_SECS`] is capped.
    pub fn new(name: QueueName, config: &InMemoryConfig) -> Self {
        let store = Arc::new(MemoryStore {
            name: name.clone(),
            messages: Mutex::new(VecDeque::new()),
            next_sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        let scheduler = RedeliveryScheduler::spawn(store.clone());

        Self {
            name,
            store,
            scheduler,
            visibility_timeout_secs: AtomicU64::new(
                config
                    .default_visibility_timeout_secs
                    .min(MAX_VISIBILITY_TIMEOUT_SECS),
            ),
        }
    }

    /// Number of messages waiting to be pulled
    pub async fn available(&self) -> usize {
        self.store.messages.lock().await.len()
    }

    /// Number of pulled messages not yet deleted
    pub async fn in_flight(&self) -> usize {
        self.scheduler.in_flight()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn set_visibility_timeout(&self, timeout: Duration) -> Result<(), QueueError> {
        self.store.ensure_open()?;
        let secs = visibility_timeout_secs(timeout)?;
        self.visibility_timeout_secs.store(secs, Ordering::SeqCst);
        Ok(())
    }

    async fn push(&self, body: &str) -> Result<MessageHandle, QueueError> {
        self.store.push(body).await
    }

    async fn pull(&self) -> Result<Option<Message>, QueueError> {
        self.store.ensure_open()?;

        let Some(message) = self.store.messages.lock().await.pop_front() else {
            return Ok(None);
        };

        let timeout =
            std::time::Duration::from_secs(self.visibility_timeout_secs.load(Ordering::SeqCst));
        self.scheduler.arm(&message, timeout);

        Ok(Some(message))
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<(), QueueError> {
        self.store.ensure_open()?;
        self.scheduler.cancel(handle);
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.store.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let discarded = self.scheduler.shutdown().await;
        self.store.messages.lock().await.clear();
        debug!(queue = %self.name, discarded, "In-memory queue closed");

        Ok(())
    }

    fn visibility_timeout(&self) -> Duration {
        visibility_timeout_from_secs(self.visibility_timeout_secs.load(Ordering::SeqCst))
    }

    fn queue_name(&self) -> &QueueName {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}
