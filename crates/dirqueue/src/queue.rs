//! The queue contract shared by every backend.

use crate::config::ProviderType;
use crate::error::QueueError;
use crate::message::{Message, MessageHandle, QueueName};
use async_trait::async_trait;
use chrono::Duration;

/// Main interface for queue operations across all providers
///
/// Delivery is at-least-once: a pulled message that is not deleted within the
/// visibility timeout becomes available again under a new handle. No provider
/// promises an order except where [`ProviderType::is_strict_fifo`] says so.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Change how long pulled messages stay hidden before redelivery
    ///
    /// Applies to messages pulled after the call returns.
    async fn set_visibility_timeout(&self, timeout: Duration) -> Result<(), QueueError>;

    /// Enqueue a message and return the handle assigned to it
    async fn push(&self, body: &str) -> Result<MessageHandle, QueueError>;

    /// Take one available message, or `None` when the queue is empty
    async fn pull(&self) -> Result<Option<Message>, QueueError>;

    /// Acknowledge a pulled message
    ///
    /// Unknown handles are ignored: the message may already have been
    /// acknowledged, redelivered under a new handle, or pulled elsewhere.
    async fn delete(&self, handle: &MessageHandle) -> Result<(), QueueError>;

    /// Release all resources and discard the backing storage
    ///
    /// Pending redeliveries are dropped. Closing twice is a no-op.
    async fn close(&self) -> Result<(), QueueError>;

    /// Visibility timeout that the next pull will use
    fn visibility_timeout(&self) -> Duration;

    /// Get queue name
    fn queue_name(&self) -> &QueueName;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}
