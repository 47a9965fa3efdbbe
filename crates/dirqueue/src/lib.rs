//! # Dirqueue
//!
//! Message queues with at-least-once delivery through a visibility timeout.
//!
//! A pulled message stays hidden for the queue's visibility timeout. If it is
//! not deleted in that time it becomes available again under a new handle.
//!
//! Three backends implement the same [`MessageQueue`] contract:
//! - [`FileQueue`] - a queue directory on a filesystem shared by any number
//!   of processes, coordinated through a lock directory and small
//!   configuration files
//! - [`InMemoryQueue`] - process-local strict FIFO queue, useful as a
//!   reference in tests
//! - [`SqsQueue`] - proxy onto an Amazon SQS queue
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Queue names, handles and messages
//! - [`config`] - Provider types and configuration loading
//! - [`queue`] - The queue contract
//! - [`providers`] - Backend implementations
//! - [`registry`] - Lazily constructed queues keyed by name
//!
//! ## Example
//!
//! ```no_run
//! use dirqueue::{MessageQueue, ProviderConfig, QueueName, QueueRegistry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = QueueRegistry::from_config(&ProviderConfig::default());
//! let queue = registry.get_queue(&QueueName::new("orders".to_string())?).await?;
//!
//! queue.push("order-42").await?;
//! if let Some(message) = queue.pull().await? {
//!     // process the message, then acknowledge it
//!     queue.delete(&message.handle).await?;
//! }
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod config;
pub mod error;
pub mod message;
pub mod providers;
pub mod queue;
pub mod registry;

mod redelivery;

// Re-export commonly used types at crate root for convenience
pub use config::{
    visibility_timeout_secs, AwsSqsConfig, FileQueueConfig, InMemoryConfig, ProviderConfig,
    ProviderType, RuntimeConfig, WatchMode, MAX_VISIBILITY_TIMEOUT_SECS,
};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{Message, MessageHandle, QueueName};
pub use providers::{FileQueue, InMemoryQueue, SqsQueue};
pub use queue::MessageQueue;
pub use registry::{
    FileQueueFactory, InMemoryQueueFactory, QueueFactory, QueueRegistry, SqsQueueFactory,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
