//! Queue provider implementations.
//!
//! This module contains concrete implementations of the `MessageQueue` trait
//! for different queue backends.

pub mod aws;
pub mod file;
pub mod memory;

pub use aws::{AwsError, SqsQueue};
pub use file::FileQueue;
pub use memory::InMemoryQueue;
