//! Common test utilities for dirqueue integration tests
//!
//! This module provides:
//! - File queue configurations tuned for fast tests
//! - Helpers for opening queues and waiting on eventually-consistent state
//! - Log capture for failing tests

use dirqueue::{FileQueue, FileQueueConfig, Message, MessageQueue, QueueName, WatchMode};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Route `tracing` output through the test harness; `RUST_LOG` selects levels
#[allow(dead_code)]
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[allow(dead_code)]
pub fn queue_name(name: &str) -> QueueName {
    QueueName::new(name.to_string()).expect("valid queue name")
}

/// File configuration with short lock back-off and fast polling
#[allow(dead_code)]
pub fn file_config(root: &Path) -> FileQueueConfig {
    FileQueueConfig {
        lock_retry_interval_ms: 2,
        poll_interval_ms: 50,
        watch_mode: WatchMode::Poll,
        ..FileQueueConfig::new(root)
    }
}

#[allow(dead_code)]
pub async fn open_file_queue(root: &TempDir, name: &str) -> FileQueue {
    FileQueue::open(queue_name(name), &file_config(root.path()))
        .await
        .expect("queue opens")
}

/// Poll `condition` every 20ms until it holds or `bound` elapses
#[allow(dead_code)]
pub async fn eventually<F, Fut>(bound: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + bound;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Pull until a message is available or `bound` elapses
#[allow(dead_code)]
pub async fn pull_within(queue: &dyn MessageQueue, bound: Duration) -> Option<Message> {
    let deadline = tokio::time::Instant::now() + bound;
    loop {
        if let Some(message) = queue.pull().await.expect("pull succeeds") {
            return Some(message);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Pull every currently available message without acknowledging it
#[allow(dead_code)]
pub async fn drain(queue: &dyn MessageQueue) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Some(message) = queue.pull().await.expect("pull succeeds") {
        messages.push(message);
    }
    messages
}
