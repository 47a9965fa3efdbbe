//! Tests for the redelivery scheduler.
//!
//! These run on a paused clock so visibility timeouts elapse instantly.

use super::*;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Target that records redelivered bodies and can fail a number of times first
#[derive(Default)]
struct RecordingTarget {
    bodies: tokio::sync::Mutex<Vec<String>>,
    failures_left: AtomicUsize,
    next_sequence: AtomicU64,
}

impl RecordingTarget {
    fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    async fn bodies(&self) -> Vec<String> {
        self.bodies.lock().await.clone()
    }
}

#[async_trait]
impl RedeliveryTarget for RecordingTarget {
    async fn redeliver(&self, body: &str) -> Result<MessageHandle, QueueError> {
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::LockTimeout {
                path: "test/.lock".to_string(),
                waited: Duration::from_secs(10),
            });
        }

        self.bodies.lock().await.push(body.to_string());
        Ok(MessageHandle::from_parts(
            9,
            self.next_sequence.fetch_add(1, Ordering::SeqCst),
        ))
    }
}

fn message(sequence: u64, body: &str) -> Message {
    Message::new(MessageHandle::from_parts(0, sequence), body)
}

#[tokio::test(start_paused = true)]
async fn test_expired_message_is_redelivered_once() {
    let target = Arc::new(RecordingTarget::default());
    let scheduler = RedeliveryScheduler::spawn(target.clone());

    scheduler.arm(&message(0, "m"), Duration::from_secs(1));
    assert_eq!(scheduler.in_flight(), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(target.bodies().await, vec!["m".to_string()]);
    assert_eq!(scheduler.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_message_is_hidden_until_deadline() {
    let target = Arc::new(RecordingTarget::default());
    let scheduler = RedeliveryScheduler::spawn(target.clone());

    scheduler.arm(&message(0, "m"), Duration::from_secs(10));
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(target.bodies().await.is_empty());
    assert_eq!(scheduler.in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_deadline_prevents_redelivery() {
    let target = Arc::new(RecordingTarget::default());
    let scheduler = RedeliveryScheduler::spawn(target.clone());
    let pulled = message(0, "m");

    scheduler.arm(&pulled, Duration::from_secs(1));
    assert!(scheduler.cancel(&pulled.handle));
    assert!(!scheduler.cancel(&pulled.handle));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(target.bodies().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_expiry_is_too_late() {
    let target = Arc::new(RecordingTarget::default());
    let scheduler = RedeliveryScheduler::spawn(target.clone());
    let pulled = message(0, "m");

    scheduler.arm(&pulled, Duration::from_secs(1));
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(!scheduler.cancel(&pulled.handle));
    assert_eq!(target.bodies().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_handle_cancel_is_noop() {
    let target = Arc::new(RecordingTarget::default());
    let scheduler = RedeliveryScheduler::spawn(target);

    assert!(!scheduler.cancel(&MessageHandle::new("never-issued")));
}

#[tokio::test(start_paused = true)]
async fn test_deadlines_fire_independently() {
    let target = Arc::new(RecordingTarget::default());
    let scheduler = RedeliveryScheduler::spawn(target.clone());

    scheduler.arm(&message(0, "slow"), Duration::from_secs(5));
    scheduler.arm(&message(1, "fast"), Duration::from_secs(1));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(target.bodies().await, vec!["fast".to_string()]);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(
        target.bodies().await,
        vec!["fast".to_string(), "slow".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_redelivery_is_retried() {
    let target = Arc::new(RecordingTarget::failing(2));
    let scheduler = RedeliveryScheduler::spawn(target.clone());

    scheduler.arm(&message(0, "m"), Duration::from_secs(1));

    // First attempt at 1s, retries at 2s and 3s
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(target.bodies().await.is_empty());
    assert_eq!(scheduler.in_flight(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(target.bodies().await, vec!["m".to_string()]);
    assert_eq!(scheduler.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_discards_pending_redeliveries() {
    let target = Arc::new(RecordingTarget::default());
    let scheduler = RedeliveryScheduler::spawn(target.clone());

    scheduler.arm(&message(0, "a"), Duration::from_secs(1));
    scheduler.arm(&message(1, "b"), Duration::from_secs(1));

    assert_eq!(scheduler.shutdown().await, 2);
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(target.bodies().await.is_empty());
    assert_eq!(scheduler.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_arm_after_shutdown_is_ignored() {
    let target = Arc::new(RecordingTarget::default());
    let scheduler = RedeliveryScheduler::spawn(target.clone());

    scheduler.shutdown().await;
    scheduler.arm(&message(0, "late"), Duration::from_secs(1));

    assert_eq!(scheduler.in_flight(), 0);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(target.bodies().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_oversized_timeout_is_capped() {
    let target = Arc::new(RecordingTarget::default());
    let scheduler = RedeliveryScheduler::spawn(target.clone());

    scheduler.arm(&message(0, "m"), Duration::MAX);
    assert_eq!(scheduler.in_flight(), 1);

    tokio::time::sleep(Duration::from_secs(MAX_VISIBILITY_TIMEOUT_SECS - 1)).await;
    assert!(target.bodies().await.is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(target.bodies().await, vec!["m".to_string()]);
}
