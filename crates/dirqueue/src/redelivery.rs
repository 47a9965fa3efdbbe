//! Delayed redelivery of unacknowledged messages.
//!
//! Each queue owns one [`RedeliveryScheduler`]. A single background task keeps
//! a min-heap of deadlines; the in-flight messages themselves live in a map
//! keyed by handle. Whoever removes a handle from the map first owns it: a
//! `cancel` that wins means the message was acknowledged, an expiry that wins
//! means it is pushed again. Heap entries whose map entry is gone are skipped.

use crate::config::MAX_VISIBILITY_TIMEOUT_SECS;
use crate::error::QueueError;
use crate::message::{Message, MessageHandle};
use async_trait::async_trait;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

#[cfg(test)]
#[path = "redelivery_tests.rs"]
mod tests;

/// Delay before retrying a redelivery whose push failed
const REDELIVERY_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

/// Backend hook used to make an expired message available again
#[async_trait]
pub(crate) trait RedeliveryTarget: Send + Sync + 'static {
    /// Push `body` back onto the queue, returning its new handle
    async fn redeliver(&self, body: &str) -> Result<MessageHandle, QueueError>;
}

struct PendingRedelivery {
    body: String,
    deadline: Instant,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Deadline {
    at: Instant,
    handle: MessageHandle,
}

enum Command {
    Arm(Deadline),
    Shutdown,
}

type PendingMap = Arc<Mutex<HashMap<MessageHandle, PendingRedelivery>>>;

/// The map is never held across an await, so a poisoned lock still holds
/// consistent data.
fn lock_pending(
    pending: &PendingMap,
) -> MutexGuard<'_, HashMap<MessageHandle, PendingRedelivery>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks in-flight messages and re-pushes those not deleted in time
pub(crate) struct RedeliveryScheduler {
    pending: PendingMap,
    commands: mpsc::UnboundedSender<Command>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RedeliveryScheduler {
    /// Start the scheduling task on the current tokio runtime
    pub(crate) fn spawn(target: Arc<dyn RedeliveryTarget>) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (commands, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run(receiver, Arc::clone(&pending), target));

        Self {
            pending,
            commands,
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    /// Start tracking a pulled message; it is redelivered after `timeout`
    ///
    /// Does not yield, so a pulled message is tracked before the caller can
    /// be cancelled. Timeouts above [`MAX_VISIBILITY_TIMEOUT_SECS`] are capped.
    pub(crate) fn arm(&self, message: &Message, timeout: std::time::Duration) {
        let timeout = timeout.min(std::time::Duration::from_secs(MAX_VISIBILITY_TIMEOUT_SECS));
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now);
        lock_pending(&self.pending).insert(
            message.handle.clone(),
            PendingRedelivery {
                body: message.body.clone(),
                deadline,
            },
        );

        let arm = Command::Arm(Deadline {
            at: deadline,
            handle: message.handle.clone(),
        });
        if self.commands.send(arm).is_err() {
            // Scheduler already shut down; the queue is closing
            lock_pending(&self.pending).remove(&message.handle);
            debug!(handle = %message.handle, "Redelivery not armed, scheduler stopped");
        }
    }

    /// Stop tracking `handle`; returns whether a pending redelivery was cancelled
    pub(crate) fn cancel(&self, handle: &MessageHandle) -> bool {
        lock_pending(&self.pending).remove(handle).is_some()
    }

    /// Number of messages currently awaiting acknowledgement
    pub(crate) fn in_flight(&self) -> usize {
        lock_pending(&self.pending).len()
    }

    /// Stop the scheduling task and drop every pending redelivery
    ///
    /// Returns the number of redeliveries that were discarded.
    pub(crate) async fn shutdown(&self) -> usize {
        let _ = self.commands.send(Command::Shutdown);

        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Redelivery task ended abnormally");
                }
            }
        }

        let mut pending = lock_pending(&self.pending);
        let discarded = pending.len();
        pending.clear();
        discarded
    }
}

impl Drop for RedeliveryScheduler {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.abort();
        }
    }
}

async fn run(
    mut commands: mpsc::UnboundedReceiver<Command>,
    pending: PendingMap,
    target: Arc<dyn RedeliveryTarget>,
) {
    let mut deadlines: BinaryHeap<Reverse<Deadline>> = BinaryHeap::new();

    loop {
        let next = deadlines.peek().map(|Reverse(deadline)| deadline.at);

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Arm(deadline)) => deadlines.push(Reverse(deadline)),
                Some(Command::Shutdown) | None => break,
            },
            _ = sleep_until(next) => {
                let now = Instant::now();
                while deadlines.peek().is_some_and(|Reverse(deadline)| deadline.at <= now) {
                    if let Some(Reverse(due)) = deadlines.pop() {
                        if let Some(retry) = expire(due, &pending, target.as_ref()).await {
                            deadlines.push(Reverse(retry));
                        }
                    }
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Redeliver `due` if it is still pending; returns a retry deadline on failure
async fn expire(
    due: Deadline,
    pending: &PendingMap,
    target: &dyn RedeliveryTarget,
) -> Option<Deadline> {
    let expired = {
        let mut pending = lock_pending(pending);
        match pending.get(&due.handle) {
            Some(entry) if entry.deadline == due.at => pending.remove(&due.handle),
            _ => None,
        }
    };

    // Acknowledged, or superseded by a later deadline
    let expired = expired?;

    match target.redeliver(&expired.body).await {
        Ok(new_handle) => {
            debug!(
                old_handle = %due.handle,
                new_handle = %new_handle,
                "Visibility timeout expired, message redelivered"
            );
            None
        }
        Err(QueueError::QueueClosed { queue_name }) => {
            debug!(queue = %queue_name, handle = %due.handle, "Dropping redelivery for closed queue");
            None
        }
        Err(e) => {
            warn!(
                handle = %due.handle,
                error = %e,
                "Redelivery failed, retrying in {:?}",
                REDELIVERY_RETRY_DELAY
            );
            let at = Instant::now() + REDELIVERY_RETRY_DELAY;
            lock_pending(pending).insert(
                due.handle.clone(),
                PendingRedelivery {
                    body: expired.body,
                    deadline: at,
                },
            );
            Some(Deadline {
                at,
                handle: due.handle,
            })
        }
    }
}
