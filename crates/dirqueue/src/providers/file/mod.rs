//! File-backed queue shared by every process that opens the same directory.
//!
//! Each queue lives in its own directory under the configured root:
//!
//! ```text
//! <root>/<queue>/messages          available messages, one record per line
//! <root>/<queue>/.lock/            exists while a process mutates the queue
//! <root>/<queue>/.conf/timeout     visibility timeout in whole seconds
//! <root>/<queue>/.conf/process     last process-instance id handed out
//! ```
//!
//! Every read-modify-write of `messages` or `.conf/*` happens while holding
//! the lock. In-flight messages are tracked only in the memory of the process
//! that pulled them; if that process dies they are lost.

mod instance;
mod lock;
mod record;
mod settings;
mod store;
mod watcher;

use crate::config::{
    visibility_timeout_from_secs, visibility_timeout_secs, FileQueueConfig, ProviderType,
};
use crate::error::QueueError;
use crate::message::{validate_body, Message, MessageHandle, QueueName};
use crate::queue::MessageQueue;
use crate::redelivery::{RedeliveryScheduler, RedeliveryTarget};
use async_trait::async_trait;
use chrono::Duration;
use lock::DirLock;
use settings::SharedSettings;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use store::RecordStore;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use watcher::SettingsWatcher;

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;

const MESSAGES_FILE: &str = "messages";
const LOCK_DIR: &str = ".lock";
const CONF_DIR: &str = ".conf";
const TIMEOUT_FILE: &str = "timeout";
const PROCESS_FILE: &str = "process";

/// State shared between the queue and its redelivery task
struct FileQueueCore {
    name: QueueName,
    separator: char,
    store: RecordStore,
    lock: DirLock,
    settings: Arc<SharedSettings>,
    instance_id: u64,
    next_sequence: AtomicU64,
    closed: AtomicBool,
}

impl FileQueueCore {
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

        let _guard = self.lock.acquire().await?;
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let handle = MessageHandle::from_parts(self.instance_id, sequence);
        self.store
            .append(&record::encode(&handle, body, self.separator))
            .await?;

        Ok(handle)
    }

    /// Remove and decode the last well-formed record
    ///
    /// `on_taken` runs before the store is rewritten. If the rewrite is
    /// abandoned the message stays in the store as well, so it can be
    /// delivered twice but is never lost.
    async fn take_last(
        &self,
        on_taken: impl FnOnce(&Message),
    ) -> Result<Option<Message>, QueueError> {
        let _guard = self.lock.acquire().await?;
        let mut records = self.store.read_all().await?;
        let before = records.len();

        let mut taken = None;
        while let Some(line) = records.pop() {
            match record::decode(&line, self.separator) {
                Ok(message) => {
                    taken = Some(message);
                    break;
                }
                Err(e) => warn!(
                    queue = %self.name,
                    error = %e,
                    "Discarding malformed record"
                ),
            }
        }

        if let Some(message) = &taken {
            on_taken(message);
        }
        if records.len() != before {
            self.store.rewrite(&records).await?;
        }

        Ok(taken)
    }
}

#[async_trait]
impl RedeliveryTarget for FileQueueCore {
    async fn redeliver(&self, body: &str) -> Result<MessageHandle, QueueError> {
        self.push(body).await
    }
}

/// Queue stored in a directory on a (possibly shared) filesystem
///
/// Pull order is unspecified. The current implementation takes the most
/// recently appended record, so under load older messages can wait.
pub struct FileQueue {
    name: QueueName,
    directory: PathBuf,
    core: Arc<FileQueueCore>,
    scheduler: RedeliveryScheduler,
    watcher: Mutex<Option<SettingsWatcher>>,
}

impl FileQueue {
    /// Open (creating if needed) the queue `name` under `config.root_dir`
    ///
    /// Claims a new process-instance id and adopts the visibility timeout
    /// already stored for the queue, writing the configured default if there
    /// is none. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails with `ConfigurationError` when the configuration is invalid or a
    /// `.conf` file is malformed, `LockTimeout` when the lock cannot be taken
    /// and `Storage` when the directory cannot be created.
    #[instrument(skip(config), fields(root = %config.root_dir.display()))]
    pub async fn open(name: QueueName, config: &FileQueueConfig) -> Result<Self, QueueError> {
        config.validate()?;

        let directory = config.root_dir.join(name.as_str());
        let conf_dir = directory.join(CONF_DIR);
        tokio::fs::create_dir_all(&conf_dir)
            .await
            .map_err(|e| QueueError::storage(&conf_dir, e))?;

        let lock = DirLock::new(
            directory.join(LOCK_DIR),
            config.lock_retry_interval(),
            config.lock_timeout(),
        );

        let settings = Arc::new(
            SharedSettings::initialize(
                conf_dir.join(TIMEOUT_FILE),
                config.default_visibility_timeout_secs,
                &lock,
            )
            .await?,
        );
        let instance_id = instance::claim_instance_id(&conf_dir.join(PROCESS_FILE), &lock).await?;

        let core = Arc::new(FileQueueCore {
            name: name.clone(),
            separator: config.separator,
            store: RecordStore::new(directory.join(MESSAGES_FILE)),
            lock,
            settings: Arc::clone(&settings),
            instance_id,
            next_sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let scheduler = RedeliveryScheduler::spawn(core.clone());
        let watcher = SettingsWatcher::spawn(
            settings,
            &conf_dir,
            config.watch_mode,
            config.poll_interval(),
        );

        info!(
            queue = %name,
            instance_id,
            visibility_timeout_secs = core.settings.visibility_timeout_secs(),
            event_driven = watcher.is_event_driven(),
            "Opened file queue"
        );

        Ok(Self {
            name,
            directory,
            core,
            scheduler,
            watcher: Mutex::new(Some(watcher)),
        })
    }

    /// Directory holding this queue's files
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Process-instance id embedded in every handle this queue issues
    pub fn instance_id(&self) -> u64 {
        self.core.instance_id
    }

    /// Number of records currently in the backing store
    pub async fn available(&self) -> Result<usize, QueueError> {
        self.core.ensure_open()?;
        let _guard = self.core.lock.acquire().await?;
        Ok(self.core.store.read_all().await?.len())
    }

    /// Number of messages pulled by this process and not yet deleted
    pub async fn in_flight(&self) -> usize {
        self.scheduler.in_flight()
    }
}

#[async_trait]
impl MessageQueue for FileQueue {
    #[instrument(skip(self), fields(queue = %self.name))]
    async fn set_visibility_timeout(&self, timeout: Duration) -> Result<(), QueueError> {
        self.core.ensure_open()?;
        let secs = visibility_timeout_secs(timeout)?;
        self.core.settings.publish(secs, &self.core.lock).await?;
        info!(visibility_timeout_secs = secs, "Visibility timeout updated");
        Ok(())
    }

    async fn push(&self, body: &str) -> Result<MessageHandle, QueueError> {
        let handle = self.core.push(body).await?;
        debug!(queue = %self.name, handle = %handle, "Message pushed");
        Ok(handle)
    }

    async fn pull(&self) -> Result<Option<Message>, QueueError> {
        self.core.ensure_open()?;

        let timeout = std::time::Duration::from_secs(self.core.settings.visibility_timeout_secs());
        let Some(message) = self
            .core
            .take_last(|message| self.scheduler.arm(message, timeout))
            .await?
        else {
            return Ok(None);
        };
        debug!(
            queue = %self.name,
            handle = %message.handle,
            visibility_timeout_secs = timeout.as_secs(),
            "Message pulled"
        );

        Ok(Some(message))
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<(), QueueError> {
        self.core.ensure_open()?;
        if self.scheduler.cancel(handle) {
            debug!(queue = %self.name, handle = %handle, "Message deleted");
        } else {
            debug!(queue = %self.name, handle = %handle, "Delete ignored for unknown handle");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(queue = %self.name))]
    async fn close(&self) -> Result<(), QueueError> {
        if self.core.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(mut watcher) = self.watcher.lock().await.take() {
            watcher.stop();
        }

        let discarded = self.scheduler.shutdown().await;
        if discarded > 0 {
            warn!(discarded, "Pending redeliveries dropped on close");
        }

        let _guard = self.core.lock.acquire().await?;
        self.core.store.remove().await?;
        info!(path = %self.core.store.path().display(), "Queue closed, backing store removed");

        Ok(())
    }

    fn visibility_timeout(&self) -> Duration {
        visibility_timeout_from_secs(self.core.settings.visibility_timeout_secs())
    }

    fn queue_name(&self) -> &QueueName {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::File
    }
}
