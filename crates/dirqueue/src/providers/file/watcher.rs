//! Background propagation of the shared visibility timeout.
//!
//! In [`WatchMode::Auto`] the queue's `.conf` directory is watched for change
//! notifications and the timeout is reloaded whenever its file is touched. A
//! poll at `poll_interval` runs alongside, since notifications are not
//! delivered on every filesystem. [`WatchMode::Poll`], or a platform where no
//! watcher can be created, uses the poll alone.

use super::settings::SharedSettings;
use crate::config::WatchMode;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;

type EventReceiver = mpsc::UnboundedReceiver<notify::Result<Event>>;

/// Keeps [`SharedSettings`] in step with the timeout file
pub(crate) struct SettingsWatcher {
    task: Option<JoinHandle<()>>,
    // Dropping the watcher closes the event channel
    fs_watcher: Option<RecommendedWatcher>,
}

impl SettingsWatcher {
    pub(crate) fn spawn(
        settings: Arc<SharedSettings>,
        conf_dir: &Path,
        mode: WatchMode,
        poll_interval: Duration,
    ) -> Self {
        let (events, fs_watcher) = match mode {
            WatchMode::Auto => match watch_directory(conf_dir) {
                Ok((events, watcher)) => (Some(events), Some(watcher)),
                Err(e) => {
                    warn!(
                        path = %conf_dir.display(),
                        error = %e,
                        "Change notifications unavailable, polling for timeout changes"
                    );
                    (None, None)
                }
            },
            WatchMode::Poll => (None, None),
        };

        let task = tokio::spawn(run(settings, events, poll_interval));

        Self {
            task: Some(task),
            fs_watcher,
        }
    }

    /// Whether change notifications are in use
    pub(crate) fn is_event_driven(&self) -> bool {
        self.fs_watcher.is_some()
    }

    pub(crate) fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.fs_watcher = None;
    }
}

impl Drop for SettingsWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch_directory(dir: &Path) -> notify::Result<(EventReceiver, RecommendedWatcher)> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
        // Fails only once the reload task is gone
        let _ = sender.send(event);
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok((receiver, watcher))
}

async fn run(settings: Arc<SharedSettings>, mut events: Option<EventReceiver>, poll_interval: Duration) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                settings.reload().await;
            }
            event = next_event(&mut events) => match event {
                Some(Ok(event)) => {
                    if touches(&event, settings.timeout_path()) {
                        settings.reload().await;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Change notification error");
                }
                None => {
                    debug!("Change notifications stopped, continuing with polling");
                    events = None;
                }
            },
        }
    }
}

async fn next_event(events: &mut Option<EventReceiver>) -> Option<notify::Result<Event>> {
    match events {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

fn touches(event: &Event, file: &Path) -> bool {
    let name = file.file_name();
    event
        .paths
        .iter()
        .any(|path| path.file_name().is_some() && path.file_name() == name)
}
