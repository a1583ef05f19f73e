//! Shared-folder watcher that re-announces once per burst of changes.

use crate::error::WatchError;
use async_trait::async_trait;
use notify::event::{CreateKind, RemoveKind};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);

/// Action run when the shared folder changed.
#[async_trait]
pub trait ReannounceHook: Send + Sync {
    async fn reannounce(&self) -> anyhow::Result<()>;
}

/// Leading-edge debouncer: the first event fires, later events are dropped
/// until more than `window` has passed since the last firing.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_trigger: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_trigger: None,
        }
    }

    /// Record an event seen at `at`; returns whether it should fire.
    pub fn should_fire(&mut self, at: Instant) -> bool {
        let fire = match self.last_trigger {
            None => true,
            Some(last) => at.saturating_duration_since(last) > self.window,
        };
        if fire {
            self.last_trigger = Some(at);
        }
        fire
    }
}

/// Whether a notification describes a change to a file.
pub fn is_relevant(event: &Event) -> bool {
    match event.kind {
        EventKind::Access(_) => false,
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => false,
        _ => event.paths.is_empty() || event.paths.iter().any(|p| !p.is_dir()),
    }
}

/// Running watcher. Dropping it stops OS notifications and signals the loop.
pub struct ChangeWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeWatcher {
    pub fn start(
        root: &Path,
        window: Duration,
        hook: Arc<dyn ReannounceHook>,
    ) -> Result<Self, WatchError> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<(Instant, Event)>();

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                // Stamp on arrival so queueing delay never widens the window.
                Ok(event) => {
                    let _ = event_tx.send((Instant::now(), event));
                }
                Err(err) => warn!("Watch error: {}", err),
            },
            Config::default(),
        )
        .map_err(|source| WatchError::Notify {
            path: root.to_path_buf(),
            source,
        })?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Notify {
                path: root.to_path_buf(),
                source,
            })?;

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut debouncer = Debouncer::new(window);
            loop {
                let (at, event) = tokio::select! {
                    received = event_rx.recv() => match received {
                        Some(received) => received,
                        None => break,
                    },
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                };

                if !is_relevant(&event) || !debouncer.should_fire(at) {
                    continue;
                }

                debug!("Shared folder changed ({:?}), re-announcing", event.kind);
                if let Err(err) = hook.reannounce().await {
                    error!("Re-announce after folder change failed: {:#}", err);
                }
            }
            debug!("Watcher loop exited");
        });

        info!("Watching {}", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            _watcher: watcher,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Signal the loop and wait for it to exit.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!("Watcher task failed: {}", err);
            }
        }
        info!("Stopped watching {}", self.root.display());
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
