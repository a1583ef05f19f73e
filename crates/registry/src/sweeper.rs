//! Background removal of expired offers.

use crate::registry::PeerRegistry;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Periodic sweeper task. Stopping it (or dropping the handle) signals the
/// loop, which exits at its next check.
pub struct LivenessSweeper {
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LivenessSweeper {
    /// Spawn the loop on the current runtime using the registry's sweep interval.
    pub fn spawn(registry: PeerRegistry) -> Self {
        let period = registry
            .config()
            .sweep_interval
            .max(Duration::from_millis(10));
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Liveness sweeper started (period {:?})", period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }
                if *shutdown_rx.borrow() {
                    break;
                }

                match catch_unwind(AssertUnwindSafe(|| registry.sweep())) {
                    Ok(Ok(removed)) => debug!("Sweep tick removed {} offer(s)", removed),
                    Ok(Err(err)) => error!("Sweep tick failed: {}", err),
                    Err(_) => error!("Sweep tick panicked"),
                }
            }

            info!("Liveness sweeper stopped");
        });

        Self {
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Signal the loop and wait for it to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                error!("Liveness sweeper task failed: {}", err);
            }
        }
    }
}

impl Drop for LivenessSweeper {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
