//! Periodic liveness refresh towards the tracker.

use crate::announcer::Announcer;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Heartbeat loop. A `warning` answer from the tracker triggers an immediate
/// re-announce; failures are logged and the loop carries on.
pub struct HeartbeatSender {
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatSender {
    pub fn spawn(announcer: Arc<Announcer>, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(10));
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately and the session has just announced.
            ticker.tick().await;

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

                let observed = announcer.observed_endpoint();
                match announcer.tracker().heartbeat(Some(&observed)).await {
                    Ok(response) if response.is_warning() => {
                        warn!(
                            "Tracker asked for re-announce: {}",
                            response.message.as_deref().unwrap_or("no reason given")
                        );
                        if let Err(err) = announcer.announce().await {
                            error!("Re-announce after heartbeat warning failed: {:#}", err);
                        }
                    }
                    Ok(_) => debug!("Heartbeat acknowledged"),
                    Err(err) => warn!("Heartbeat failed: {}", err),
                }
            }
            info!("Heartbeat loop stopped");
        });

        Self {
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!("Heartbeat task failed: {}", err);
            }
        }
    }
}

impl Drop for HeartbeatSender {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
