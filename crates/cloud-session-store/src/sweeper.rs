//! Recurring expiry sweep.

use std::time::Duration;

use tokio::{sync::oneshot, task::JoinHandle, time::MissedTickBehavior};

use crate::SessionStore;

/// Handle to a running sweep task.
///
/// The task stops on [`Sweeper::stop`] or when the handle is dropped.
pub struct Sweeper {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Sweep `store` every `interval`, removing records idle longer than
    /// `expiry_secs`. The first sweep runs one interval after start.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(store: SessionStore, interval: Duration, expiry_secs: u64) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let removed = store.sweep_now(expiry_secs);
                        if !removed.is_empty() {
                            tracing::info!(count = removed.len(), "Swept expired sessions");
                        }
                    }
                }
            }
            tracing::debug!("Session sweeper stopped");
        });

        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Stop the task and wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}
