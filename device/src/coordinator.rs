//! Device coordination state machine.
//!
//! Owns the one `DeviceState` instance, the single feed subscription and the
//! liveness pulse. Task execution is strictly sequential: the run loop is the
//! mutual-exclusion gate, so at most one task is ever in flight.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use tokio::sync::{Notify, watch};
use tokio::task::{JoinError, JoinHandle};

use engine::probe;
use feed::row::{Availability, ErrorKind, TaskResultRow};
use feed::{PULSE_INTERVAL, Subscription, TaskFeed};

use crate::dispatch;
use crate::state::DeviceState;
use crate::{DeviceErr, Result};

pub struct Coordinator<F: TaskFeed + 'static> {
    feed: Arc<F>,
    device_id: String,
    state: watch::Sender<DeviceState>,
    subscription: Option<Subscription>,
    pulse: Option<JoinHandle<()>>,
    shutdown: Arc<Notify>,
}

impl<F: TaskFeed + 'static> Coordinator<F> {
    pub fn new(feed: Arc<F>, device_id: &str) -> Self {
        let (state, _) = watch::channel(DeviceState::Offline);

        Self {
            feed,
            device_id: device_id.to_string(),
            state,
            subscription: None,
            pulse: None,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle for asking the run loop to stop. A task already handed to the
    /// device still runs to completion, result write included.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Advisory snapshots of the device state, for UI and reporting layers.
    /// Not a control surface; all transitions happen inside this type.
    pub fn watch_state(&self) -> watch::Receiver<DeviceState> {
        self.state.subscribe()
    }

    /// Reads the persisted availability flag and rejoins if the previous
    /// session left the device active. Returns whether a join happened.
    pub async fn resume(&mut self) -> Result<bool> {
        match self.feed.load_availability(&self.device_id).await? {
            Availability::Active => {
                info!(device_id = self.device_id.as_str(); "previous session was active, rejoining");
                self.join().await?;
                Ok(true)
            }
            Availability::Inactive => Ok(false),
        }
    }

    /// Joins the network: probes the runtime, opens exactly one subscription,
    /// marks the device active and starts the liveness pulse.
    ///
    /// Calling `join` while already joined keeps the existing subscription.
    /// A subscribe failure leaves the device offline.
    pub async fn join(&mut self) -> Result<()> {
        if self.subscription.is_some() {
            warn!(device_id = self.device_id.as_str(); "already joined, keeping the existing subscription");
            return Ok(());
        }

        probe::probe_runtime().map_err(DeviceErr::Probe)?;

        let subscription = self.feed.subscribe(&self.device_id).await?;

        if let Err(e) = self
            .feed
            .set_availability(&self.device_id, Availability::Active)
            .await
        {
            subscription.close();
            return Err(e.into());
        }

        self.subscription = Some(subscription);
        self.pulse = Some(self.spawn_pulse());
        self.state.send_replace(DeviceState::Available);

        info!(device_id = self.device_id.as_str(); "joined the network");
        Ok(())
    }

    /// Leaves the network: stops the pulse, closes the subscription and marks
    /// the device inactive. Idempotent: without a prior join this warns and
    /// returns. Never fails.
    pub async fn leave(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            warn!(device_id = self.device_id.as_str(); "not currently listening to the task feed");
            return;
        };

        if let Some(pulse) = self.pulse.take() {
            pulse.abort();
        }
        subscription.close();

        if let Err(e) = self
            .feed
            .set_availability(&self.device_id, Availability::Inactive)
            .await
        {
            error!(device_id = self.device_id.as_str(); "failed to mark device inactive: {e}");
        }

        self.state.send_replace(DeviceState::Offline);
        info!(device_id = self.device_id.as_str(); "left the network");
    }

    /// Consumes the task feed until it closes or the shutdown handle fires,
    /// executing one task at a time.
    ///
    /// Failed tasks surface as failure rows and the device returns to
    /// available; nothing is retried locally. Shutdown never interrupts a
    /// task mid-flight: delivered tasks are drained first.
    pub async fn run(&mut self) {
        let Some(subscription) = self.subscription.as_mut() else {
            warn!(device_id = self.device_id.as_str(); "run called without joining first");
            return;
        };
        let shutdown = Arc::clone(&self.shutdown);

        loop {
            let task = tokio::select! {
                biased;
                task = subscription.next_task() => match task {
                    Some(task) => task,
                    None => break,
                },
                _ = shutdown.notified() => {
                    info!(device_id = self.device_id.as_str(); "shutdown requested, run loop stopping");
                    break;
                }
            };

            if *self.state.borrow() != DeviceState::Available {
                warn!(
                    task_id = task.id.as_str(),
                    state = self.state.borrow().as_str();
                    "device is not available, skipping task"
                );
                continue;
            }

            let task_id = task.id.clone();
            self.state.send_replace(DeviceState::Busy);

            // Dispatch is CPU-bound; keep the subscription and pulse live
            // underneath it by running it on the blocking pool.
            let result = tokio::task::spawn_blocking(move || dispatch::dispatch(&task)).await;

            match result {
                Ok(row) => {
                    if let Err(e) = self.feed.write_result(&row).await {
                        // The computation is done; the result is simply lost.
                        // The feed side treats it as a missing response.
                        error!(task_id = task_id.as_str(); "failed to write task result: {e}");
                    }
                }
                Err(e) => {
                    error!(task_id = task_id.as_str(); "task execution panicked: {e}");
                    let row = panic_outcome(task_id.clone(), &e);
                    if let Err(e) = self.feed.write_result(&row).await {
                        error!(task_id = task_id.as_str(); "failed to write task result: {e}");
                    }
                }
            }

            self.state.send_replace(DeviceState::Available);
        }

        debug!(device_id = self.device_id.as_str(); "run loop finished");
    }

    fn spawn_pulse(&self) -> JoinHandle<()> {
        let feed = Arc::clone(&self.feed);
        let device_id = self.device_id.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PULSE_INTERVAL);

            loop {
                interval.tick().await;
                if let Err(e) = feed.pulse(&device_id, now_ms()).await {
                    warn!(device_id = device_id.as_str(); "pulse write failed: {e}");
                }
            }
        })
    }
}

impl<F: TaskFeed + 'static> Drop for Coordinator<F> {
    /// A coordinator dropped while still joined must not leave the pulse
    /// task writing liveness for a gone device. `leave` already stops it on
    /// the orderly path.
    fn drop(&mut self) {
        if let Some(pulse) = self.pulse.take() {
            pulse.abort();
        }
    }
}

/// A dispatch panic still yields a structured failure row.
fn panic_outcome(task_id: String, e: &JoinError) -> TaskResultRow {
    TaskResultRow::failed(
        task_id,
        ErrorKind::Computation,
        format!("task execution panicked: {e}"),
    )
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
