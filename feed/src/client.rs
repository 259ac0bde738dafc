use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::Result;
use crate::row::{Availability, TaskResultRow, TaskRow};

/// A live handle to the realtime task feed.
///
/// The feed side pushes matching task rows into the channel; dropping or
/// closing the subscription stops delivery. The owning coordinator is
/// responsible for holding at most one of these at a time.
pub struct Subscription {
    rx: mpsc::Receiver<TaskRow>,
    closer: Option<oneshot::Sender<()>>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<TaskRow>, closer: Option<oneshot::Sender<()>>) -> Self {
        Self { rx, closer }
    }

    /// Waits for the next task row. Returns `None` once the feed side is gone.
    pub async fn next_task(&mut self) -> Option<TaskRow> {
        self.rx.recv().await
    }

    /// Stops delivery and notifies the feed side, if it asked to be notified.
    pub fn close(mut self) {
        if let Some(closer) = self.closer.take() {
            let _ = closer.send(());
        }
        self.rx.close();
    }
}

/// The external realtime change-notification stream plus the device record
/// it is keyed on.
///
/// Implementations are transport: they move rows, they never interpret them.
#[async_trait]
pub trait TaskFeed: Send + Sync {
    /// Opens a stream of task rows addressed to `device_id`.
    async fn subscribe(&self, device_id: &str) -> Result<Subscription>;

    /// Writes a result row keyed by the originating task id.
    async fn write_result(&self, row: &TaskResultRow) -> Result<()>;

    /// Writes the two-valued availability flag on the device record.
    async fn set_availability(&self, device_id: &str, availability: Availability) -> Result<()>;

    /// Reads the availability flag persisted for `device_id`, used on startup
    /// to resume the prior session's intent.
    async fn load_availability(&self, device_id: &str) -> Result<Availability>;

    /// Periodic liveness timestamp write on the device record.
    async fn pulse(&self, device_id: &str, timestamp_ms: u64) -> Result<()>;
}
