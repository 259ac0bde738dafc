//! In-process task feed used by integration tests and the demo binary.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use log::warn;
use tokio::sync::mpsc;

use crate::client::{Subscription, TaskFeed};
use crate::row::{Availability, TaskResultRow, TaskRow};
use crate::{FeedErr, Result};

const TASK_CHANNEL_DEPTH: usize = 8;

#[derive(Default)]
struct Rows {
    subscribers: HashMap<String, mpsc::Sender<TaskRow>>,
    results: HashMap<String, TaskResultRow>,
    availability: HashMap<String, Availability>,
    pulses: HashMap<String, Vec<u64>>,
}

/// A feed backed by plain in-memory rows.
///
/// Semantically a tiny stand-in for the external row store: subscriptions are
/// per-device channels, results land keyed by task id, availability and pulse
/// are columns on the device record.
#[derive(Default)]
pub struct MemoryFeed {
    rows: Mutex<Rows>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a task row to the device's open subscription.
    pub async fn push_task(&self, device_id: &str, row: TaskRow) -> Result<()> {
        let tx = {
            let rows = self.rows.lock().unwrap();
            rows.subscribers
                .get(device_id)
                .cloned()
                .ok_or(FeedErr::UnknownDevice {
                    device_id: device_id.to_string(),
                })?
        };

        tx.send(row).await.map_err(|_| FeedErr::Closed)
    }

    /// The result row written for `task_id`, if any.
    pub fn result_of(&self, task_id: &str) -> Option<TaskResultRow> {
        self.rows.lock().unwrap().results.get(task_id).cloned()
    }

    pub fn availability_of(&self, device_id: &str) -> Option<Availability> {
        self.rows.lock().unwrap().availability.get(device_id).copied()
    }

    pub fn last_pulse(&self, device_id: &str) -> Option<u64> {
        self.rows
            .lock()
            .unwrap()
            .pulses
            .get(device_id)
            .and_then(|p| p.last().copied())
    }

    pub fn pulse_count(&self, device_id: &str) -> usize {
        self.rows
            .lock()
            .unwrap()
            .pulses
            .get(device_id)
            .map_or(0, Vec::len)
    }

    /// Seeds a persisted availability flag, as if left by a prior session.
    pub fn seed_availability(&self, device_id: &str, availability: Availability) {
        self.rows
            .lock()
            .unwrap()
            .availability
            .insert(device_id.to_string(), availability);
    }

    /// Drops the device's subscription channel, as if the feed side closed
    /// the session.
    pub fn disconnect(&self, device_id: &str) {
        self.rows.lock().unwrap().subscribers.remove(device_id);
    }

    pub fn has_subscriber(&self, device_id: &str) -> bool {
        self.rows
            .lock()
            .unwrap()
            .subscribers
            .get(device_id)
            .is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl TaskFeed for MemoryFeed {
    async fn subscribe(&self, device_id: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(TASK_CHANNEL_DEPTH);

        let mut rows = self.rows.lock().unwrap();
        if let Some(prev) = rows.subscribers.insert(device_id.to_string(), tx) {
            if !prev.is_closed() {
                warn!(device_id; "replacing a still-open subscription");
            }
        }

        Ok(Subscription::new(rx, None))
    }

    async fn write_result(&self, row: &TaskResultRow) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .results
            .insert(row.id.clone(), row.clone());
        Ok(())
    }

    async fn set_availability(&self, device_id: &str, availability: Availability) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .availability
            .insert(device_id.to_string(), availability);
        Ok(())
    }

    async fn load_availability(&self, device_id: &str) -> Result<Availability> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .availability
            .get(device_id)
            .copied()
            .unwrap_or(Availability::Inactive))
    }

    async fn pulse(&self, device_id: &str, timestamp_ms: u64) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .pulses
            .entry(device_id.to_string())
            .or_default()
            .push(timestamp_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{TaskData, TaskKind};

    fn tiny_task(id: &str) -> TaskRow {
        TaskRow {
            id: id.to_string(),
            request_kind: TaskKind::Predict,
            request_data: TaskData {
                model_topology: serde_json::json!({"layers": []}),
                weight_shards: vec![],
                inputs: vec![1.0],
                input_shape: [1, 1],
                outputs: None,
                output_shape: None,
                batch_size: 1,
                epochs: None,
                accumulation_group_size: None,
            },
        }
    }

    #[tokio::test]
    async fn push_task_reaches_the_subscriber() {
        let feed = MemoryFeed::new();
        let mut sub = feed.subscribe("dev-1").await.unwrap();

        feed.push_task("dev-1", tiny_task("t-1")).await.unwrap();

        let row = sub.next_task().await.unwrap();
        assert_eq!(row.id, "t-1");
    }

    #[tokio::test]
    async fn push_task_without_subscriber_is_an_error() {
        let feed = MemoryFeed::new();
        let err = feed.push_task("nobody", tiny_task("t-1")).await.unwrap_err();
        assert!(matches!(err, FeedErr::UnknownDevice { .. }));
    }

    #[tokio::test]
    async fn availability_defaults_to_inactive() {
        let feed = MemoryFeed::new();
        let got = feed.load_availability("dev-1").await.unwrap();
        assert_eq!(got, Availability::Inactive);

        feed.set_availability("dev-1", Availability::Active)
            .await
            .unwrap();
        let got = feed.load_availability("dev-1").await.unwrap();
        assert_eq!(got, Availability::Active);
    }
}
