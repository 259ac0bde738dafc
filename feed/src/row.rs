//! Wire rows exchanged with the task feed.
//!
//! Everything here is the flat, serializable shape of the protocol: task
//! requests carry the full model (topology plus weights) and the dataset, so
//! executing a task never needs a second fetch.

use serde::{Deserialize, Serialize};

/// What a task asks the device to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Train,
    Evaluate,
    Predict,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Train => "train",
            TaskKind::Evaluate => "evaluate",
            TaskKind::Predict => "predict",
        }
    }
}

/// One flat parameter tensor: shape plus row-major data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightShard {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl WeightShard {
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The payload of a task request row.
///
/// `outputs`, `epochs` and `accumulation_group_size` are optional on the wire;
/// which of them must be present depends on the task kind and is validated at
/// the dispatch boundary, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskData {
    /// Layer-graph description, parsed by the engine's codec.
    pub model_topology: serde_json::Value,
    pub weight_shards: Vec<WeightShard>,

    pub inputs: Vec<f32>,
    pub input_shape: [usize; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_shape: Option<[usize; 2]>,

    pub batch_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epochs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accumulation_group_size: Option<usize>,
}

/// A task request row as delivered by the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: String,
    pub request_kind: TaskKind,
    pub request_data: TaskData,
}

/// Failure classification surfaced to the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Computation,
    Transport,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Computation => "computation",
            ErrorKind::Transport => "transport",
        }
    }
}

/// The result row written back keyed by the originating task id.
///
/// Exactly one of these is produced per task. `ok == false` rows carry the
/// error fields instead of a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultRow {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<WeightShard>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_shape: Option<[usize; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskResultRow {
    /// Result of a completed training task: updated weights plus the last
    /// epoch's average loss.
    pub fn trained(id: String, weights: Vec<WeightShard>, loss: f32) -> Self {
        Self {
            id,
            ok: true,
            weights: Some(weights),
            outputs: None,
            output_shape: None,
            loss: Some(loss),
            error_kind: None,
            message: None,
        }
    }

    /// Result of an evaluation task: the average loss only.
    pub fn evaluated(id: String, loss: f32) -> Self {
        Self {
            id,
            ok: true,
            weights: None,
            outputs: None,
            output_shape: None,
            loss: Some(loss),
            error_kind: None,
            message: None,
        }
    }

    /// Result of a prediction task: concatenated outputs in sample order.
    pub fn predicted(id: String, outputs: Vec<f32>, output_shape: [usize; 2]) -> Self {
        Self {
            id,
            ok: true,
            weights: None,
            outputs: Some(outputs),
            output_shape: Some(output_shape),
            loss: None,
            error_kind: None,
            message: None,
        }
    }

    /// Structured failure outcome for a task that could not complete.
    pub fn failed(id: String, error_kind: ErrorKind, message: String) -> Self {
        Self {
            id,
            ok: false,
            weights: None,
            outputs: None,
            output_shape: None,
            loss: None,
            error_kind: Some(error_kind),
            message: Some(message),
        }
    }
}

/// The two-valued availability flag stored on the device record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Active,
    Inactive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_row_round_trips_through_json() {
        let row = TaskRow {
            id: "t-1".into(),
            request_kind: TaskKind::Train,
            request_data: TaskData {
                model_topology: serde_json::json!({"layers": []}),
                weight_shards: vec![WeightShard {
                    shape: vec![2, 1],
                    data: vec![0.5, -0.5],
                }],
                inputs: vec![1.0, 2.0],
                input_shape: [1, 2],
                outputs: Some(vec![3.0]),
                output_shape: Some([1, 1]),
                batch_size: 1,
                epochs: Some(2),
                accumulation_group_size: Some(1),
            },
        };

        let json = serde_json::to_string(&row).unwrap();
        let back: TaskRow = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, "t-1");
        assert_eq!(back.request_kind, TaskKind::Train);
        assert_eq!(back.request_data.weight_shards[0].data, vec![0.5, -0.5]);
    }

    #[test]
    fn failure_row_skips_payload_fields() {
        let row = TaskResultRow::failed(
            "t-2".into(),
            ErrorKind::Configuration,
            "bad batch size".into(),
        );

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error_kind"], "configuration");
        assert!(json.get("weights").is_none());
        assert!(json.get("loss").is_none());
    }
}
