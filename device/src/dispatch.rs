//! Maps an inbound task row to the right engine entry point and packages the
//! outcome back into a result row.
//!
//! This is the failure boundary: every engine error is caught here, logged
//! with the task id and kind, and converted into a structured failure row.
//! Nothing propagates to the coordinator.

use log::{error, info, warn};
use ndarray::ArrayView2;

use engine::loss::Loss;
use engine::topology::Topology;
use engine::train::TrainOptions;
use engine::{EngineErr, batch, codec, train};
use feed::row::{TaskKind, TaskResultRow, TaskRow};

/// Executes one task to completion and returns the row to write back.
///
/// CPU-bound; the coordinator runs it on the blocking pool.
pub fn dispatch(row: &TaskRow) -> TaskResultRow {
    info!(
        task_id = row.id.as_str(),
        kind = row.request_kind.as_str();
        "executing task"
    );

    match run(row) {
        Ok(result) => result,
        Err(e) => {
            error!(
                task_id = row.id.as_str(),
                kind = row.request_kind.as_str();
                "task failed: {e}"
            );
            TaskResultRow::failed(row.id.clone(), e.kind(), e.to_string())
        }
    }
}

fn run(row: &TaskRow) -> engine::Result<TaskResultRow> {
    let data = &row.request_data;

    let topology = Topology::parse(&data.model_topology)?;
    let mut model = codec::compile(&topology, &data.weight_shards)?;

    let x = tensor_view("inputs", &data.inputs, data.input_shape)?;
    if x.nrows() == 0 {
        return Err(EngineErr::EmptyDataset);
    }
    if x.ncols() != model.input_dim() {
        return Err(EngineErr::InputDimMismatch {
            got: x.ncols(),
            expected: model.input_dim(),
        });
    }

    match row.request_kind {
        TaskKind::Train => {
            let y = required_outputs(data, &model)?;
            sample_counts_match(x, y)?;

            let opts = TrainOptions {
                batch_size: data.batch_size,
                accumulation_group_size: data
                    .accumulation_group_size
                    .ok_or(EngineErr::MissingField {
                        field: "accumulation_group_size",
                    })?,
                epochs: data.epochs.ok_or(EngineErr::MissingField { field: "epochs" })?,
            };

            let loss = train::train(&mut model, x, y, &opts)?;
            Ok(TaskResultRow::trained(
                row.id.clone(),
                model.export_weights(),
                loss,
            ))
        }

        TaskKind::Evaluate => {
            let y = required_outputs(data, &model)?;
            sample_counts_match(x, y)?;

            let loss = batch::evaluate(&mut model, x, y, data.batch_size)?;
            Ok(TaskResultRow::evaluated(row.id.clone(), loss))
        }

        TaskKind::Predict => {
            if data.outputs.is_some() {
                warn!(task_id = row.id.as_str(); "predict task carries outputs, ignoring them");
            }

            let out = batch::predict(&mut model, x, data.batch_size)?;
            let shape = [out.nrows(), out.ncols()];
            let flat: Vec<f32> = out.iter().copied().collect();
            Ok(TaskResultRow::predicted(row.id.clone(), flat, shape))
        }
    }
}

fn tensor_view<'a>(
    what: &'static str,
    data: &'a [f32],
    shape: [usize; 2],
) -> engine::Result<ArrayView2<'a, f32>> {
    let [rows, cols] = shape;
    if data.len() != rows * cols {
        return Err(EngineErr::TensorShapeMismatch {
            what,
            rows,
            cols,
            len: data.len(),
        });
    }

    // Length was checked just above.
    Ok(ArrayView2::from_shape((rows, cols), data).unwrap())
}

fn required_outputs<'a>(
    data: &'a feed::row::TaskData,
    model: &engine::CompiledModel,
) -> engine::Result<ArrayView2<'a, f32>> {
    let outputs = data
        .outputs
        .as_deref()
        .ok_or(EngineErr::MissingField { field: "outputs" })?;
    let shape = data.output_shape.ok_or(EngineErr::MissingField {
        field: "output_shape",
    })?;

    let y = tensor_view("outputs", outputs, shape)?;

    // Sparse targets are one column of class indices, whatever the model's
    // output width.
    if model.loss_fn() == Loss::SparseCategoricalCrossentropy {
        if y.ncols() != 1 {
            return Err(EngineErr::OutputDimMismatch {
                got: y.ncols(),
                expected: 1,
            });
        }

        let classes = model.output_dim();
        for (sample, &t) in y.column(0).iter().enumerate() {
            if t < 0.0 || t as usize >= classes {
                return Err(EngineErr::ClassIndexOutOfRange { sample, classes });
            }
        }
        return Ok(y);
    }

    if y.ncols() != model.output_dim() {
        return Err(EngineErr::OutputDimMismatch {
            got: y.ncols(),
            expected: model.output_dim(),
        });
    }

    Ok(y)
}

fn sample_counts_match(x: ArrayView2<f32>, y: ArrayView2<f32>) -> engine::Result<()> {
    if x.nrows() != y.nrows() {
        return Err(EngineErr::SampleCountMismatch {
            inputs: x.nrows(),
            outputs: y.nrows(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed::row::{ErrorKind, TaskData, WeightShard};

    fn identity_topology() -> serde_json::Value {
        serde_json::json!({
            "layers": [{"units": 1, "input_dim": 1}],
            "training_config": {
                "loss": "mean_squared_error",
                "optimizer_config": {
                    "class_name": "sgd",
                    "config": {"learning_rate": 0.1}
                }
            }
        })
    }

    fn identity_shards() -> Vec<WeightShard> {
        vec![
            WeightShard {
                shape: vec![1, 1],
                data: vec![1.0],
            },
            WeightShard {
                shape: vec![1],
                data: vec![0.0],
            },
        ]
    }

    fn task(kind: TaskKind, data: TaskData) -> TaskRow {
        TaskRow {
            id: "t-1".into(),
            request_kind: kind,
            request_data: data,
        }
    }

    fn predict_data(n: usize, batch_size: usize) -> TaskData {
        TaskData {
            model_topology: identity_topology(),
            weight_shards: identity_shards(),
            inputs: (0..n).map(|i| i as f32).collect(),
            input_shape: [n, 1],
            outputs: None,
            output_shape: None,
            batch_size,
            epochs: None,
            accumulation_group_size: None,
        }
    }

    #[test]
    fn predict_ten_samples_batch_four_keeps_order() {
        let row = task(TaskKind::Predict, predict_data(10, 4));
        let result = dispatch(&row);

        assert!(result.ok);
        let outputs = result.outputs.unwrap();
        assert_eq!(outputs.len(), 10);
        for (i, v) in outputs.iter().enumerate() {
            assert_eq!(*v, i as f32);
        }
        assert_eq!(result.output_shape, Some([10, 1]));
        assert!(result.weights.is_none());
        assert!(result.loss.is_none());
    }

    #[test]
    fn train_without_epochs_is_a_configuration_failure() {
        let mut data = predict_data(4, 2);
        data.outputs = Some(vec![0.0; 4]);
        data.output_shape = Some([4, 1]);
        data.accumulation_group_size = Some(2);
        let row = task(TaskKind::Train, data);

        let result = dispatch(&row);
        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(ErrorKind::Configuration));
        assert!(result.message.unwrap().contains("epochs"));
    }

    #[test]
    fn train_returns_updated_weights_and_loss() {
        let mut data = predict_data(8, 2);
        data.outputs = Some(data.inputs.iter().map(|v| 2.0 * v).collect());
        data.output_shape = Some([8, 1]);
        data.epochs = Some(2);
        data.accumulation_group_size = Some(4);
        let row = task(TaskKind::Train, data);

        let result = dispatch(&row);
        assert!(result.ok, "{:?}", result.message);
        assert!(result.loss.is_some());

        let weights = result.weights.unwrap();
        assert_eq!(weights.len(), 2);
        // Training moved the kernel off its initial value.
        assert_ne!(weights[0].data[0], 1.0);
    }

    #[test]
    fn evaluate_returns_loss_only() {
        let mut data = predict_data(4, 2);
        // Targets equal predictions: loss is exactly zero.
        data.outputs = Some(data.inputs.clone());
        data.output_shape = Some([4, 1]);
        let row = task(TaskKind::Evaluate, data);

        let result = dispatch(&row);
        assert!(result.ok);
        assert_eq!(result.loss, Some(0.0));
        assert!(result.weights.is_none());
        assert!(result.outputs.is_none());
    }

    #[test]
    fn indivisible_accumulation_group_is_rejected() {
        let mut data = predict_data(8, 3);
        data.outputs = Some(vec![0.0; 8]);
        data.output_shape = Some([8, 1]);
        data.epochs = Some(1);
        data.accumulation_group_size = Some(4);
        let row = task(TaskKind::Train, data);

        let result = dispatch(&row);
        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(ErrorKind::Configuration));
    }

    fn sparse_data() -> TaskData {
        // 1 -> 3 softmax classifier with sparse targets.
        TaskData {
            model_topology: serde_json::json!({
                "layers": [{"units": 3, "input_dim": 1, "activation": "softmax"}],
                "training_config": {
                    "loss": "sparse_categorical_crossentropy",
                    "optimizer_config": {"class_name": "sgd"}
                }
            }),
            weight_shards: vec![
                WeightShard {
                    shape: vec![1, 3],
                    data: vec![0.5, -0.25, 0.25],
                },
                WeightShard {
                    shape: vec![3],
                    data: vec![0.0, 0.0, 0.0],
                },
            ],
            inputs: vec![1.0, -1.0],
            input_shape: [2, 1],
            outputs: Some(vec![0.0, 2.0]),
            output_shape: Some([2, 1]),
            batch_size: 2,
            epochs: None,
            accumulation_group_size: None,
        }
    }

    #[test]
    fn sparse_targets_are_single_column_class_indices() {
        let row = task(TaskKind::Evaluate, sparse_data());

        let result = dispatch(&row);
        assert!(result.ok, "{:?}", result.message);
        assert!(result.loss.unwrap().is_finite());
    }

    #[test]
    fn out_of_range_class_index_is_rejected() {
        let mut data = sparse_data();
        data.outputs = Some(vec![0.0, 5.0]);
        let row = task(TaskKind::Evaluate, data);

        let result = dispatch(&row);
        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(ErrorKind::Configuration));
        assert!(result.message.unwrap().contains("class"));
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let row = task(TaskKind::Predict, predict_data(0, 2));

        let result = dispatch(&row);
        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(ErrorKind::Configuration));
    }

    #[test]
    fn bad_input_shape_is_rejected() {
        let mut data = predict_data(4, 2);
        data.input_shape = [4, 2]; // claims 8 values, carries 4
        let row = task(TaskKind::Predict, data);

        let result = dispatch(&row);
        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(ErrorKind::Configuration));
    }
}
