//! Training engine: epochs of micro-batches with gradient accumulation.
//!
//! Gradients are accumulated in a flat buffer keyed by parameter offset,
//! averaged over the number of micro-batches actually accumulated, and
//! applied as one optimizer step per full group. A nonempty remainder at
//! epoch end gets one final step averaged over its own count; gradients are
//! never dropped at an epoch boundary.

use log::{debug, info};
use ndarray::{ArrayView2, s};

use crate::batch::Batches;
use crate::model::CompiledModel;
use crate::{EngineErr, Result};

#[derive(Debug, Clone, Copy)]
pub struct TrainOptions {
    pub batch_size: usize,
    /// Samples per optimizer step; must be a multiple of `batch_size`.
    pub accumulation_group_size: usize,
    pub epochs: usize,
}

impl TrainOptions {
    /// Rejects malformed options before any tensor work begins.
    fn validate(&self) -> Result<usize> {
        if self.batch_size == 0 {
            return Err(EngineErr::BatchSizeZero);
        }
        if self.accumulation_group_size == 0
            || self.accumulation_group_size % self.batch_size != 0
        {
            return Err(EngineErr::IndivisibleAccumulation {
                group: self.accumulation_group_size,
                batch: self.batch_size,
            });
        }

        Ok(self.accumulation_group_size / self.batch_size)
    }
}

/// Trains `model` in place and returns the last epoch's average loss.
///
/// A failure mid-epoch aborts the whole task; optimizer steps already applied
/// are not rolled back.
pub fn train(
    model: &mut CompiledModel,
    x: ArrayView2<f32>,
    y: ArrayView2<f32>,
    opts: &TrainOptions,
) -> Result<f32> {
    let accum_steps = opts.validate()?;

    let n = x.nrows();
    if n == 0 {
        return Err(EngineErr::EmptyDataset);
    }
    debug_assert_eq!(n, y.nrows());

    let num_params = model.num_params();
    let mut grad = vec![0.0; num_params];
    let mut accum = vec![0.0; num_params];
    let mut averaged = vec![0.0; num_params];
    let mut last_epoch_loss = 0.0;

    for epoch in 1..=opts.epochs {
        let mut epoch_loss_sum = 0.0;
        let mut micro = 0usize;
        accum.fill(0.0);

        for (i, range) in Batches::new(n, opts.batch_size)?.enumerate() {
            let bx = x.slice(s![range.clone(), ..]);
            let by = y.slice(s![range.clone(), ..]);

            let batch_loss = model.loss_and_grad(bx, by, &mut grad);
            if !batch_loss.is_finite() {
                return Err(EngineErr::NonFiniteLoss { epoch, batch: i });
            }

            epoch_loss_sum += batch_loss * range.len() as f32;
            accum.iter_mut().zip(&grad).for_each(|(a, g)| *a += g);
            micro += 1;

            if micro % accum_steps == 0 {
                apply_averaged(model, &accum, &mut averaged, accum_steps);
                accum.fill(0.0);
            }
        }

        // Partial group at epoch end: average over the actual count processed.
        let remainder = micro % accum_steps;
        if remainder != 0 {
            apply_averaged(model, &accum, &mut averaged, remainder);
        }

        last_epoch_loss = epoch_loss_sum / n as f32;
        info!(
            epoch,
            epochs = opts.epochs,
            loss = last_epoch_loss as f64;
            "epoch finished"
        );
    }

    Ok(last_epoch_loss)
}

fn apply_averaged(model: &mut CompiledModel, accum: &[f32], averaged: &mut [f32], count: usize) {
    let scale = 1.0 / count as f32;
    averaged
        .iter_mut()
        .zip(accum)
        .for_each(|(out, a)| *out = a * scale);

    model.apply_step(averaged);
    debug!(count, steps = model.optimizer_steps(); "applied optimizer step");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::topology::Topology;
    use feed::row::WeightShard;
    use ndarray::Array2;

    /// y = w*x + b, mse, plain sgd.
    fn linear_model(lr: f32) -> CompiledModel {
        let value = serde_json::json!({
            "layers": [{"units": 1, "input_dim": 1}],
            "training_config": {
                "loss": "mean_squared_error",
                "optimizer_config": {
                    "class_name": "sgd",
                    "config": {"learning_rate": lr}
                }
            }
        });
        let topology = Topology::parse(&value).unwrap();
        let shards = vec![
            WeightShard {
                shape: vec![1, 1],
                data: vec![0.0],
            },
            WeightShard {
                shape: vec![1],
                data: vec![0.0],
            },
        ];
        codec::compile(&topology, &shards).unwrap()
    }

    fn dataset(n: usize) -> (Array2<f32>, Array2<f32>) {
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f32 / n as f32);
        let y = x.mapv(|v| 2.0 * v + 1.0);
        (x, y)
    }

    #[test]
    fn full_groups_apply_one_step_each() {
        // 8 samples, batch 2, group 4 -> 2 steps per epoch, 4 across the run.
        let mut model = linear_model(0.1);
        let (x, y) = dataset(8);
        let opts = TrainOptions {
            batch_size: 2,
            accumulation_group_size: 4,
            epochs: 2,
        };

        train(&mut model, x.view(), y.view(), &opts).unwrap();
        assert_eq!(model.optimizer_steps(), 4);
    }

    #[test]
    fn epoch_end_remainder_gets_its_own_step() {
        // 6 samples, batch 2, group 4 -> 3 micro-batches per epoch:
        // one full group (2 micro-batches) plus a remainder of 1.
        let mut model = linear_model(0.1);
        let (x, y) = dataset(6);
        let opts = TrainOptions {
            batch_size: 2,
            accumulation_group_size: 4,
            epochs: 1,
        };

        train(&mut model, x.view(), y.view(), &opts).unwrap();
        assert_eq!(model.optimizer_steps(), 2);
    }

    #[test]
    fn indivisible_group_fails_before_any_tensor_work() {
        let mut model = linear_model(0.1);
        let (x, y) = dataset(8);
        let opts = TrainOptions {
            batch_size: 3,
            accumulation_group_size: 4,
            epochs: 1,
        };

        let err = train(&mut model, x.view(), y.view(), &opts).unwrap_err();
        assert!(matches!(
            err,
            EngineErr::IndivisibleAccumulation { group: 4, batch: 3 }
        ));
        assert_eq!(model.optimizer_steps(), 0);
    }

    #[test]
    fn training_on_an_empty_dataset_is_rejected() {
        let mut model = linear_model(0.1);
        let (x, y) = dataset(0);
        let opts = TrainOptions {
            batch_size: 2,
            accumulation_group_size: 4,
            epochs: 1,
        };

        let err = train(&mut model, x.view(), y.view(), &opts).unwrap_err();
        assert!(matches!(err, EngineErr::EmptyDataset));
        assert_eq!(model.optimizer_steps(), 0);
    }

    #[test]
    fn loss_decreases_on_a_linear_fit() {
        let mut model = linear_model(0.5);
        let (x, y) = dataset(16);
        let opts = TrainOptions {
            batch_size: 4,
            accumulation_group_size: 4,
            epochs: 1,
        };

        let first = train(&mut model, x.view(), y.view(), &opts).unwrap();

        let more = TrainOptions { epochs: 50, ..opts };
        let last = train(&mut model, x.view(), y.view(), &more).unwrap();

        assert!(last < first, "expected {last} < {first}");
    }

    #[test]
    fn accumulated_group_step_equals_large_batch_step() {
        // With plain sgd and mse, averaging gradients over a group of
        // micro-batches of equal size matches one step over the full group.
        let (x, y) = dataset(8);

        let mut grouped = linear_model(0.1);
        let opts = TrainOptions {
            batch_size: 2,
            accumulation_group_size: 8,
            epochs: 1,
        };
        train(&mut grouped, x.view(), y.view(), &opts).unwrap();

        let mut whole = linear_model(0.1);
        let opts = TrainOptions {
            batch_size: 8,
            accumulation_group_size: 8,
            epochs: 1,
        };
        train(&mut whole, x.view(), y.view(), &opts).unwrap();

        for (a, b) in grouped.params().iter().zip(whole.params()) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
    }
}
