use ndarray::{Array2, ArrayView2};

use feed::row::WeightShard;

use crate::layer::Dense;
use crate::loss::Loss;
use crate::optimizer::Optimizer;

/// A runnable model: dense layer stack over one flat parameter buffer, plus
/// the optimizer and loss derived from the topology's training configuration.
///
/// Owned exclusively by the task that compiled it; dropping it frees every
/// backing buffer. Never shared across tasks.
pub struct CompiledModel {
    layers: Vec<Dense>,
    params: Vec<f32>,
    optimizer: Optimizer,
    loss: Loss,
    input_dim: usize,
    output_dim: usize,
}

impl CompiledModel {
    pub(crate) fn new(
        layers: Vec<Dense>,
        params: Vec<f32>,
        optimizer: Optimizer,
        loss: Loss,
    ) -> Self {
        let input_dim = layers.first().map(|l| l.dim().0).unwrap_or(0);
        let output_dim = layers.last().map(|l| l.dim().1).unwrap_or(0);

        Self {
            layers,
            params,
            optimizer,
            loss,
            input_dim,
            output_dim,
        }
    }

    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn loss_fn(&self) -> Loss {
        self.loss
    }

    pub fn optimizer_name(&self) -> &'static str {
        self.optimizer.class_name()
    }

    /// Total optimizer steps applied to this model.
    pub fn optimizer_steps(&self) -> u64 {
        self.optimizer.steps()
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    /// Forward pass over one micro-batch.
    pub fn forward(&mut self, x: ArrayView2<f32>) -> Array2<f32> {
        debug_assert_eq!(x.ncols(), self.input_dim);

        let Self { layers, params, .. } = self;
        let mut a = x.to_owned();

        for layer in layers.iter_mut() {
            let next = layer.forward(params, a.view());
            a = next;
        }

        a
    }

    /// Forward pass plus loss, no gradients. Used by evaluation.
    pub fn batch_loss(&mut self, x: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let pred = self.forward(x);
        self.loss.loss(pred.view(), y)
    }

    /// Forward-backward pass over one micro-batch: writes the parameter
    /// gradient into `grad` (overwriting it) and returns the batch loss.
    pub fn loss_and_grad(&mut self, x: ArrayView2<f32>, y: ArrayView2<f32>, grad: &mut [f32]) -> f32 {
        debug_assert_eq!(grad.len(), self.params.len());

        let pred = self.forward(x);
        let batch_loss = self.loss.loss(pred.view(), y);
        let mut d = self.loss.loss_prime(pred.view(), y);

        let Self { layers, params, .. } = self;
        for layer in layers.iter_mut().rev() {
            d = layer.backward(params, grad, d);
        }

        batch_loss
    }

    /// Applies one optimizer step with an already-averaged gradient.
    pub fn apply_step(&mut self, grad: &[f32]) {
        let Self {
            optimizer, params, ..
        } = self;
        optimizer.update_params(grad, params);
    }

    /// Reads the trainable parameters back out as wire shards, walking layers
    /// in declaration order, kernel then bias.
    pub fn export_weights(&self) -> Vec<WeightShard> {
        let mut shards = Vec::with_capacity(self.layers.len() * 2);

        for layer in &self.layers {
            let (in_dim, units) = layer.dim();
            let (w, b) = layer.view_params(&self.params);

            shards.push(WeightShard {
                shape: vec![in_dim, units],
                data: w.iter().copied().collect(),
            });
            shards.push(WeightShard {
                shape: vec![units],
                data: b.iter().copied().collect(),
            });
        }

        shards
    }
}
