//! Batch executor shared by training, evaluation and prediction.
//!
//! The sample axis is split into contiguous chunks of `batch_size`; the final
//! chunk carries the remainder and is processed like any other, never skipped
//! or padded.

use std::ops::Range;

use ndarray::{Array2, ArrayView2, s};

use crate::model::CompiledModel;
use crate::{EngineErr, Result};

/// Iterator over contiguous `[start, end)` sample ranges.
#[derive(Debug, Clone)]
pub struct Batches {
    len: usize,
    batch_size: usize,
    cursor: usize,
}

impl Batches {
    pub fn new(len: usize, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(EngineErr::BatchSizeZero);
        }

        Ok(Self {
            len,
            batch_size,
            cursor: 0,
        })
    }
}

impl Iterator for Batches {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        if self.cursor >= self.len {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.len);
        let range = self.cursor..end;
        self.cursor = end;
        Some(range)
    }
}

/// Runs forward passes plus the compiled loss over every batch and returns
/// the sample-weighted mean loss.
pub fn evaluate(
    model: &mut CompiledModel,
    x: ArrayView2<f32>,
    y: ArrayView2<f32>,
    batch_size: usize,
) -> Result<f32> {
    let n = x.nrows();
    if n == 0 {
        return Err(EngineErr::EmptyDataset);
    }
    let mut loss_sum = 0.0;

    for (i, range) in Batches::new(n, batch_size)?.enumerate() {
        let bx = x.slice(s![range.clone(), ..]);
        let by = y.slice(s![range.clone(), ..]);

        let batch_loss = model.batch_loss(bx, by);
        if !batch_loss.is_finite() {
            return Err(EngineErr::NonFiniteLoss { epoch: 0, batch: i });
        }

        loss_sum += batch_loss * range.len() as f32;
    }

    Ok(loss_sum / n as f32)
}

/// Runs forward-only passes over every batch and concatenates the raw
/// outputs in original sample order.
pub fn predict(
    model: &mut CompiledModel,
    x: ArrayView2<f32>,
    batch_size: usize,
) -> Result<Array2<f32>> {
    let n = x.nrows();
    let mut out = Array2::zeros((n, model.output_dim()));

    for range in Batches::new(n, batch_size)? {
        let bx = x.slice(s![range.clone(), ..]);
        let pred = model.forward(bx);
        out.slice_mut(s![range, ..]).assign(&pred);
    }

    Ok(out)
}
