//! Loss functions derivable from the topology's named loss.
//!
//! Each variant provides the batch loss as a single scalar and its gradient
//! with respect to the predictions. Losses that involve a logarithm or a
//! division clamp with `EPS` to keep the backward pass finite.

use ndarray::{Array2, ArrayView2, Axis};

use crate::{EngineErr, Result};

const EPS: f32 = 1e-7;
const HUBER_DELTA: f32 = 1.0;

/// A compiled loss function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
    MeanSquaredError,
    MeanAbsoluteError,
    CategoricalCrossentropy,
    BinaryCrossentropy,
    SparseCategoricalCrossentropy,
    Hinge,
    Huber,
    KlDivergence,
    CosineSimilarity,
}

impl Loss {
    /// Maps the topology's loss name onto a variant.
    ///
    /// Unknown names fail the compile with a configuration error; the task is
    /// aborted, never retried.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "mean_squared_error" | "mse" => Ok(Loss::MeanSquaredError),
            "mean_absolute_error" | "mae" => Ok(Loss::MeanAbsoluteError),
            "categorical_crossentropy" => Ok(Loss::CategoricalCrossentropy),
            "binary_crossentropy" => Ok(Loss::BinaryCrossentropy),
            "sparse_categorical_crossentropy" => Ok(Loss::SparseCategoricalCrossentropy),
            "hinge" => Ok(Loss::Hinge),
            "huber_loss" => Ok(Loss::Huber),
            "kl_divergence" => Ok(Loss::KlDivergence),
            "cosine_similarity" => Ok(Loss::CosineSimilarity),
            _ => Err(EngineErr::UnknownLoss {
                name: name.to_string(),
            }),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Loss::MeanSquaredError => "mean_squared_error",
            Loss::MeanAbsoluteError => "mean_absolute_error",
            Loss::CategoricalCrossentropy => "categorical_crossentropy",
            Loss::BinaryCrossentropy => "binary_crossentropy",
            Loss::SparseCategoricalCrossentropy => "sparse_categorical_crossentropy",
            Loss::Hinge => "hinge",
            Loss::Huber => "huber_loss",
            Loss::KlDivergence => "kl_divergence",
            Loss::CosineSimilarity => "cosine_similarity",
        }
    }

    /// Batch loss for predictions `y_pred` against targets `y`.
    pub fn loss(self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let numel = y_pred.len() as f32;
        let rows = y_pred.nrows() as f32;

        match self {
            Loss::MeanSquaredError => (&y_pred - &y)
                .mapv(|e| e.powi(2))
                .mean()
                .unwrap_or_default(),
            Loss::MeanAbsoluteError => {
                (&y_pred - &y).mapv(f32::abs).mean().unwrap_or_default()
            }
            Loss::CategoricalCrossentropy => {
                let mut sum = 0.0;
                for (p, t) in y_pred.iter().zip(y.iter()) {
                    sum -= t * p.max(EPS).ln();
                }
                sum / rows
            }
            Loss::BinaryCrossentropy => {
                let mut sum = 0.0;
                for (p, t) in y_pred.iter().zip(y.iter()) {
                    let p = p.clamp(EPS, 1.0 - EPS);
                    sum -= t * p.ln() + (1.0 - t) * (1.0 - p).ln();
                }
                sum / numel
            }
            Loss::SparseCategoricalCrossentropy => {
                let classes = y_pred.ncols();
                let mut sum = 0.0;
                for (row, target) in y_pred.outer_iter().zip(y.column(0)) {
                    let class = (*target as usize).min(classes.saturating_sub(1));
                    sum -= row[class].max(EPS).ln();
                }
                sum / rows
            }
            Loss::Hinge => {
                let mut sum = 0.0;
                for (p, t) in y_pred.iter().zip(y.iter()) {
                    sum += (1.0 - t * p).max(0.0);
                }
                sum / numel
            }
            Loss::Huber => {
                let mut sum = 0.0;
                for (p, t) in y_pred.iter().zip(y.iter()) {
                    let e = (p - t).abs();
                    sum += if e <= HUBER_DELTA {
                        0.5 * e * e
                    } else {
                        HUBER_DELTA * (e - 0.5 * HUBER_DELTA)
                    };
                }
                sum / numel
            }
            Loss::KlDivergence => {
                let mut sum = 0.0;
                for (p, t) in y_pred.iter().zip(y.iter()) {
                    if *t > 0.0 {
                        sum += t * (t.max(EPS) / p.max(EPS)).ln();
                    }
                }
                sum / rows
            }
            Loss::CosineSimilarity => {
                let mut sum = 0.0;
                for (p_row, t_row) in y_pred.outer_iter().zip(y.outer_iter()) {
                    let dot: f32 = p_row.iter().zip(t_row.iter()).map(|(p, t)| p * t).sum();
                    let p_norm = p_row.iter().map(|p| p * p).sum::<f32>().sqrt();
                    let t_norm = t_row.iter().map(|t| t * t).sum::<f32>().sqrt();
                    sum += 1.0 - dot / (p_norm * t_norm).max(EPS);
                }
                sum / rows
            }
        }
    }

    /// Gradient of [`Loss::loss`] with respect to `y_pred`.
    pub fn loss_prime(self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let numel = y_pred.len() as f32;
        let rows = y_pred.nrows() as f32;

        match self {
            Loss::MeanSquaredError => (&y_pred - &y) * (2.0 / numel),
            Loss::MeanAbsoluteError => {
                let mut d = (&y_pred - &y).mapv(f32::signum);
                d /= numel;
                d
            }
            Loss::CategoricalCrossentropy => {
                let mut d = Array2::zeros(y_pred.raw_dim());
                ndarray::Zip::from(&mut d)
                    .and(&y_pred)
                    .and(&y)
                    .for_each(|d, &p, &t| *d = -t / p.max(EPS) / rows);
                d
            }
            Loss::BinaryCrossentropy => {
                let mut d = Array2::zeros(y_pred.raw_dim());
                ndarray::Zip::from(&mut d)
                    .and(&y_pred)
                    .and(&y)
                    .for_each(|d, &p, &t| {
                        let p = p.clamp(EPS, 1.0 - EPS);
                        *d = (p - t) / (p * (1.0 - p)) / numel;
                    });
                d
            }
            Loss::SparseCategoricalCrossentropy => {
                let classes = y_pred.ncols();
                let mut d = Array2::zeros(y_pred.raw_dim());
                for (i, target) in y.column(0).iter().enumerate() {
                    let class = (*target as usize).min(classes.saturating_sub(1));
                    d[[i, class]] = -1.0 / y_pred[[i, class]].max(EPS) / rows;
                }
                d
            }
            Loss::Hinge => {
                let mut d = Array2::zeros(y_pred.raw_dim());
                ndarray::Zip::from(&mut d)
                    .and(&y_pred)
                    .and(&y)
                    .for_each(|d, &p, &t| {
                        *d = if 1.0 - t * p > 0.0 { -t / numel } else { 0.0 };
                    });
                d
            }
            Loss::Huber => {
                let mut d = Array2::zeros(y_pred.raw_dim());
                ndarray::Zip::from(&mut d)
                    .and(&y_pred)
                    .and(&y)
                    .for_each(|d, &p, &t| {
                        *d = (p - t).clamp(-HUBER_DELTA, HUBER_DELTA) / numel;
                    });
                d
            }
            Loss::KlDivergence => {
                let mut d = Array2::zeros(y_pred.raw_dim());
                ndarray::Zip::from(&mut d)
                    .and(&y_pred)
                    .and(&y)
                    .for_each(|d, &p, &t| *d = -t / p.max(EPS) / rows);
                d
            }
            Loss::CosineSimilarity => {
                let mut d = Array2::zeros(y_pred.raw_dim());
                for (i, (p_row, t_row)) in y_pred.outer_iter().zip(y.outer_iter()).enumerate() {
                    let dot: f32 = p_row.iter().zip(t_row.iter()).map(|(p, t)| p * t).sum();
                    let p_sq: f32 = p_row.iter().map(|p| p * p).sum();
                    let p_norm = p_sq.sqrt();
                    let t_norm = t_row.iter().map(|t| t * t).sum::<f32>().sqrt();
                    let denom = (p_norm * t_norm).max(EPS);
                    let cos = dot / denom;

                    for (j, (&p, &t)) in p_row.iter().zip(t_row.iter()).enumerate() {
                        let dcos = t / denom - cos * p / p_sq.max(EPS);
                        d[[i, j]] = -dcos / rows;
                    }
                }
                d
            }
        }
    }
}
