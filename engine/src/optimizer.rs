//! Optimizers derived from the topology's embedded training configuration.
//!
//! All of them operate on the model's flat parameter buffer; state buffers
//! (velocity, moment estimates) are keyed by parameter offset and live for
//! exactly as long as the compiled model that owns them.

use crate::topology::{OptimizerConfig, OptimizerHyper};
use crate::{EngineErr, Result};

#[derive(Debug)]
pub struct Sgd {
    learning_rate: f32,
    momentum: f32,
    velocity: Box<[f32]>,
}

impl Sgd {
    pub fn new(len: usize, learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: vec![0.; len].into_boxed_slice(),
        }
    }

    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) {
        let lr = self.learning_rate;
        let mu = self.momentum;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.velocity.iter_mut())
            .for_each(|((p, g), v)| {
                *v = (mu * *v) + g;
                *p -= lr * *v;
            });
    }
}

#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
    epsilon: f32,
}

impl Adam {
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
            epsilon,
        }
    }

    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) {
        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        params
            .iter_mut()
            .zip(grad)
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|(((p, g), v), s)| {
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() + eps);
            });
    }
}

#[derive(Debug)]
pub struct RmsProp {
    learning_rate: f32,
    rho: f32,
    momentum: f32,
    epsilon: f32,
    cache: Box<[f32]>,
    velocity: Box<[f32]>,
}

impl RmsProp {
    pub fn new(len: usize, learning_rate: f32, rho: f32, momentum: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            rho,
            momentum,
            epsilon,
            cache: vec![0.; len].into_boxed_slice(),
            velocity: vec![0.; len].into_boxed_slice(),
        }
    }

    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) {
        let Self {
            learning_rate: lr,
            rho,
            momentum: mu,
            epsilon: eps,
            ..
        } = *self;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.cache.iter_mut())
            .zip(self.velocity.iter_mut())
            .for_each(|(((p, g), c), v)| {
                *c = rho * *c + (1. - rho) * g.powi(2);
                *v = mu * *v + lr * g / (c.sqrt() + eps);
                *p -= *v;
            });
    }
}

#[derive(Debug)]
enum Algorithm {
    Sgd(Sgd),
    Adam(Adam),
    RmsProp(RmsProp),
}

/// The optimizer instance owned by a compiled model.
///
/// Tracks how many steps have been applied; the training engine leans on the
/// counter for logging and the accumulation tests lean on it for asserting
/// step counts.
#[derive(Debug)]
pub struct Optimizer {
    algorithm: Algorithm,
    steps: u64,
}

impl Optimizer {
    /// Derives an optimizer from the topology's `optimizer_config`.
    ///
    /// Hyperparameters default per class when absent; an unknown class name
    /// fails the compile with a configuration error.
    pub fn from_config(config: &OptimizerConfig, len: usize) -> Result<Self> {
        let OptimizerHyper {
            learning_rate,
            momentum,
            beta_1,
            beta_2,
            epsilon,
            rho,
        } = config.config;

        let algorithm = match config.class_name.to_lowercase().as_str() {
            "sgd" => Algorithm::Sgd(Sgd::new(
                len,
                learning_rate.unwrap_or(0.01),
                momentum.unwrap_or(0.0),
            )),
            "adam" => Algorithm::Adam(Adam::new(
                len,
                learning_rate.unwrap_or(0.001),
                beta_1.unwrap_or(0.9),
                beta_2.unwrap_or(0.999),
                epsilon.unwrap_or(1e-7),
            )),
            "rmsprop" => Algorithm::RmsProp(RmsProp::new(
                len,
                learning_rate.unwrap_or(0.001),
                rho.unwrap_or(0.9),
                momentum.unwrap_or(0.0),
                epsilon.unwrap_or(1e-7),
            )),
            _ => {
                return Err(EngineErr::UnknownOptimizer {
                    class_name: config.class_name.clone(),
                });
            }
        };

        Ok(Self {
            algorithm,
            steps: 0,
        })
    }

    /// Applies one optimizer step with the given (already averaged) gradient.
    pub fn update_params(&mut self, grad: &[f32], params: &mut [f32]) {
        debug_assert_eq!(grad.len(), params.len());

        match &mut self.algorithm {
            Algorithm::Sgd(o) => o.update_params(grad, params),
            Algorithm::Adam(o) => o.update_params(grad, params),
            Algorithm::RmsProp(o) => o.update_params(grad, params),
        }

        self.steps += 1;
    }

    /// Total optimizer steps applied through this instance.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn class_name(&self) -> &'static str {
        match self.algorithm {
            Algorithm::Sgd(_) => "sgd",
            Algorithm::Adam(_) => "adam",
            Algorithm::RmsProp(_) => "rmsprop",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(class_name: &str) -> OptimizerConfig {
        OptimizerConfig {
            class_name: class_name.to_string(),
            config: OptimizerHyper::default(),
        }
    }

    #[test]
    fn unknown_class_name_is_a_configuration_error() {
        let err = Optimizer::from_config(&config("adagrad"), 2).unwrap_err();
        assert!(matches!(err, EngineErr::UnknownOptimizer { .. }));
    }

    #[test]
    fn sgd_takes_a_plain_gradient_step() {
        let cfg = OptimizerConfig {
            class_name: "sgd".to_string(),
            config: OptimizerHyper {
                learning_rate: Some(0.1),
                ..Default::default()
            },
        };
        let mut opt = Optimizer::from_config(&cfg, 2).unwrap();
        let mut params = [1.0, -1.0];

        opt.update_params(&[0.5, -0.5], &mut params);

        assert!((params[0] - 0.95).abs() < 1e-6);
        assert!((params[1] + 0.95).abs() < 1e-6);
        assert_eq!(opt.steps(), 1);
    }

    #[test]
    fn sgd_momentum_accumulates_velocity() {
        let cfg = OptimizerConfig {
            class_name: "sgd".to_string(),
            config: OptimizerHyper {
                learning_rate: Some(1.0),
                momentum: Some(0.5),
                ..Default::default()
            },
        };
        let mut opt = Optimizer::from_config(&cfg, 1).unwrap();
        let mut params = [0.0];

        opt.update_params(&[1.0], &mut params); // v = 1,   p = -1
        opt.update_params(&[1.0], &mut params); // v = 1.5, p = -2.5

        assert!((params[0] + 2.5).abs() < 1e-6);
    }

    #[test]
    fn adam_first_step_moves_by_roughly_the_learning_rate() {
        let mut opt = Optimizer::from_config(&config("adam"), 1).unwrap();
        let mut params = [1.0];

        opt.update_params(&[10.0], &mut params);

        // Bias-corrected first step is ~lr regardless of gradient magnitude.
        assert!((1.0 - params[0] - 0.001).abs() < 1e-4);
    }
}
