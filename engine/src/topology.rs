//! Typed schema for the wire-format model topology.
//!
//! The topology travels inside the task row as JSON. Layer names and the
//! embedded training configuration follow the layers-model convention the
//! coordinating side exports: a dense layer stack plus a `training_config`
//! naming the loss and the optimizer with its hyperparameters.

use serde::{Deserialize, Serialize};

use crate::{EngineErr, Result};

/// Elementwise or row-wise nonlinearity attached to a dense layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

/// One dense layer declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
    pub units: usize,
    /// Required on the first layer, derived from the previous layer otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_dim: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation: Option<Activation>,
}

/// Optimizer hyperparameters; every field defaults when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizerHyper {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub momentum: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta_1: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta_2: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epsilon: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rho: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub class_name: String,
    #[serde(default)]
    pub config: OptimizerHyper,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub loss: String,
    pub optimizer_config: OptimizerConfig,
}

/// The layer-graph description embedded in a task request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    pub layers: Vec<LayerSpec>,
    pub training_config: TrainingConfig,
}

impl Topology {
    /// Parses a topology out of the raw JSON carried by a task row.
    pub fn parse(value: &serde_json::Value) -> Result<Self> {
        let topology: Topology = serde_json::from_value(value.clone())?;

        if topology.layers.is_empty() {
            return Err(EngineErr::EmptyModel);
        }
        if topology.layers[0].input_dim.is_none() {
            return Err(EngineErr::MissingInputDim);
        }
        if let Some(index) = topology.layers.iter().position(|l| l.units == 0) {
            return Err(EngineErr::ZeroUnitLayer { index });
        }

        Ok(topology)
    }

    /// Resolved `(input_dim, units)` pairs in declaration order.
    pub fn dims(&self) -> Vec<(usize, usize)> {
        let mut dims = Vec::with_capacity(self.layers.len());
        let mut fan_in = self.layers[0].input_dim.unwrap_or(0);

        for layer in &self.layers {
            let fan_in_here = layer.input_dim.unwrap_or(fan_in);
            dims.push((fan_in_here, layer.units));
            fan_in = layer.units;
        }

        dims
    }
}
