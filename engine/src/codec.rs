//! Wire-format model codec.
//!
//! `compile` turns a topology plus its flat weight shards into a runnable
//! [`CompiledModel`]; [`CompiledModel::export_weights`] is the inverse. The
//! request already embeds every weight, so compilation never fetches
//! anything.

use log::debug;

use feed::row::WeightShard;

use crate::layer::Dense;
use crate::loss::Loss;
use crate::model::CompiledModel;
use crate::optimizer::Optimizer;
use crate::topology::{Activation, Topology};
use crate::{EngineErr, Result};

/// Compiles the wire-format model description into a runnable model.
///
/// Shards must arrive in declaration order, kernel then bias per layer, and
/// match the shapes the topology implies; any mismatch is a configuration
/// error that aborts the task.
pub fn compile(topology: &Topology, shards: &[WeightShard]) -> Result<CompiledModel> {
    let dims = topology.dims();

    let expected_shards = dims.len() * 2;
    if shards.len() != expected_shards {
        return Err(EngineErr::ShardCountMismatch {
            got: shards.len(),
            expected: expected_shards,
        });
    }

    let mut layers = Vec::with_capacity(dims.len());
    let mut offset = 0;

    for (spec, &dim) in topology.layers.iter().zip(&dims) {
        let activation = match spec.activation {
            Some(Activation::Linear) | None => None,
            other => other,
        };

        let layer = Dense::new(dim, offset, activation);
        offset += layer.size();
        layers.push(layer);
    }

    let num_params = offset;
    let mut params = vec![0.0; num_params];

    for (i, (layer, pair)) in layers.iter().zip(shards.chunks(2)).enumerate() {
        let (in_dim, units) = layer.dim();
        let kernel = &pair[0];
        let bias = &pair[1];

        if kernel.shape != [in_dim, units] || kernel.data.len() != in_dim * units {
            return Err(EngineErr::ShardShapeMismatch {
                index: i * 2,
                got: kernel.shape.clone(),
                expected: vec![in_dim, units],
            });
        }
        if bias.shape != [units] || bias.data.len() != units {
            return Err(EngineErr::ShardShapeMismatch {
                index: i * 2 + 1,
                got: bias.shape.clone(),
                expected: vec![units],
            });
        }

        let start = layer.offset();
        let split = start + in_dim * units;
        params[start..split].copy_from_slice(&kernel.data);
        params[split..split + units].copy_from_slice(&bias.data);
    }

    let training = &topology.training_config;
    let loss = Loss::from_name(&training.loss)?;
    let optimizer = Optimizer::from_config(&training.optimizer_config, num_params)?;

    debug!(
        layers = layers.len(),
        params = num_params,
        loss = loss.name(),
        optimizer = optimizer.class_name();
        "compiled model"
    );

    Ok(CompiledModel::new(layers, params, optimizer, loss))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology_json() -> serde_json::Value {
        serde_json::json!({
            "layers": [
                {"units": 2, "input_dim": 3, "activation": "sigmoid"},
                {"units": 1}
            ],
            "training_config": {
                "loss": "mean_squared_error",
                "optimizer_config": {"class_name": "sgd"}
            }
        })
    }

    fn shards() -> Vec<WeightShard> {
        vec![
            WeightShard {
                shape: vec![3, 2],
                data: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
            },
            WeightShard {
                shape: vec![2],
                data: vec![0.01, 0.02],
            },
            WeightShard {
                shape: vec![2, 1],
                data: vec![1.5, -1.5],
            },
            WeightShard {
                shape: vec![1],
                data: vec![0.0],
            },
        ]
    }

    #[test]
    fn encode_of_decode_is_bit_for_bit() {
        let topology = Topology::parse(&topology_json()).unwrap();
        let original = shards();

        let model = compile(&topology, &original).unwrap();
        let exported = model.export_weights();

        assert_eq!(exported, original);
    }

    #[test]
    fn shard_count_mismatch_is_rejected() {
        let topology = Topology::parse(&topology_json()).unwrap();
        let mut short = shards();
        short.pop();

        assert!(matches!(
            compile(&topology, &short),
            Err(EngineErr::ShardCountMismatch {
                got: 3,
                expected: 4
            })
        ));
    }

    #[test]
    fn shard_shape_mismatch_is_rejected() {
        let topology = Topology::parse(&topology_json()).unwrap();
        let mut bad = shards();
        bad[2].shape = vec![1, 2];

        assert!(matches!(
            compile(&topology, &bad),
            Err(EngineErr::ShardShapeMismatch { index: 2, .. })
        ));
    }

    #[test]
    fn unknown_loss_fails_the_compile() {
        let mut value = topology_json();
        value["training_config"]["loss"] = serde_json::json!("focal");
        let topology = Topology::parse(&value).unwrap();

        assert!(matches!(
            compile(&topology, &shards()),
            Err(EngineErr::UnknownLoss { .. })
        ));
    }

    #[test]
    fn unknown_optimizer_fails_the_compile() {
        let mut value = topology_json();
        value["training_config"]["optimizer_config"]["class_name"] =
            serde_json::json!("adagrad");
        let topology = Topology::parse(&value).unwrap();

        assert!(matches!(
            compile(&topology, &shards()),
            Err(EngineErr::UnknownOptimizer { .. })
        ));
    }
}
