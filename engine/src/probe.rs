//! Runtime self-check run before a device advertises availability.

use log::debug;
use ndarray::array;

use feed::row::WeightShard;

use crate::topology::Topology;
use crate::{Result, codec};

/// Compiles and runs a throwaway model through one forward pass.
///
/// A device that cannot complete this has no business joining the network;
/// the coordinator keeps it offline on failure.
pub fn probe_runtime() -> Result<()> {
    let value = serde_json::json!({
        "layers": [{"units": 1, "input_dim": 2, "activation": "sigmoid"}],
        "training_config": {
            "loss": "mean_squared_error",
            "optimizer_config": {"class_name": "sgd"}
        }
    });

    let topology = Topology::parse(&value)?;
    let shards = vec![
        WeightShard {
            shape: vec![2, 1],
            data: vec![0.5, -0.5],
        },
        WeightShard {
            shape: vec![1],
            data: vec![0.1],
        },
    ];

    let mut model = codec::compile(&topology, &shards)?;
    let out = model.forward(array![[1.0, 2.0]].view());

    debug!(value = out[[0, 0]] as f64; "runtime probe output");
    debug_assert!(out[[0, 0]].is_finite());
    Ok(())
}
