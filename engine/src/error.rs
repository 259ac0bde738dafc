use std::{error::Error, fmt};

use feed::row::ErrorKind;

/// The engine's result type.
pub type Result<T> = std::result::Result<T, EngineErr>;

/// Failures raised while compiling or executing a task.
///
/// Configuration variants describe a malformed task and are fatal to that
/// task only; computation variants describe a numerical failure during a
/// forward or backward pass. Neither is ever retried.
#[derive(Debug)]
pub enum EngineErr {
    Topology(serde_json::Error),
    EmptyModel,
    MissingInputDim,
    ZeroUnitLayer {
        index: usize,
    },
    UnknownOptimizer {
        class_name: String,
    },
    UnknownLoss {
        name: String,
    },
    MissingField {
        field: &'static str,
    },
    ShardCountMismatch {
        got: usize,
        expected: usize,
    },
    ShardShapeMismatch {
        index: usize,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    TensorShapeMismatch {
        what: &'static str,
        rows: usize,
        cols: usize,
        len: usize,
    },
    BatchSizeZero,
    EmptyDataset,
    IndivisibleAccumulation {
        group: usize,
        batch: usize,
    },
    ClassIndexOutOfRange {
        sample: usize,
        classes: usize,
    },
    SampleCountMismatch {
        inputs: usize,
        outputs: usize,
    },
    InputDimMismatch {
        got: usize,
        expected: usize,
    },
    OutputDimMismatch {
        got: usize,
        expected: usize,
    },
    NonFiniteLoss {
        epoch: usize,
        batch: usize,
    },
}

impl EngineErr {
    /// Classification surfaced on the failure row.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineErr::NonFiniteLoss { .. } => ErrorKind::Computation,
            _ => ErrorKind::Configuration,
        }
    }
}

impl fmt::Display for EngineErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineErr::Topology(e) => write!(f, "malformed model topology: {e}"),
            EngineErr::EmptyModel => write!(f, "the topology declares no layers"),
            EngineErr::MissingInputDim => {
                write!(f, "the first layer does not declare an input dimension")
            }
            EngineErr::ZeroUnitLayer { index } => {
                write!(f, "layer {index} declares zero units")
            }
            EngineErr::UnknownOptimizer { class_name } => {
                write!(f, "unsupported optimizer class name: {class_name}")
            }
            EngineErr::UnknownLoss { name } => {
                write!(f, "unsupported loss function: {name}")
            }
            EngineErr::MissingField { field } => {
                write!(f, "the task is missing the required field {field}")
            }
            EngineErr::ShardCountMismatch { got, expected } => write!(
                f,
                "weight shard count mismatch: got {got}, the topology expects {expected}"
            ),
            EngineErr::ShardShapeMismatch {
                index,
                got,
                expected,
            } => write!(
                f,
                "weight shard {index} has shape {got:?}, the topology expects {expected:?}"
            ),
            EngineErr::TensorShapeMismatch {
                what,
                rows,
                cols,
                len,
            } => write!(
                f,
                "{what} declares shape [{rows}, {cols}] but carries {len} values"
            ),
            EngineErr::BatchSizeZero => write!(f, "batch size must be greater than zero"),
            EngineErr::EmptyDataset => write!(f, "the task carries no samples"),
            EngineErr::IndivisibleAccumulation { group, batch } => write!(
                f,
                "accumulation group size {group} is not divisible by batch size {batch}"
            ),
            EngineErr::ClassIndexOutOfRange { sample, classes } => write!(
                f,
                "sample {sample} names a class outside the {classes}-class output"
            ),
            EngineErr::SampleCountMismatch { inputs, outputs } => write!(
                f,
                "inputs carry {inputs} samples but outputs carry {outputs}"
            ),
            EngineErr::InputDimMismatch { got, expected } => write!(
                f,
                "inputs have dimension {got}, the model consumes {expected}"
            ),
            EngineErr::OutputDimMismatch { got, expected } => write!(
                f,
                "outputs have dimension {got}, the model produces {expected}"
            ),
            EngineErr::NonFiniteLoss { epoch, batch } => write!(
                f,
                "loss became non-finite at epoch {epoch}, batch {batch}"
            ),
        }
    }
}

impl Error for EngineErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EngineErr::Topology(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for EngineErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Topology(value)
    }
}
