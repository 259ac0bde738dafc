pub mod batch;
pub mod codec;
mod error;
mod layer;
pub mod loss;
mod model;
pub mod optimizer;
pub mod probe;
pub mod topology;
pub mod train;

pub use error::{EngineErr, Result};
pub use model::CompiledModel;
