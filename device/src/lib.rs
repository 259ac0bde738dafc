pub mod coordinator;
pub mod dispatch;
mod error;
mod state;

pub use coordinator::Coordinator;
pub use error::{DeviceErr, Result};
pub use state::DeviceState;
