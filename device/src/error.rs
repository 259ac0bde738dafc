use std::{error::Error, fmt, io};

use engine::EngineErr;
use feed::FeedErr;

/// The device module's result type.
pub type Result<T> = std::result::Result<T, DeviceErr>;

/// Coordinator lifecycle failures.
///
/// Task execution failures never surface here; the dispatcher converts those
/// into failure rows before the coordinator sees them.
#[derive(Debug)]
pub enum DeviceErr {
    /// The feed rejected a subscribe, status write or result write.
    Transport(FeedErr),
    /// The runtime self-probe failed; the device stays offline.
    Probe(EngineErr),
}

impl fmt::Display for DeviceErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceErr::Transport(e) => write!(f, "feed transport error: {e}"),
            DeviceErr::Probe(e) => write!(f, "runtime probe failed: {e}"),
        }
    }
}

impl Error for DeviceErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DeviceErr::Transport(e) => Some(e),
            DeviceErr::Probe(e) => Some(e),
        }
    }
}

impl From<FeedErr> for DeviceErr {
    fn from(value: FeedErr) -> Self {
        Self::Transport(value)
    }
}

impl From<EngineErr> for DeviceErr {
    fn from(value: EngineErr) -> Self {
        Self::Probe(value)
    }
}

/// Boundary conversion for the binary.
impl From<DeviceErr> for io::Error {
    fn from(value: DeviceErr) -> Self {
        io::Error::other(value)
    }
}
