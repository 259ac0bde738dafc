use std::fmt;

/// The device's coordination state.
///
/// Exactly one instance exists per running client, owned by the coordinator;
/// every transition goes through it. Other layers only see advisory
/// snapshots through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    #[default]
    Offline,
    Available,
    Busy,
}

impl DeviceState {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceState::Offline => "offline",
            DeviceState::Available => "available",
            DeviceState::Busy => "busy",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
