use std::{error::Error, fmt, io};

/// The feed module's result type.
pub type Result<T> = std::result::Result<T, FeedErr>;

/// Transport failures against the task feed.
#[derive(Debug)]
pub enum FeedErr {
    Io(io::Error),
    Encoding(serde_json::Error),
    /// The feed side of the channel is gone.
    Closed,
    /// A row arrived that does not belong to this device or frame kind.
    UnexpectedFrame { got: &'static str },
    /// The connection's read half is already driving a subscription.
    SubscriptionTaken,
    UnknownDevice { device_id: String },
}

impl fmt::Display for FeedErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedErr::Io(e) => write!(f, "feed io error: {e}"),
            FeedErr::Encoding(e) => write!(f, "feed encoding error: {e}"),
            FeedErr::Closed => write!(f, "the task feed connection is closed"),
            FeedErr::UnexpectedFrame { got } => {
                write!(f, "unexpected frame from the task feed: got {got}")
            }
            FeedErr::SubscriptionTaken => {
                write!(f, "the connection is already driving a subscription")
            }
            FeedErr::UnknownDevice { device_id } => {
                write!(f, "the feed has no row for device {device_id}")
            }
        }
    }
}

impl Error for FeedErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FeedErr::Io(e) => Some(e),
            FeedErr::Encoding(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FeedErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for FeedErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Encoding(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<FeedErr> for io::Error {
    fn from(value: FeedErr) -> Self {
        match value {
            FeedErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
