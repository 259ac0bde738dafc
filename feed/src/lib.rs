mod client;
mod error;
pub mod memory;
pub mod row;
pub mod tcp;

pub use client::{Subscription, TaskFeed};
pub use error::{FeedErr, Result};

/// How often a joined device refreshes its pulse column.
pub const PULSE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);
