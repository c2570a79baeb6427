//! Remote work queue client.

pub mod queue;

pub use queue::{LeasedTask, QueueRequests};
