//! Service layer for the work queue.
//!
//! Services validate requests, stamp them with the clock and hand them to
//! the configured [`TaskStore`](crate::store::TaskStore).

pub mod work_queue;

pub use work_queue::WorkQueueService;
