//! SQL for the work queue table.

pub mod task;
