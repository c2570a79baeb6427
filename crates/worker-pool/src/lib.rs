//! Shotdiff Worker
//!
//! Leases capture and diff tasks from the work queue and runs them.
//!
//! This crate provides:
//! - A cooperative task engine: workflows on one orchestrator thread,
//!   work items on fixed pools of OS threads
//! - Fetch, process and timer work items
//! - The remote queue poller with heartbeats and bounded finish retries
//! - Capture and diff task bodies

pub mod client;
pub mod config;
pub mod engine;
pub mod fetch;
pub mod poller;
pub mod process;
pub mod runtime;
pub mod tasks;

pub use config::{RetryPolicy, WorkerConfig};
pub use engine::{Context, Engine, Handle, Slot, WorkError, WorkItem, Workflow};
pub use poller::{PollerConfig, QueuePoller, TaskRunner};
