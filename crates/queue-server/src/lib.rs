//! Shotdiff Work Queue
//!
//! A durable, lease-based task queue. Producers `add` tasks; workers
//! `lease` batches, `heartbeat` while they work and `finish` when done.
//! A lease that runs out without a finish makes the task leasable again,
//! which is the only crash-recovery mechanism.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`lease`]: The lease/heartbeat/finish rules shared by every store
//! - [`store`]: Postgres and in-memory task stores
//! - [`services`]: Request validation and logging around a store
//! - [`handlers`] / [`router`]: The HTTP surface
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use shotdiff_queue::{clock::SystemClock, config::AppConfig, router::build_router,
//!     services::WorkQueueService, state::AppState, store::MemoryTaskStore};
//!
//! let service = WorkQueueService::new(Arc::new(MemoryTaskStore::new()), Arc::new(SystemClock));
//! let app = build_router(AppState::new(service, None, AppConfig::default()));
//! ```

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod lease;
pub mod result_ext;
pub mod router;
pub mod services;
pub mod state;
pub mod store;

pub use error::{AppError, AppResult};
pub use result_ext::ResultExt;
