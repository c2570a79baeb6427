//! Configuration for the work queue server.
//!
//! Loaded from environment variables with `envy`.

mod app;
mod database;

pub use app::{AppConfig, StoreKind};
pub use database::DatabaseConfig;
