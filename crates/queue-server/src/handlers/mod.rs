//! HTTP handlers for the work queue API.

pub mod database;
pub mod health;
pub mod work_queue;

pub use health::{api_health, health_check};
