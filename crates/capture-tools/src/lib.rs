//! Shotdiff Tool Library
//!
//! Narrow collaborator contracts used by capture and diff task bodies.
//!
//! This crate provides:
//! - External process runner with a log file and a wall-clock timeout
//! - URL fetcher with transient/fatal error classification

pub mod error;
pub mod fetch;
pub mod process;

pub use error::ToolError;
pub use fetch::{FetchRequest, FetchResponse, Fetcher, HttpFetcher, HttpMethod};
pub use process::{ProcessOutcome, ProcessSpec};
