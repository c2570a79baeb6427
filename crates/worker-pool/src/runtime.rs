//! Per-thread tokio runtime for pool processors that call async tools.

use std::future::Future;

use tokio::runtime::{Builder, Runtime};

use crate::engine::WorkError;

/// Lazily built current-thread runtime owned by one pool thread.
#[derive(Default)]
pub struct LocalRuntime {
    runtime: Option<Runtime>,
}

impl LocalRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive `future` to completion on this thread.
    pub fn block_on<F: Future>(&mut self, future: F) -> Result<F::Output, WorkError> {
        if self.runtime.is_none() {
            let runtime = Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| WorkError::failed(format!("Failed to build runtime: {}", e)))?;
            self.runtime = Some(runtime);
        }
        match &self.runtime {
            Some(runtime) => Ok(runtime.block_on(future)),
            None => Err(WorkError::failed("Runtime unavailable")),
        }
    }
}
