//! External process work items.

use std::path::{Path, PathBuf};

use shotdiff_tools::{process, ProcessOutcome, ProcessSpec};

use crate::engine::{Processor, WorkError, WorkItem};
use crate::runtime::LocalRuntime;

/// A subprocess run. `outcome` is filled in by the process pool.
///
/// A timeout kills the child and fails the item with `WorkError::Timeout`.
/// A non-zero exit is not an error at this level.
#[derive(Debug, Clone)]
pub struct ProcessItem {
    pub spec: ProcessSpec,
    /// Written, parent directories included, before the process starts.
    pub files: Vec<(PathBuf, String)>,
    pub outcome: Option<ProcessOutcome>,
}

impl ProcessItem {
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            files: Vec::new(),
            outcome: None,
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.files.push((path.into(), contents.into()));
        self
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.outcome.as_ref().map(|o| o.exit_code)
    }
}

impl WorkItem for ProcessItem {
    const KIND: &'static str = "process";
}

/// Process pool processor.
#[derive(Default)]
pub struct ProcessProcessor {
    runtime: LocalRuntime,
}

impl ProcessProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Processor for ProcessProcessor {
    type Item = ProcessItem;

    fn process(&mut self, item: &mut ProcessItem) -> Result<(), WorkError> {
        for (path, contents) in &item.files {
            write_file(path, contents)?;
        }
        tracing::debug!(argv = ?item.spec.argv, log = %item.spec.log_path.display(), "Running process");
        let outcome = self.runtime.block_on(process::run(&item.spec))??;
        tracing::debug!(exit_code = outcome.exit_code, duration_ms = outcome.duration_ms, "Process exited");
        item.outcome = Some(outcome);
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), WorkError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| WorkError::failed(format!("Failed to create {}: {}", parent.display(), e)))?;
    }
    std::fs::write(path, contents)
        .map_err(|e| WorkError::failed(format!("Failed to write {}: {}", path.display(), e)))
}
