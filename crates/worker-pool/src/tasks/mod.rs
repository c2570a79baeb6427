//! Task bodies run by the worker for leased capture and diff tasks.

pub mod capture;
pub mod diff;

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use shotdiff_tools::FetchRequest;

use crate::config::WorkerConfig;
use crate::engine::{Context, WorkError};
use crate::fetch::FetchItem;
use crate::poller::Heartbeat;

pub use capture::{CapturePayload, CaptureReport, CaptureRunner};
pub use diff::{DiffPayload, DiffReport, DiffRunner};

/// Attempts before a failing capture or diff is retired.
pub const MAX_ATTEMPTS: i32 = 3;

/// Settings shared by the capture and diff runners.
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub command: Vec<String>,
    pub timeout: Duration,
    pub output_dir: PathBuf,
    pub report_url: Option<String>,
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
}

impl TaskSettings {
    pub fn capture(config: &WorkerConfig) -> Self {
        Self::with_command(config, config.capture_command.clone(), config.capture_timeout)
    }

    pub fn diff(config: &WorkerConfig) -> Self {
        Self::with_command(config, config.diff_command.clone(), config.diff_timeout)
    }

    fn with_command(config: &WorkerConfig, command: Vec<String>, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            output_dir: config.output_dir.clone(),
            report_url: config.report_url.clone(),
            heartbeat_interval: config.heartbeat_interval,
            request_timeout: config.request_timeout,
        }
    }

    /// Per-task scratch directory under `output_dir`. Nothing is created
    /// here; the process pool creates it when the first file lands in it.
    ///
    /// A task id that is not a single plain path component is rejected.
    pub fn work_dir(&self, task_id: &str) -> Result<PathBuf, WorkError> {
        let mut components = Path::new(task_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.output_dir.join(task_id)),
            _ => Err(WorkError::give_up(
                1,
                format!("Task id {:?} is not usable as a directory name", task_id),
            )),
        }
    }
}

/// Substitute `{name}` placeholders in every argument.
pub fn render_argv(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |arg, (name, value)| {
                arg.replace(&format!("{{{}}}", name), value)
            })
        })
        .collect()
}

pub(crate) fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Post a run outcome to the report URL, if one is configured.
pub(crate) async fn report<T: Serialize>(
    ctx: &Context,
    heartbeat: &Heartbeat,
    settings: &TaskSettings,
    outcome: &T,
) -> Result<(), WorkError> {
    heartbeat.beat(ctx, "Reporting");
    let Some(url) = settings.report_url.as_deref() else {
        return Ok(());
    };

    let request = FetchRequest::post_json(url, serde_json::to_value(outcome)?)
        .with_timeout(settings.request_timeout);
    let item = ctx.run(FetchItem::new(request)).await?;
    item.response()?.clone().error_for_status()?;
    Ok(())
}
