//! Perceptual diff of two screenshots.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shotdiff_tools::ProcessSpec;

use crate::client::LeasedTask;
use crate::engine::{Context, WorkError, Workflow};
use crate::poller::{run_with_heartbeats, Heartbeat, TaskRunner};
use crate::process::ProcessItem;

use super::{path_str, render_argv, report, TaskSettings, MAX_ATTEMPTS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffPayload {
    #[serde(default)]
    pub build_id: Option<i64>,

    #[serde(default)]
    pub release_name: Option<String>,

    pub run_name: String,

    /// Reference image path
    pub before: String,

    /// Candidate image path
    pub after: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    pub build_id: Option<i64>,
    pub release_name: Option<String>,
    pub run_name: String,
    /// Set only when the images differ
    pub diff: Option<String>,
    pub log: String,
    pub status: String,
}

pub struct DiffRunner {
    settings: Arc<TaskSettings>,
}

impl DiffRunner {
    pub fn new(settings: TaskSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

impl TaskRunner for DiffRunner {
    type Flow = DiffTask;

    fn workflow(&self, task: LeasedTask, heartbeat: Heartbeat) -> DiffTask {
        DiffTask {
            task,
            heartbeat,
            settings: Arc::clone(&self.settings),
        }
    }
}

pub struct DiffTask {
    task: LeasedTask,
    heartbeat: Heartbeat,
    settings: Arc<TaskSettings>,
}

impl Workflow for DiffTask {
    type Output = DiffReport;

    async fn run(self, ctx: Context) -> Result<DiffReport, WorkError> {
        let payload: DiffPayload = serde_json::from_str(&self.task.payload)
            .map_err(|e| WorkError::give_up(1, format!("Bad diff payload: {}", e)))?;

        let work_dir = self.settings.work_dir(&self.task.task_id)?;
        let diff = work_dir.join("diff.png");
        let log = work_dir.join("diff.log");

        let argv = render_argv(
            &self.settings.command,
            &[
                ("before", payload.before.as_str()),
                ("after", payload.after.as_str()),
                ("diff", path_str(&diff).as_str()),
            ],
        );
        let spec = ProcessSpec::new(argv, &log, self.settings.timeout);
        let process = run_with_heartbeats(
            &ctx,
            &self.heartbeat,
            ProcessItem::new(spec),
            self.settings.heartbeat_interval,
            "Diffing",
        )
        .await
        .map_err(|e| WorkError::give_up(MAX_ATTEMPTS, format!("Diff failed: {}", e)))?;

        let (status, diff) = match process.exit_code() {
            Some(0) => ("same", None),
            Some(1) => ("different", Some(path_str(&diff))),
            code => {
                return Err(WorkError::give_up(
                    MAX_ATTEMPTS,
                    format!("Diff exited with {:?}", code),
                ))
            }
        };

        let outcome = DiffReport {
            build_id: payload.build_id,
            release_name: payload.release_name,
            run_name: payload.run_name,
            diff,
            log: path_str(&log),
            status: status.to_string(),
        };
        report(&ctx, &self.heartbeat, &self.settings, &outcome).await?;

        tracing::info!(task_id = %self.task.task_id, status, "Diff complete");
        Ok(outcome)
    }
}
