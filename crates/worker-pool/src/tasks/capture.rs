//! Screenshot capture.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shotdiff_tools::{FetchRequest, ProcessSpec};

use crate::client::LeasedTask;
use crate::engine::{Context, WorkError, Workflow};
use crate::fetch::FetchItem;
use crate::poller::{run_with_heartbeats, Heartbeat, TaskRunner};
use crate::process::ProcessItem;

use super::{path_str, render_argv, report, TaskSettings, MAX_ATTEMPTS};

/// Payload of a capture task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturePayload {
    #[serde(default)]
    pub build_id: Option<i64>,

    #[serde(default)]
    pub release_name: Option<String>,

    pub run_name: String,

    pub url: String,

    /// Inline capture config
    #[serde(default)]
    pub config: Option<serde_json::Value>,

    /// Capture config fetched before capturing
    #[serde(default)]
    pub config_url: Option<String>,
}

/// Outcome posted to the report URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureReport {
    pub build_id: Option<i64>,
    pub release_name: Option<String>,
    pub run_name: String,
    pub url: String,
    pub image: String,
    pub log: String,
    pub status: String,
}

pub struct CaptureRunner {
    settings: Arc<TaskSettings>,
}

impl CaptureRunner {
    pub fn new(settings: TaskSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

impl TaskRunner for CaptureRunner {
    type Flow = CaptureTask;

    fn workflow(&self, task: LeasedTask, heartbeat: Heartbeat) -> CaptureTask {
        CaptureTask {
            task,
            heartbeat,
            settings: Arc::clone(&self.settings),
        }
    }
}

pub struct CaptureTask {
    task: LeasedTask,
    heartbeat: Heartbeat,
    settings: Arc<TaskSettings>,
}

impl CaptureTask {
    async fn fetch_config(&self, ctx: &Context, payload: &CapturePayload) -> Result<String, WorkError> {
        self.heartbeat.beat(ctx, "Fetching");
        match (&payload.config_url, &payload.config) {
            (Some(url), _) => {
                let request = FetchRequest::get(url).with_timeout(self.settings.request_timeout);
                let item = ctx.run(FetchItem::new(request)).await?;
                let response = item.response()?.clone().error_for_status()?;
                Ok(response.body)
            }
            (None, Some(config)) => Ok(config.to_string()),
            (None, None) => Ok("{}".to_string()),
        }
    }
}

impl Workflow for CaptureTask {
    type Output = CaptureReport;

    async fn run(self, ctx: Context) -> Result<CaptureReport, WorkError> {
        let payload: CapturePayload = serde_json::from_str(&self.task.payload)
            .map_err(|e| WorkError::give_up(1, format!("Bad capture payload: {}", e)))?;

        let config = self.fetch_config(&ctx, &payload).await?;

        let work_dir = self.settings.work_dir(&self.task.task_id)?;
        let config_path = work_dir.join("config.json");
        let image = work_dir.join("screenshot.png");
        let log = work_dir.join("capture.log");

        let argv = render_argv(
            &self.settings.command,
            &[
                ("url", payload.url.as_str()),
                ("output", path_str(&image).as_str()),
                ("config", path_str(&config_path).as_str()),
            ],
        );
        let spec = ProcessSpec::new(argv, &log, self.settings.timeout);
        let process = run_with_heartbeats(
            &ctx,
            &self.heartbeat,
            ProcessItem::new(spec).with_file(&config_path, config),
            self.settings.heartbeat_interval,
            "Capturing",
        )
        .await
        .map_err(|e| WorkError::give_up(MAX_ATTEMPTS, format!("Capture failed: {}", e)))?;

        match process.exit_code() {
            Some(0) => {}
            code => {
                return Err(WorkError::give_up(
                    MAX_ATTEMPTS,
                    format!("Capture exited with {:?}", code),
                ))
            }
        }

        let outcome = CaptureReport {
            build_id: payload.build_id,
            release_name: payload.release_name,
            run_name: payload.run_name,
            url: payload.url,
            image: path_str(&image),
            log: path_str(&log),
            status: "captured".to_string(),
        };
        report(&ctx, &self.heartbeat, &self.settings, &outcome).await?;

        tracing::info!(task_id = %self.task.task_id, run_name = %outcome.run_name, "Capture complete");
        Ok(outcome)
    }
}
