//! Shared fixtures: a fetcher that serves queue requests from an in-process
//! router over the in-memory store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::Request;
use axum::Router;
use chrono::Duration as ChronoDuration;
use serde_json::Value;
use tower::ServiceExt;

use shotdiff_queue::clock::ManualClock;
use shotdiff_queue::config::AppConfig;
use shotdiff_queue::db::models::{AddTaskRequest, LeaseRequest};
use shotdiff_queue::router::build_router;
use shotdiff_queue::services::WorkQueueService;
use shotdiff_queue::state::AppState;
use shotdiff_queue::store::MemoryTaskStore;
use shotdiff_tools::{FetchRequest, FetchResponse, Fetcher, HttpMethod, ToolError};
use shotdiff_worker::client::{LeasedTask, QueueRequests};
use shotdiff_worker::engine::Engine;
use shotdiff_worker::fetch::FetchProcessor;
use shotdiff_worker::process::ProcessProcessor;

pub const SERVER_URL: &str = "http://queue.test";
pub const OWNER: &str = "worker-test";

/// One request seen by the fake queue.
#[derive(Debug, Clone)]
pub struct Call {
    pub path: String,
    pub body: Value,
    pub status: u16,
}

#[derive(Clone)]
pub struct RouterFetcher {
    app: Router,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl RouterFetcher {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, action: &str) -> Vec<Call> {
        let suffix = format!("/{}", action);
        self.calls()
            .into_iter()
            .filter(|c| c.path.ends_with(&suffix))
            .collect()
    }
}

#[async_trait]
impl Fetcher for RouterFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ToolError> {
        let path = request
            .url
            .strip_prefix(SERVER_URL)
            .unwrap_or(&request.url)
            .to_string();
        let method = match request.method {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::DELETE => "DELETE",
        };
        let body = match &request.json {
            Some(json) => Body::from(json.to_string()),
            None => Body::empty(),
        };
        let http = Request::builder()
            .method(method)
            .uri(&path)
            .header("content-type", "application/json")
            .body(body)
            .map_err(|e| ToolError::Http(e.to_string()))?;

        let response = self
            .app
            .clone()
            .oneshot(http)
            .await
            .map_err(|e| ToolError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| ToolError::Http(e.to_string()))?;

        self.calls.lock().unwrap().push(Call {
            path,
            body: request.json.clone().unwrap_or(Value::Null),
            status,
        });

        Ok(FetchResponse {
            status,
            headers: HashMap::new(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

pub struct Harness {
    pub service: WorkQueueService,
    pub clock: Arc<ManualClock>,
    pub fetcher: RouterFetcher,
    pub engine: Engine,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::default());
        let service = WorkQueueService::new(Arc::new(MemoryTaskStore::new()), clock.clone());
        let app = build_router(AppState::new(service.clone(), None, AppConfig::default()));
        let fetcher = RouterFetcher {
            app,
            calls: Arc::new(Mutex::new(Vec::new())),
        };

        let pool_fetcher = fetcher.clone();
        let engine = Engine::builder()
            .pool(2, move || FetchProcessor::new(pool_fetcher.clone()))
            .pool(1, ProcessProcessor::new)
            .timer_pool()
            .build()
            .unwrap();

        Self {
            service,
            clock,
            fetcher,
            engine,
        }
    }

    pub fn requests(&self, queue: &str) -> QueueRequests {
        QueueRequests::new(SERVER_URL, queue, Duration::from_secs(5))
    }

    pub async fn add(&self, queue: &str, payload: &str) -> String {
        self.service
            .add(
                queue,
                AddTaskRequest {
                    payload: payload.to_string(),
                    source: "test".to_string(),
                    task_id: None,
                    content_type: "application/json".to_string(),
                },
            )
            .await
            .unwrap()
            .task_id
    }

    /// Lease the only task on `queue` `times` times, letting each lease
    /// expire before the next, and return the last lease.
    pub async fn lease_repeatedly(&self, queue: &str, times: usize) -> LeasedTask {
        let mut last = None;
        for n in 0..times {
            if n > 0 {
                self.clock.advance(ChronoDuration::seconds(61));
            }
            let mut leased = self
                .service
                .lease(
                    queue,
                    LeaseRequest {
                        owner: OWNER.to_string(),
                        count: 1,
                        timeout: 60.0,
                    },
                )
                .await
                .unwrap()
                .tasks;
            assert_eq!(leased.len(), 1);
            last = leased.pop();
        }
        let task = last.unwrap();
        serde_json::from_value(serde_json::to_value(task).unwrap()).unwrap()
    }
}

/// A leased task that the queue has never seen.
pub fn detached_task(task_id: &str, payload: &str) -> LeasedTask {
    let now = chrono::Utc::now();
    LeasedTask {
        task_id: task_id.to_string(),
        eta: now,
        source: "test".to_string(),
        created: now,
        lease_attempts: 1,
        payload: payload.to_string(),
        content_type: "application/json".to_string(),
    }
}
