//! URL fetcher.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ToolError;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
#[allow(clippy::upper_case_acronyms)] // HTTP methods are conventionally uppercase
pub enum HttpMethod {
    #[default]
    GET,
    POST,
    PUT,
    DELETE,
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::GET => Method::GET,
            HttpMethod::POST => Method::POST,
            HttpMethod::PUT => Method::PUT,
            HttpMethod::DELETE => Method::DELETE,
        }
    }
}

/// A single request to perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,

    #[serde(default)]
    pub method: HttpMethod,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// JSON body, sent with `Content-Type: application/json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::GET,
            headers: HashMap::new(),
            json: None,
            timeout_ms: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: HttpMethod::POST,
            json: Some(body),
            ..Self::get(url)
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Status, headers and body of a completed request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ToolError> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Turn a non-2xx status into an error.
    ///
    /// 408, 429 and 5xx are transient; other statuses are fatal.
    pub fn error_for_status(self) -> Result<Self, ToolError> {
        if self.is_success() {
            return Ok(self);
        }
        let message = format!("HTTP {}: {}", self.status, truncate(&self.body, 200));
        if self.status == 408 || self.status == 429 || self.status >= 500 {
            Err(ToolError::Transient(message))
        } else {
            Err(ToolError::Http(message))
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Anything that can perform a [`FetchRequest`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request. Any HTTP status is a successful fetch; only
    /// transport failures are errors.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ToolError>;
}

/// [`Fetcher`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ToolError> {
        let method: Method = request.method.into();
        let mut builder = self.client.request(method, &request.url);

        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(json) = &request.json {
            builder = builder.json(json);
        }
        if let Some(ms) = request.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let body = response.text().await?;

        tracing::trace!(url = %request.url, status, "Fetched");

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> FetchResponse {
        FetchResponse {
            status,
            headers: HashMap::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_error_for_status_classification() {
        assert!(response(200, "{}").error_for_status().is_ok());
        assert!(response(503, "down").error_for_status().unwrap_err().is_transient());
        assert!(response(429, "slow").error_for_status().unwrap_err().is_transient());

        let err = response(404, r#"{"error":"missing"}"#).error_for_status().unwrap_err();
        assert!(matches!(err, ToolError::Http(ref m) if m.contains("404")));
    }

    #[test]
    fn test_json_body() {
        #[derive(Deserialize)]
        struct Body {
            task_id: String,
        }
        let body: Body = response(200, r#"{"task_id":"abc"}"#).json().unwrap();
        assert_eq!(body.task_id, "abc");
        assert!(response(200, "not json").json::<Body>().is_err());
    }

    #[test]
    fn test_request_builders() {
        let req = FetchRequest::post_json("http://localhost/x", serde_json::json!({"a": 1}))
            .with_timeout(Duration::from_secs(2))
            .with_header("X-Owner", "w1");
        assert_eq!(req.method, HttpMethod::POST);
        assert_eq!(req.timeout_ms, Some(2000));
        assert_eq!(req.headers.get("X-Owner").map(String::as_str), Some("w1"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let fetcher = HttpFetcher::new();
        let req = FetchRequest::get("http://127.0.0.1:1/").with_timeout(Duration::from_secs(2));
        let err = fetcher.fetch(&req).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
    }
}
