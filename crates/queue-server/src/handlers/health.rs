//! Health check endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiHealthResponse {
    /// "ok" or "unhealthy"
    pub status: String,

    /// Backend name, "postgres" or "memory"
    pub store: String,

    /// "connected" or "disconnected"
    pub store_status: String,

    pub server_name: String,

    pub uptime_seconds: u64,

    pub version: String,
}

/// `GET /health`
///
/// Cheap liveness probe for load balancers.
pub async fn health_check() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "ok".to_string(),
    })
}

/// `GET /api/health`
///
/// Returns 503 when the task store cannot be reached.
pub async fn api_health(State(state): State<AppState>) -> (StatusCode, Json<ApiHealthResponse>) {
    let healthy = state.queue.store_healthy().await;

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = ApiHealthResponse {
        status: if healthy { "ok" } else { "unhealthy" }.to_string(),
        store: state.queue.store_kind().to_string(),
        store_status: if healthy { "connected" } else { "disconnected" }.to_string(),
        server_name: state.config.server_name.clone(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check().await;
        assert_eq!(response.status, "ok");
    }
}
