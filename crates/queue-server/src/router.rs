//! Route table for the work queue server.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the application router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::api_health))
        .with_state(state.clone());

    let work_queue_routes = Router::new()
        .route("/work_queue/{queue}", get(handlers::work_queue::list))
        .route("/work_queue/{queue}/add", post(handlers::work_queue::add))
        .route("/work_queue/{queue}/lease", post(handlers::work_queue::lease))
        .route(
            "/work_queue/{queue}/heartbeat",
            post(handlers::work_queue::heartbeat),
        )
        .route("/work_queue/{queue}/finish", post(handlers::work_queue::finish))
        .route("/work_queue/{queue}/cancel", post(handlers::work_queue::cancel))
        .route(
            "/work_queue/{queue}/task/{task_id}",
            get(handlers::work_queue::get),
        )
        .with_state(state.queue.clone());

    let database_routes = Router::new()
        .route("/api/db/init", post(handlers::database::init_database))
        .route(
            "/api/db/validate",
            get(handlers::database::validate_database),
        )
        .with_state(state);

    Router::new()
        .merge(health_routes)
        .merge(work_queue_routes)
        .merge(database_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
