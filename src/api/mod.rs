//! REST surface: CRUD for workflows, configs, the config store, and the
//! four trigger tables (each CRUD side-effecting its live supervisor),
//! execution endpoints with SSE debug streaming, and the `/in/*` catch-all
//! that feeds the HTTP-In dispatcher.

pub mod config_store;
pub mod configs;
pub mod email_triggers;
pub mod executions;
pub mod http_in;
pub mod schedules;
pub mod subscriptions;
pub mod workflows;

use axum::http::StatusCode;
use axum::routing::{any, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::store::StoreError;
use crate::triggers::{
    email_poller::EmailPoller, redis_subscriber::RedisSubscriber, scheduler::CronScheduler,
};

/// Everything the handlers need; cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub scheduler: CronScheduler,
    pub subscriber: RedisSubscriber,
    pub poller: EmailPoller,
}

pub(crate) type ApiError = (StatusCode, String);
pub(crate) type ApiResult<T> = Result<T, ApiError>;

pub(crate) fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

pub(crate) fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, msg.into())
}

pub(crate) fn internal(msg: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, msg.to_string())
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        // Workflow CRUD + import/export
        .route("/workflows", get(workflows::list).post(workflows::create))
        .route(
            "/workflows/:id",
            get(workflows::get_by_id).put(workflows::update).delete(workflows::delete),
        )
        .route("/workflows/:id/export", get(workflows::export))
        .route("/workflows/import", post(workflows::import))
        // Execution
        .route("/workflows/:id/execute", post(executions::execute))
        .route("/workflows/:id/execute/debug", post(executions::execute_debug))
        .route("/workflows/:id/executions", get(executions::list_by_workflow))
        .route("/executions/:id", get(executions::get_by_id))
        .route("/executions/:id/logs", get(executions::logs))
        .route("/stats/executions", get(executions::stats))
        // Node configs
        .route("/configs", get(configs::list).post(configs::create))
        .route(
            "/configs/:id",
            get(configs::get_by_id).put(configs::update).delete(configs::delete),
        )
        // Config store (masked list by default; /full exposes values)
        .route("/config-store", get(config_store::list).post(config_store::set).put(config_store::set))
        .route("/config-store/full", get(config_store::list_full))
        .route("/config-store/:key", get(config_store::get_entry).delete(config_store::delete))
        // Cron schedules
        .route("/schedules", get(schedules::list).post(schedules::create))
        .route(
            "/schedules/:id",
            get(schedules::get_by_id).put(schedules::update).delete(schedules::delete),
        )
        // Redis subscriptions
        .route("/redis-subscriptions", get(subscriptions::list).post(subscriptions::create))
        .route(
            "/redis-subscriptions/:id",
            get(subscriptions::get_by_id).put(subscriptions::update).delete(subscriptions::delete),
        )
        // Email triggers
        .route("/email-triggers", get(email_triggers::list).post(email_triggers::create))
        .route(
            "/email-triggers/:id",
            get(email_triggers::get_by_id).put(email_triggers::update).delete(email_triggers::delete),
        )
        // HTTP triggers + the inbound catch-all
        .route("/http-triggers", get(http_in::list).post(http_in::create))
        .route(
            "/http-triggers/:id",
            get(http_in::get_by_id).put(http_in::update).delete(http_in::delete),
        )
        .route("/in/*path", any(http_in::dispatch));

    Router::new()
        .nest("/api", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
