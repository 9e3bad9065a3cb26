//! HTTP routes over the pool manager.
//!
//! Routes: `GET /query` (optional `sql` parameter, otherwise the default
//! query), `POST /query` (body is the query), `GET /health`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::ExecStage;
use crate::manager::PoolManager;
use crate::provisioner::Provisioner;

/// Shared state threaded through all axum handlers.
pub struct AppState<P: Provisioner> {
    pub manager: Arc<PoolManager<P>>,
    /// Query run by `GET /query` without a `sql` parameter.
    pub default_query: Arc<str>,
}

impl<P: Provisioner> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            default_query: Arc::clone(&self.default_query),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    sql: Option<String>,
}

/// Builds the axum `Router` with all routes.
pub fn build_router<P: Provisioner>(state: AppState<P>) -> Router {
    Router::new()
        .route("/query", get(handle_get_query::<P>).post(handle_post_query::<P>))
        .route("/health", get(handle_health::<P>))
        .with_state(state)
}

async fn handle_health<P: Provisioner>(State(state): State<AppState<P>>) -> Response {
    let status = if state.manager.is_shutting_down() {
        "shutting down"
    } else {
        "ok"
    };
    Json(json!({"status": status, "idle": state.manager.idle_count()})).into_response()
}

async fn handle_get_query<P: Provisioner>(
    State(state): State<AppState<P>>,
    Query(params): Query<QueryParams>,
) -> Response {
    let sql = params
        .sql
        .unwrap_or_else(|| state.default_query.to_string());
    run(&state, &sql).await
}

async fn handle_post_query<P: Provisioner>(
    State(state): State<AppState<P>>,
    body: String,
) -> Response {
    run(&state, &body).await
}

fn shutting_down() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"error": "shutting down"})),
    )
        .into_response()
}

async fn run<P: Provisioner>(state: &AppState<P>, sql: &str) -> Response {
    if state.manager.is_shutting_down() {
        return shutting_down();
    }

    match state.manager.execute_query(sql).await {
        Ok(result) => Json(result).into_response(),
        // The pool was drained while this request waited for an instance.
        Err(err) if err.stage() == ExecStage::Unavailable => shutting_down(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": err.to_string(),
                "stage": err.stage().as_str(),
                "code": err.code(),
            })),
        )
            .into_response(),
    }
}
