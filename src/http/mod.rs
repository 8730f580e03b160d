//! JSON over HTTP.
//!
//! Thin axum layer over [`Engine`]. The caller is named by the `x-user-id`
//! header and resolved through the engine's user directory; every error
//! comes back as `{"error": {"kind", "message"}}`.

pub mod error;
pub mod handlers;

use std::time::Instant;

use axum::extract::{FromRequestParts, MatchedPath, Request};
use axum::http::request::Parts;
use axum::middleware::{Next, from_fn};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use opentelemetry::KeyValue;
use tokio::net::TcpListener;
use tracing::info;

use crate::engine::Engine;
use crate::model::{CurrentUser, UserId};
use crate::telemetry::metrics;

pub use error::ApiError;

pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

/// The authenticated caller.
pub struct Caller(pub CurrentUser);

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| ApiError::unauthenticated(format!("missing {USER_HEADER} header")))?;
        let id = raw
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| ApiError::unauthenticated(format!("bad {USER_HEADER} header")))?;
        let user = state.engine.user(UserId(id))?;
        Ok(Caller(user))
    }
}

pub fn router(engine: Engine) -> Router {
    let state = AppState { engine };
    Router::new()
        .route("/session/start", post(handlers::session_start))
        .route("/session/pause", post(handlers::session_pause))
        .route("/session/resume", post(handlers::session_resume))
        .route("/session/stop", post(handlers::session_stop))
        .route("/queue/enqueue", post(handlers::queue_enqueue))
        .route("/queue/decide", post(handlers::queue_decide))
        .route("/queue/unlock", post(handlers::queue_unlock))
        .route("/queue/state", get(handlers::queue_state))
        .route("/task/assign", post(handlers::task_assign))
        .route("/task/state", get(handlers::task_state))
        .route("/task/link/start", post(handlers::link_start))
        .route("/task/link/complete", post(handlers::link_complete))
        .route("/task/link/reload", post(handlers::link_reload))
        .route("/task/subtask/complete", post(handlers::subtask_complete))
        .route("/task/clicker/complete", post(handlers::clicker_complete))
        .route("/task/final/complete", post(handlers::final_complete))
        .route("/evidence", post(handlers::evidence_upload))
        .route("/gate/state", get(handlers::gate_state))
        .route("/gate/verify", post(handlers::gate_verify))
        .route("/attendance/mark", post(handlers::attendance_mark))
        .route("/attendance/approve", post(handlers::attendance_approve))
        .route("/attendance/reject", post(handlers::attendance_reject))
        .route("/performance/mark", post(handlers::performance_mark))
        .route("/health", get(handlers::health))
        .route_layer(from_fn(track_duration))
        .with_state(state)
}

/// Serve until the listener fails or the task is cancelled.
pub async fn serve(listener: TcpListener, engine: Engine) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "http surface listening");
    }
    axum::serve(listener, router(engine)).await
}

async fn track_duration(req: Request, next: Next) -> Response {
    let operation = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let started = Instant::now();
    let response = next.run(req).await;
    metrics::operation_duration_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[
            KeyValue::new("operation", operation),
            KeyValue::new("status", i64::from(response.status().as_u16())),
        ],
    );
    response
}
