//! HTTP command surface: the chat layer (or anything else) drives the
//! controller through these routes and receives progress through the sink.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use mcwake_lifecycle::{OperationId, ProgressPhase};
use serde::Serialize;
use tokio_util::task::TaskTracker;

use crate::controller::{LifecycleController, StatusReport};
use crate::error::{ErrorKind, LifecycleError};
use crate::progress::ProgressSink;
use crate::state::LifecycleSnapshot;

#[derive(Clone)]
pub struct AppState {
    pub controller: LifecycleController,
    pub sink: Arc<dyn ProgressSink>,
    pub tasks: TaskTracker,
}

impl AppState {
    pub fn new(controller: LifecycleController, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            controller,
            sink,
            tasks: TaskTracker::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: ErrorKind,
    message: String,
}

fn lifecycle_error(err: LifecycleError) -> Response {
    let code = match err.kind() {
        ErrorKind::ControlPlaneUnavailable | ErrorKind::MalformedResponse => StatusCode::BAD_GATEWAY,
        ErrorKind::StartTimeout | ErrorKind::StopTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Unreachable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        code,
        Json(ErrorBody {
            kind: err.kind(),
            message: err.to_string(),
        }),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct Accepted {
    operation: OperationId,
    phase: ProgressPhase,
}

async fn start(State(state): State<AppState>) -> (StatusCode, Json<Accepted>) {
    let op = OperationId::new();
    let controller = state.controller.clone();
    let sink = state.sink.clone();
    let task_op = op.clone();
    state.tasks.spawn(async move {
        // Outcome reaches the caller through the sink.
        let _ = controller.start(&task_op, sink).await;
    });
    (
        StatusCode::ACCEPTED,
        Json(Accepted {
            operation: op,
            phase: ProgressPhase::Deferred,
        }),
    )
}

async fn stop(State(state): State<AppState>) -> (StatusCode, Json<Accepted>) {
    let op = OperationId::new();
    let controller = state.controller.clone();
    let sink = state.sink.clone();
    let task_op = op.clone();
    state.tasks.spawn(async move {
        let _ = controller.stop(&task_op, sink).await;
    });
    (
        StatusCode::ACCEPTED,
        Json(Accepted {
            operation: op,
            phase: ProgressPhase::Deferred,
        }),
    )
}

#[derive(Debug, Serialize)]
struct StatusBody {
    text: String,
    report: StatusReport,
    controller: LifecycleSnapshot,
    watchdog_target: Option<String>,
}

async fn status(State(state): State<AppState>) -> Response {
    let op = OperationId::new();
    match state.controller.query_status(&op).await {
        Ok(report) => Json(StatusBody {
            text: report.render(),
            report,
            controller: state.controller.state().snapshot(),
            watchdog_target: state.controller.watchdog_target(),
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(op_id = %op, error = %e, "status query failed");
            lifecycle_error(e)
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
    version: &'static str,
}

async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/start", post(start))
        .route("/v1/stop", post(stop))
        .route("/v1/status", get(status))
        .with_state(state)
}
