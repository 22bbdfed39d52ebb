//! Task API endpoints — submit, inspect, approve/reject, cancel, and
//! stream lifecycle events.
//!
//! - `POST /v1/tasks`              — submit an intent
//! - `GET  /v1/tasks`              — list tasks (filter by org, status)
//! - `GET  /v1/tasks/:id`          — task + plan + scores + run state
//! - `POST /v1/tasks/:id/approve`  — approval signal (idempotent per actor)
//! - `POST /v1/tasks/:id/reject`   — rejection signal
//! - `POST /v1/tasks/:id/cancel`   — cancel any non-terminal task
//! - `GET  /v1/tasks/:id/events`   — SSE stream of task status changes

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::Stream;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use rf_domain::autonomy::AutonomyMode;
use rf_domain::task::{Environment, TaskStatus};
use rf_domain::Error;
use rf_workflow::{Signal, SignalKind};

use crate::pipeline;
use crate::state::AppState;
use crate::store::TaskEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub org_id: Uuid,
    /// Submitting user, for the audit trail.
    #[serde(default = "d_user")]
    pub user: String,
    pub intent: String,
    #[serde(default)]
    pub environment: Option<Environment>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub autonomy_override: Option<AutonomyMode>,
}

fn d_user() -> String {
    "anonymous".into()
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub org_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default = "d_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn d_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct SignalRequest {
    pub actor: String,
    #[serde(default)]
    pub reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskRequest>,
) -> Response {
    if body.intent.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "intent must not be empty");
    }

    match pipeline::submit(
        &state,
        body.org_id,
        &body.user,
        &body.intent,
        body.environment,
        body.dry_run,
        body.autonomy_override,
    ) {
        Ok(task) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "task_id": task.id,
                "status": task.status,
            })),
        )
            .into_response(),
        Err(e @ Error::QuotaExceeded { .. }) => {
            api_error(StatusCode::TOO_MANY_REQUESTS, e.to_string())
        }
        Err(e @ Error::FeatureDisabled(_)) => {
            api_error(StatusCode::PAYMENT_REQUIRED, e.to_string())
        }
        Err(e @ Error::RateLimited { .. }) => {
            api_error(StatusCode::TOO_MANY_REQUESTS, e.to_string())
        }
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(q): Query<ListTasksQuery>,
) -> impl IntoResponse {
    let limit = q.limit.min(200);
    let (tasks, total) = state.tasks.list(q.org_id, q.status, limit, q.offset);
    Json(serde_json::json!({
        "tasks": tasks,
        "total": total,
        "limit": limit,
        "offset": q.offset,
    }))
}

pub async fn get_task(State(state): State<AppState>, Path(task_id): Path<Uuid>) -> Response {
    let Some(task) = state.tasks.get(&task_id) else {
        return api_error(StatusCode::NOT_FOUND, "task not found");
    };

    let plan = task
        .plan_id
        .and_then(|id| state.plans.read().get(&id).cloned());
    let run = task.run_id.and_then(|id| state.engine.run_snapshot(&id));
    let invocations = state.invocations.for_task(&task_id).len();

    Json(serde_json::json!({
        "task": task,
        "plan": plan,
        "run": run,
        "invocation_count": invocations,
    }))
    .into_response()
}

pub async fn approve_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(body): Json<SignalRequest>,
) -> Response {
    signal_task(
        &state,
        task_id,
        &body.actor,
        "approve",
        SignalKind::Approve { actor: body.actor.clone() },
    )
}

pub async fn reject_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(body): Json<SignalRequest>,
) -> Response {
    signal_task(
        &state,
        task_id,
        &body.actor,
        "reject",
        SignalKind::Reject {
            actor: body.actor.clone(),
            reason: body.reason.clone(),
        },
    )
}

fn signal_task(
    state: &AppState,
    task_id: Uuid,
    actor: &str,
    action: &str,
    kind: SignalKind,
) -> Response {
    let Some(task) = state.tasks.get(&task_id) else {
        return api_error(StatusCode::NOT_FOUND, "task not found");
    };
    if task.status != TaskStatus::AwaitingApproval {
        return api_error(
            StatusCode::CONFLICT,
            format!("task is not awaiting approval (status: {:?})", task.status),
        );
    }
    let Some(run_id) = task.run_id else {
        return api_error(StatusCode::CONFLICT, "task has no active run yet");
    };

    if matches!(kind, SignalKind::Approve { .. }) {
        state.approvals.add(task_id, actor);
    }

    // Idempotent by (task, actor, action): repeated requests map to the
    // same signal id, which the engine deduplicates.
    let signal = Signal {
        id: signal_id(task_id, actor, action),
        kind,
    };
    let accepted = state.engine.signal(run_id, signal);

    Json(serde_json::json!({
        "task_id": task_id,
        "action": action,
        "accepted": accepted,
        "duplicate": !accepted,
    }))
    .into_response()
}

pub async fn cancel_task(State(state): State<AppState>, Path(task_id): Path<Uuid>) -> Response {
    let Some(task) = state.tasks.get(&task_id) else {
        return api_error(StatusCode::NOT_FOUND, "task not found");
    };
    if task.status.is_terminal() {
        return api_error(StatusCode::CONFLICT, "task is already in a terminal state");
    }

    match task.run_id {
        Some(run_id) => {
            state
                .engine
                .signal(run_id, Signal::new(SignalKind::Cancel));
        }
        None => {
            // Not yet executing: cancel the record directly.
            state.tasks.update(&task_id, |t| {
                t.finish(TaskStatus::Cancelled, "cancelled", "cancelled before planning finished");
            });
        }
    }

    Json(serde_json::json!({ "task_id": task_id, "cancelled": true })).into_response()
}

pub async fn task_events_sse(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Response {
    let Some(task) = state.tasks.get(&task_id) else {
        return api_error(StatusCode::NOT_FOUND, "task not found");
    };

    // Terminal tasks get a single snapshot event.
    if task.status.is_terminal() {
        let data = serde_json::to_string(&task).unwrap_or_default();
        let stream = futures_util::stream::once(async move {
            Ok::<_, std::convert::Infallible>(
                SseEvent::default().event("task.snapshot").data(data),
            )
        });
        return Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    }

    let rx = state.tasks.subscribe(&task_id);
    Sse::new(make_event_stream(rx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn make_event_stream(
    mut rx: tokio::sync::broadcast::Receiver<TaskEvent>,
) -> impl Stream<Item = Result<SseEvent, std::convert::Infallible>> {
    async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    yield Ok(SseEvent::default().event("task.status").data(data));

                    let TaskEvent::StatusChanged { status, .. } = &event;
                    if status.is_terminal() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    let msg = format!("{{\"warning\":\"missed {n} events\"}}");
                    yield Ok(SseEvent::default().event("warning").data(msg));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

/// Deterministic signal id for `(task, actor, action)` so redelivery of
/// the same request never double-applies.
fn signal_id(task_id: Uuid, actor: &str, action: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(task_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(actor.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(action.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}
