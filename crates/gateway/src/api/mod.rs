//! HTTP surface. Everything under `/v1` sits behind bearer-token auth;
//! `/healthz` is open for probes.

pub mod auth;
pub mod registry;
pub mod tasks;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/tasks", post(tasks::create_task).get(tasks::list_tasks))
        .route("/v1/tasks/:id", get(tasks::get_task))
        .route("/v1/tasks/:id/approve", post(tasks::approve_task))
        .route("/v1/tasks/:id/reject", post(tasks::reject_task))
        .route("/v1/tasks/:id/cancel", post(tasks::cancel_task))
        .route("/v1/tasks/:id/events", get(tasks::task_events_sse))
        .route("/v1/tools", get(registry::list_tools))
        .route("/v1/agents", get(registry::list_agents))
        .route("/v1/breakers", get(registry::list_breakers))
        .route("/v1/quotas", get(registry::list_quotas))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_token,
        ));

    Router::new()
        .route("/healthz", get(registry::healthz))
        .merge(protected)
        .with_state(state)
}
