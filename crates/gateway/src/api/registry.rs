//! Read-only introspection endpoints: tool and agent catalogs, breaker
//! states, per-org quota usage, and liveness.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// `GET /v1/tools`
pub async fn list_tools(State(state): State<AppState>) -> impl IntoResponse {
    let tools = state.tools.list();
    Json(serde_json::json!({
        "total": tools.len(),
        "tools": tools,
    }))
}

/// `GET /v1/agents`
pub async fn list_agents(State(state): State<AppState>) -> impl IntoResponse {
    let agents = state.agents.list();
    Json(serde_json::json!({
        "total": agents.len(),
        "agents": agents,
    }))
}

/// `GET /v1/breakers`
pub async fn list_breakers(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "breakers": state.breakers.snapshot() }))
}

/// `GET /v1/quotas`
pub async fn list_quotas(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "quotas": state.tenants.snapshot() }))
}

/// `GET /healthz`
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let provider_errors: Vec<serde_json::Value> = state
        .providers
        .init_errors()
        .iter()
        .map(|e| {
            serde_json::json!({
                "provider_id": e.provider_id,
                "kind": e.kind,
                "error": e.error,
            })
        })
        .collect();

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": state.providers.list_providers(),
        "provider_init_errors": provider_errors,
        "tools": state.tools.len(),
        "agents": state.agents.len(),
    }))
}
