//! Lifecycle events published on the process-wide bus and delivered to
//! webhook subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "plan.validated")]
    PlanValidated,
    #[serde(rename = "approval.requested")]
    ApprovalRequested,
    #[serde(rename = "phase.started")]
    PhaseStarted,
    #[serde(rename = "canary.verdict")]
    CanaryVerdict,
    #[serde(rename = "rollback.initiated")]
    RollbackInitiated,
    #[serde(rename = "task.succeeded")]
    TaskSucceeded,
    #[serde(rename = "task.failed")]
    TaskFailed,
}

/// CloudEvents-shaped envelope carried by every published notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub specversion: String,
    pub org_id: Uuid,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(event_type: EventType, org_id: Uuid, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            source: "resilience-fabric/engine".into(),
            timestamp: Utc::now(),
            specversion: "1.0".into(),
            org_id,
            data,
        }
    }
}
