use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-org quotas
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Daily per-org budget limits. `None` = unlimited.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuotaConfig {
    #[serde(default)]
    pub default_daily_tasks: Option<u64>,
    #[serde(default)]
    pub default_daily_tokens: Option<u64>,
    /// Per-org overrides (key = org UUID).
    #[serde(default)]
    pub per_org: HashMap<Uuid, OrgQuota>,
    /// Orgs with the submission feature disabled entirely.
    #[serde(default)]
    pub disabled_orgs: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrgQuota {
    #[serde(default)]
    pub daily_tasks: Option<u64>,
    #[serde(default)]
    pub daily_tokens: Option<u64>,
}

impl QuotaConfig {
    /// Resolve effective limits for an org: overrides, then defaults.
    pub fn resolve(&self, org_id: Uuid) -> (Option<u64>, Option<u64>) {
        if let Some(q) = self.per_org.get(&org_id) {
            (
                q.daily_tasks.or(self.default_daily_tasks),
                q.daily_tokens.or(self.default_daily_tokens),
            )
        } else {
            (self.default_daily_tasks, self.default_daily_tokens)
        }
    }

    pub fn is_disabled(&self, org_id: Uuid) -> bool {
        self.disabled_orgs.contains(&org_id)
    }
}
