//! Per-org tenancy guard: daily task and token quotas, enforced on
//! every submission. Counters are sharded by org and reset when the UTC
//! date rolls over.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use rf_domain::config::QuotaConfig;
use rf_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct DailyUsage {
    date: NaiveDate,
    tasks: u64,
    tokens: u64,
}

/// Snapshot of one org's usage against its limits.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub org_id: Uuid,
    pub date: String,
    pub tasks_used: u64,
    pub tasks_limit: Option<u64>,
    pub tokens_used: u64,
    pub tokens_limit: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TenantGuard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TenantGuard {
    config: QuotaConfig,
    usage: RwLock<HashMap<Uuid, DailyUsage>>,
}

impl TenantGuard {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            usage: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Admit a task submission for the org, counting it on success.
    pub fn admit_task(&self, org_id: Uuid) -> Result<()> {
        if self.config.is_disabled(org_id) {
            return Err(Error::FeatureDisabled(format!(
                "task submission is disabled for org {org_id}"
            )));
        }

        let (task_limit, _) = self.config.resolve(org_id);
        let today = Utc::now().date_naive();

        let mut usage = self.usage.write();
        let entry = usage.entry(org_id).or_insert(DailyUsage {
            date: today,
            tasks: 0,
            tokens: 0,
        });
        if entry.date != today {
            entry.date = today;
            entry.tasks = 0;
            entry.tokens = 0;
        }

        if let Some(limit) = task_limit {
            if entry.tasks >= limit {
                return Err(Error::QuotaExceeded {
                    kind: "tasks",
                    used: entry.tasks,
                    limit,
                });
            }
        }

        entry.tasks += 1;
        Ok(())
    }

    /// Record LLM token consumption and enforce the token ceiling.
    pub fn record_tokens(&self, org_id: Uuid, tokens: u64) -> Result<()> {
        let (_, token_limit) = self.config.resolve(org_id);
        let today = Utc::now().date_naive();

        let mut usage = self.usage.write();
        let entry = usage.entry(org_id).or_insert(DailyUsage {
            date: today,
            tasks: 0,
            tokens: 0,
        });
        if entry.date != today {
            entry.date = today;
            entry.tasks = 0;
            entry.tokens = 0;
        }
        entry.tokens += tokens;

        if let Some(limit) = token_limit {
            if entry.tokens > limit {
                return Err(Error::QuotaExceeded {
                    kind: "tokens",
                    used: entry.tokens,
                    limit,
                });
            }
        }
        Ok(())
    }

    /// Usage snapshot for every org seen today, sorted by org id.
    pub fn snapshot(&self) -> Vec<QuotaStatus> {
        let today = Utc::now().date_naive();
        let date_str = today.to_string();
        let usage = self.usage.read();

        let mut result: Vec<QuotaStatus> = usage
            .iter()
            .filter(|(_, u)| u.date == today)
            .map(|(org_id, u)| {
                let (tasks_limit, tokens_limit) = self.config.resolve(*org_id);
                QuotaStatus {
                    org_id: *org_id,
                    date: date_str.clone(),
                    tasks_used: u.tasks,
                    tasks_limit,
                    tokens_used: u.tokens,
                    tokens_limit,
                }
            })
            .collect();
        result.sort_by_key(|s| s.org_id);
        result
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
