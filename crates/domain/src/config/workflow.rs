use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workflow engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Worker tasks pulling runs off the queue.
    #[serde(default = "d_workers")]
    pub workers: usize,
    /// Active (executing) runs allowed per org; submissions above this
    /// stay `pending` until capacity frees.
    #[serde(default = "d_max_active")]
    pub max_active_runs_per_org: usize,
    /// Retries for a failed rollback operation before the run is marked
    /// failed with the stack preserved.
    #[serde(default = "d_rollback_retries")]
    pub rollback_retries: u32,
    /// Activity retry budget for transient errors.
    #[serde(default = "d_activity_retries")]
    pub activity_retries: u32,
    /// Base backoff between activity retries, milliseconds.
    #[serde(default = "d_backoff_ms")]
    pub activity_backoff_ms: u64,
    /// Heartbeat interval for long activities, seconds.
    #[serde(default = "d_heartbeat")]
    pub heartbeat_secs: u64,
    /// Missed heartbeats before an activity is considered suspect.
    #[serde(default = "d_missed_beats")]
    pub missed_heartbeats: u32,
    /// Abandon pending work immediately on cancel instead of rolling back.
    #[serde(default)]
    pub cancel_fast: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            workers: d_workers(),
            max_active_runs_per_org: d_max_active(),
            rollback_retries: d_rollback_retries(),
            activity_retries: d_activity_retries(),
            activity_backoff_ms: d_backoff_ms(),
            heartbeat_secs: d_heartbeat(),
            missed_heartbeats: d_missed_beats(),
            cancel_fast: false,
        }
    }
}

fn d_workers() -> usize {
    4
}

fn d_max_active() -> usize {
    8
}

fn d_rollback_retries() -> u32 {
    3
}

fn d_activity_retries() -> u32 {
    4
}

fn d_backoff_ms() -> u64 {
    500
}

fn d_heartbeat() -> u64 {
    15
}

fn d_missed_beats() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = WorkflowConfig::default();
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.max_active_runs_per_org, 8);
        assert_eq!(cfg.rollback_retries, 3);
        assert!(!cfg.cancel_fast);
    }
}
