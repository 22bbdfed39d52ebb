//! Append-only tool invocation log: the audit trail of every side effect.
//!
//! Records are appended to a JSONL file and kept in a bounded in-memory
//! ring for fast queries. Nothing is ever updated in place.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use uuid::Uuid;

use rf_domain::tool::ToolInvocation;

const MAX_IN_MEMORY: usize = 5_000;

pub struct InvocationLog {
    inner: RwLock<VecDeque<ToolInvocation>>,
    log_path: PathBuf,
}

impl InvocationLog {
    /// Open the log, loading the most recent records from disk.
    pub fn new(state_path: &Path) -> Self {
        let dir = state_path.join("invocations");
        std::fs::create_dir_all(&dir).ok();
        let log_path = dir.join("invocations.jsonl");

        let mut ring = VecDeque::new();
        if let Ok(content) = std::fs::read_to_string(&log_path) {
            let lines: Vec<&str> = content.lines().collect();
            for line in lines.iter().rev().take(MAX_IN_MEMORY) {
                if let Ok(record) = serde_json::from_str::<ToolInvocation>(line) {
                    ring.push_front(record);
                }
            }
        }

        Self {
            inner: RwLock::new(ring),
            log_path,
        }
    }

    /// Append a record: persist first, then admit to the ring.
    pub fn append(&self, record: ToolInvocation) {
        if let Ok(json) = serde_json::to_string(&record) {
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)
            {
                let _ = writeln!(file, "{json}");
            }
        }

        let mut inner = self.inner.write();
        inner.push_back(record);
        while inner.len() > MAX_IN_MEMORY {
            inner.pop_front();
        }
    }

    /// Records for a task, oldest first.
    pub fn for_task(&self, task_id: &Uuid) -> Vec<ToolInvocation> {
        self.inner
            .read()
            .iter()
            .filter(|r| r.task_id == *task_id)
            .cloned()
            .collect()
    }

    /// Records for a run, oldest first.
    pub fn for_run(&self, run_id: &Uuid) -> Vec<ToolInvocation> {
        self.inner
            .read()
            .iter()
            .filter(|r| r.run_id == *run_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
