//! Task store: the task records the API serves, with broadcast events
//! for SSE subscribers and JSONL persistence of every status change.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use rf_domain::task::{Task, TaskStatus};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task events (for SSE broadcast)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TaskEvent {
    #[serde(rename = "task.status")]
    StatusChanged { task_id: Uuid, status: TaskStatus },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TaskStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
    event_channels: RwLock<HashMap<Uuid, broadcast::Sender<TaskEvent>>>,
    log_path: PathBuf,
}

impl TaskStore {
    pub fn new(state_path: &Path) -> Self {
        let dir = state_path.join("tasks");
        std::fs::create_dir_all(&dir).ok();
        let log_path = dir.join("tasks.jsonl");

        // Rehydrate the latest snapshot of each task.
        let mut tasks = HashMap::new();
        if let Ok(content) = std::fs::read_to_string(&log_path) {
            for line in content.lines() {
                if let Ok(task) = serde_json::from_str::<Task>(line) {
                    tasks.insert(task.id, task);
                }
            }
        }
        if !tasks.is_empty() {
            tracing::info!(count = tasks.len(), "rehydrated tasks from disk");
        }

        Self {
            tasks: RwLock::new(tasks),
            event_channels: RwLock::new(HashMap::new()),
            log_path,
        }
    }

    pub fn insert(&self, task: Task) -> Uuid {
        let task_id = task.id;
        self.persist(&task);
        self.tasks.write().insert(task_id, task);
        task_id
    }

    pub fn get(&self, task_id: &Uuid) -> Option<Task> {
        self.tasks.read().get(task_id).cloned()
    }

    /// Update a task; persists the new snapshot and emits a status
    /// event. Returns false when the task does not exist.
    pub fn update<F>(&self, task_id: &Uuid, f: F) -> bool
    where
        F: FnOnce(&mut Task),
    {
        let updated = {
            let mut tasks = self.tasks.write();
            match tasks.get_mut(task_id) {
                Some(task) => {
                    f(task);
                    task.updated_at = Utc::now();
                    Some(task.clone())
                }
                None => None,
            }
        };
        match updated {
            Some(task) => {
                self.persist(&task);
                self.emit(
                    task_id,
                    TaskEvent::StatusChanged {
                        task_id: *task_id,
                        status: task.status,
                    },
                );
                true
            }
            None => false,
        }
    }

    /// List tasks for an org, newest first.
    pub fn list(
        &self,
        org_id: Option<Uuid>,
        status: Option<TaskStatus>,
        limit: usize,
        offset: usize,
    ) -> (Vec<Task>, usize) {
        let tasks = self.tasks.read();
        let mut matching: Vec<&Task> = tasks
            .values()
            .filter(|t| org_id.map_or(true, |org| t.org_id == org))
            .filter(|t| status.map_or(true, |s| t.status == s))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        (page, total)
    }

    pub fn subscribe(&self, task_id: &Uuid) -> broadcast::Receiver<TaskEvent> {
        let mut channels = self.event_channels.write();
        channels
            .entry(*task_id)
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }

    pub fn emit(&self, task_id: &Uuid, event: TaskEvent) {
        let channels = self.event_channels.read();
        if let Some(tx) = channels.get(task_id) {
            let _ = tx.send(event);
        }
    }

    pub fn cleanup_channel(&self, task_id: &Uuid) {
        self.event_channels.write().remove(task_id);
    }

    /// Remove terminal tasks older than the given duration.
    pub fn evict_terminal(&self, older_than: chrono::Duration) {
        let cutoff = Utc::now() - older_than;
        let mut tasks = self.tasks.write();
        tasks.retain(|_, t| !t.status.is_terminal() || t.updated_at > cutoff);
    }

    fn persist(&self, task: &Task) {
        if let Ok(json) = serde_json::to_string(task) {
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)
            {
                let _ = writeln!(file, "{json}");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn task(org: Uuid) -> Task {
        Task::new(org, "alice", "fix drift on staging")
    }

    #[test]
    fn insert_get_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        let org = Uuid::new_v4();
        let id = store.insert(task(org));

        assert_eq!(store.get(&id).unwrap().status, TaskStatus::Pending);
        assert!(store.update(&id, |t| t.status = TaskStatus::Planning));
        assert_eq!(store.get(&id).unwrap().status, TaskStatus::Planning);
        assert!(!store.update(&Uuid::new_v4(), |t| t.status = TaskStatus::Failed));
    }

    #[test]
    fn list_filters_by_org_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let id = store.insert(task(org_a));
        store.insert(task(org_a));
        store.insert(task(org_b));
        store.update(&id, |t| t.status = TaskStatus::Executing);

        let (all_a, total) = store.list(Some(org_a), None, 50, 0);
        assert_eq!(total, 2);
        assert_eq!(all_a.len(), 2);

        let (executing, total) = store.list(Some(org_a), Some(TaskStatus::Executing), 50, 0);
        assert_eq!(total, 1);
        assert_eq!(executing[0].id, id);
    }

    #[test]
    fn rehydrates_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let org = Uuid::new_v4();
        let id = {
            let store = TaskStore::new(dir.path());
            let id = store.insert(task(org));
            store.update(&id, |t| {
                t.finish(TaskStatus::Succeeded, "ok", "done");
            });
            id
        };
        let store = TaskStore::new(dir.path());
        let rehydrated = store.get(&id).unwrap();
        assert_eq!(rehydrated.status, TaskStatus::Succeeded);
        assert_eq!(rehydrated.reason_code.as_deref(), Some("ok"));
    }

    #[test]
    fn evict_terminal_respects_age() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path());
        let id = store.insert(task(Uuid::new_v4()));
        store.update(&id, |t| t.finish(TaskStatus::Failed, "x", "y"));

        // Recent terminal task survives a 1h eviction window.
        store.evict_terminal(chrono::Duration::hours(1));
        assert!(store.get(&id).is_some());

        // A zero window evicts it.
        store.evict_terminal(chrono::Duration::zero());
        assert!(store.get(&id).is_none());
    }
}
