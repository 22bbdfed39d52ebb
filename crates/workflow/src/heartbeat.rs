//! Activity heartbeats: long activities report progress; a run whose
//! heartbeat goes stale past the threshold is marked suspect so the
//! engine can replay it on a fresh worker.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use uuid::Uuid;

struct Beat {
    last: Instant,
    progress: u64,
}

#[derive(Default)]
pub struct HeartbeatTracker {
    beats: RwLock<HashMap<Uuid, Beat>>,
}

impl HeartbeatTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record progress for a run's current activity.
    pub fn beat(&self, run_id: Uuid, progress: u64) {
        let mut beats = self.beats.write();
        beats.insert(run_id, Beat { last: Instant::now(), progress });
    }

    pub fn progress(&self, run_id: &Uuid) -> Option<u64> {
        self.beats.read().get(run_id).map(|b| b.progress)
    }

    /// Runs whose last heartbeat is older than `stale_after`.
    pub fn suspects(&self, stale_after: Duration) -> Vec<Uuid> {
        let beats = self.beats.read();
        let mut suspects: Vec<Uuid> = beats
            .iter()
            .filter(|(_, b)| b.last.elapsed() >= stale_after)
            .map(|(id, _)| *id)
            .collect();
        suspects.sort();
        suspects
    }

    /// Stop tracking a finished run.
    pub fn remove(&self, run_id: &Uuid) {
        self.beats.write().remove(run_id);
    }
}
