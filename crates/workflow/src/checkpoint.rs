//! Durable checkpoint store: one JSONL event log per run under the
//! state directory. Append before effect; load and replay on resume.

use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use uuid::Uuid;

use rf_domain::{Error, Result};

use crate::event::{Run, RunEvent, RunEventRecord};

pub struct CheckpointStore {
    dir: PathBuf,
    /// Guards sequence assignment per process; the file is append-only.
    seq_lock: Mutex<()>,
}

impl CheckpointStore {
    pub fn new(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("runs");
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            seq_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, run_id: &Uuid) -> PathBuf {
        self.dir.join(format!("{run_id}.jsonl"))
    }

    /// Append one event, assigning the next sequence number.
    pub fn append(&self, run_id: &Uuid, event: RunEvent) -> Result<u64> {
        let _guard = self.seq_lock.lock();
        let path = self.path_for(run_id);
        let seq = match std::fs::read_to_string(&path) {
            Ok(content) => content.lines().count() as u64,
            Err(_) => 0,
        };
        let record = RunEventRecord {
            seq,
            at: chrono::Utc::now(),
            event,
        };
        let json = serde_json::to_string(&record)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        writeln!(file, "{json}")?;
        Ok(seq)
    }

    /// Load the ordered event log for a run.
    pub fn load(&self, run_id: &Uuid) -> Result<Vec<RunEvent>> {
        let path = self.path_for(run_id);
        let content = std::fs::read_to_string(&path)
            .map_err(|_| Error::NotFound(format!("run {run_id} has no checkpoint log")))?;
        let mut records: Vec<RunEventRecord> = Vec::new();
        for line in content.lines() {
            records.push(serde_json::from_str(line)?);
        }
        records.sort_by_key(|r| r.seq);
        Ok(records.into_iter().map(|r| r.event).collect())
    }

    /// Rebuild a run snapshot by replaying its log.
    pub fn replay(&self, run_id: &Uuid) -> Result<Run> {
        let events = self.load(run_id)?;
        Ok(Run::replay(events.iter()))
    }

    /// All run ids with a checkpoint log on disk.
    pub fn list(&self) -> Vec<Uuid> {
        let mut ids = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(stem) = name.strip_suffix(".jsonl") {
                    if let Ok(id) = stem.parse::<Uuid>() {
                        ids.push(id);
                    }
                }
            }
        }
        ids.sort();
        ids
    }
}
