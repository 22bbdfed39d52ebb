//! External signals: id-keyed, idempotent, applied in acceptance order
//! per run. The engine drains the queue at every suspension point.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalKind {
    Approve { actor: String },
    Reject { actor: String, reason: Option<String> },
    Pause,
    Resume,
    Cancel,
    ForcePromote,
    ForceRollback,
}

impl SignalKind {
    pub fn name(&self) -> &'static str {
        match self {
            SignalKind::Approve { .. } => "approve",
            SignalKind::Reject { .. } => "reject",
            SignalKind::Pause => "pause",
            SignalKind::Resume => "resume",
            SignalKind::Cancel => "cancel",
            SignalKind::ForcePromote => "force_promote",
            SignalKind::ForceRollback => "force_rollback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub kind: SignalKind,
}

impl Signal {
    pub fn new(kind: SignalKind) -> Self {
        Self { id: Uuid::new_v4(), kind }
    }
}

struct RunSignals {
    seen: HashSet<Uuid>,
    queue: VecDeque<Signal>,
    notify: Arc<Notify>,
}

impl RunSignals {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            queue: VecDeque::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

/// Per-run FIFO signal queues with id-based deduplication.
#[derive(Default)]
pub struct SignalQueue {
    runs: Mutex<HashMap<Uuid, RunSignals>>,
}

impl SignalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a signal. Returns `false` for a duplicate signal id
    /// (idempotent redelivery).
    pub fn accept(&self, run_id: Uuid, signal: Signal) -> bool {
        let mut runs = self.runs.lock();
        let entry = runs.entry(run_id).or_insert_with(RunSignals::new);
        if !entry.seen.insert(signal.id) {
            return false;
        }
        entry.queue.push_back(signal);
        entry.notify.notify_waiters();
        true
    }

    /// Pop the next pending signal, if any.
    pub fn poll(&self, run_id: &Uuid) -> Option<Signal> {
        let mut runs = self.runs.lock();
        runs.get_mut(run_id)?.queue.pop_front()
    }

    /// Wait until a signal is available, then pop it.
    pub async fn next(&self, run_id: Uuid) -> Signal {
        loop {
            let notify = {
                let mut runs = self.runs.lock();
                let entry = runs.entry(run_id).or_insert_with(RunSignals::new);
                if let Some(signal) = entry.queue.pop_front() {
                    return signal;
                }
                entry.notify.clone()
            };
            notify.notified().await;
        }
    }

    /// Drop all state for a finished run.
    pub fn clear(&self, run_id: &Uuid) {
        self.runs.lock().remove(run_id);
    }

    pub fn pending(&self, run_id: &Uuid) -> usize {
        self.runs
            .lock()
            .get(run_id)
            .map(|r| r.queue.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_in_order() {
        let queue = SignalQueue::new();
        let run = Uuid::new_v4();
        assert!(queue.accept(run, Signal::new(SignalKind::Pause)));
        assert!(queue.accept(run, Signal::new(SignalKind::Resume)));

        assert_eq!(queue.poll(&run).unwrap().kind, SignalKind::Pause);
        assert_eq!(queue.poll(&run).unwrap().kind, SignalKind::Resume);
        assert!(queue.poll(&run).is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let queue = SignalQueue::new();
        let run = Uuid::new_v4();
        let signal = Signal::new(SignalKind::Cancel);
        assert!(queue.accept(run, signal.clone()));
        assert!(!queue.accept(run, signal));
        assert_eq!(queue.pending(&run), 1);
    }

    #[test]
    fn runs_are_independent() {
        let queue = SignalQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        queue.accept(a, Signal::new(SignalKind::Pause));
        assert!(queue.poll(&b).is_none());
        assert!(queue.poll(&a).is_some());
    }

    #[tokio::test]
    async fn next_wakes_on_accept() {
        let queue = Arc::new(SignalQueue::new());
        let run = Uuid::new_v4();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next(run).await })
        };
        // Give the waiter a chance to park.
        tokio::task::yield_now().await;
        queue.accept(
            run,
            Signal {
                id: Uuid::new_v4(),
                kind: SignalKind::Approve { actor: "lead".into() },
            },
        );
        let signal = waiter.await.unwrap();
        assert!(matches!(signal.kind, SignalKind::Approve { .. }));
    }

    #[test]
    fn clear_drops_state() {
        let queue = SignalQueue::new();
        let run = Uuid::new_v4();
        let signal = Signal::new(SignalKind::Cancel);
        queue.accept(run, signal.clone());
        queue.clear(&run);
        // After clear even the same id is accepted again (new run scope).
        assert!(queue.accept(run, signal));
    }
}
