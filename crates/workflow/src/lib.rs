//! The durable workflow engine: a checkpointed run state machine,
//! id-keyed signals, phased execution with dwell and canary analysis,
//! and LIFO rollback of recorded inverse operations.

pub mod checkpoint;
pub mod clock;
pub mod engine;
pub mod event;
pub mod heartbeat;
pub mod signal;
pub mod state;

pub use checkpoint::CheckpointStore;
pub use clock::{ManualClock, SystemClock, WorkflowClock};
pub use engine::{RunRequest, WorkflowEngine};
pub use event::{Run, RunEvent, RunEventRecord};
pub use heartbeat::HeartbeatTracker;
pub use signal::{Signal, SignalKind, SignalQueue};
pub use state::RunState;
