//! Risk scoring and the autonomy engine: a deterministic eight-factor
//! risk assessment and the per-org policy that decides whether a task
//! may execute unattended.

pub mod autonomy;
pub mod score;

pub use autonomy::{decide, recommend_batch, AutonomyInput};
pub use score::{assess, RiskContext};
