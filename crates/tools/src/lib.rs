//! Tool catalog and the invocation gate that mediates every side effect.

pub mod gate;
pub mod handler;
pub mod log;
pub mod registry;

pub use gate::{AllowAll, Authorizer, GatePolicy, InvocationGate, PermissivePolicy};
pub use handler::{InvocationCtx, RollbackSink, ToolHandler, ToolOutput};
pub use log::InvocationLog;
pub use registry::ToolRegistry;
