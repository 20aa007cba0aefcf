//! Per-project agent context: the write-through cache over the durable
//! store, bounded histories, the task graph, and the event bus every other
//! component publishes through.

pub mod bus;
pub mod store;
pub mod types;

pub use bus::{Event, EventBus, EventFilter, EventKind, EventPayload, EventStream};
pub use store::ContextStore;
pub use types::{
    BuildStatus, ContextPatch, FileState, FileStatus, ProjectContext, ServerState, Task,
    TaskGraph, TaskStatus, ToolExecution,
};
