//! Tool registry and executors: the typed tool surface the LLM calls,
//! validated against JSON schemas and dispatched against the context
//! store, sandbox manager, and dev-server supervisor.

pub mod executors;
pub mod registry;
pub mod schema;

pub use executors::{Executors, ToolOutcome};
pub use registry::{ToolRegistry, ToolSpec};
pub use schema::ToolCallError;
