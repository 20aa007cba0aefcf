//! Durable storage boundary: the `DurableStore` trait over the external
//! `projects` / `messages` / `agent_context` tables, plus a JSON-file-backed
//! implementation so the core runs without an external database.

pub mod json;
pub mod rows;
pub mod store;

pub use json::JsonStore;
pub use rows::{AgentContextRow, ProjectRow, StoredMessage};
pub use store::DurableStore;
