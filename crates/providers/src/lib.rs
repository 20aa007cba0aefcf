//! The LLM provider contract the orchestrator consumes: a streaming chat
//! trait, a retry adapter with exponential backoff, and a scripted mock
//! for tests.

pub mod mock;
pub mod retry;
pub mod traits;

pub use mock::ScriptedProvider;
pub use retry::{with_retry, RetryPolicy};
pub use traits::{ChatRequest, LlmProvider};
