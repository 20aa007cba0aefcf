//! Per-project cancellation registry.
//!
//! The tokens themselves live in [`wf_domain::cancel`] so every layer —
//! turn loop, tool executors, sandbox commands — can race in-flight work
//! against them. Each running turn registers its token here; cancelling
//! stops the LLM stream consumption, the tool loop, and any command the
//! tools have in flight. Sandbox VMs are left alive — cancellation never
//! destroys state.

use std::collections::HashMap;

use parking_lot::Mutex;

pub use wf_domain::cancel::CancelToken;

/// Active cancellation tokens, one per project with a running turn.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a token for a project's turn.
    pub fn register(&self, project_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(project_id.to_owned(), token.clone());
        token
    }

    /// Cancel the running turn for a project. Returns whether a token
    /// was registered.
    pub fn cancel(&self, project_id: &str) -> bool {
        match self.tokens.lock().get(project_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token once the turn completes.
    pub fn remove(&self, project_id: &str) {
        self.tokens.lock().remove(project_id);
    }

    pub fn is_running(&self, project_id: &str) -> bool {
        self.tokens.lock().contains_key(project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_register_cancel_remove() {
        let map = CancelMap::new();
        let token = map.register("p1");
        assert!(map.is_running("p1"));
        assert!(map.cancel("p1"));
        assert!(token.is_cancelled());

        map.remove("p1");
        assert!(!map.is_running("p1"));
        assert!(!map.cancel("p1"));
    }

    #[test]
    fn register_replaces_previous_token() {
        let map = CancelMap::new();
        let old = map.register("p1");
        let new = map.register("p1");
        map.cancel("p1");
        assert!(!old.is_cancelled());
        assert!(new.is_cancelled());
    }

    #[test]
    fn cancel_is_scoped_per_project() {
        let map = CancelMap::new();
        let a = map.register("a");
        let b = map.register("b");
        map.cancel("a");
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
    }
}
