use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Capacity of the per-project tool-execution ring.
    #[serde(default = "d_50")]
    pub max_tool_history: usize,
    /// Capacity of the per-project error ring.
    #[serde(default = "d_20")]
    pub max_error_history: usize,
    /// Capacity of the event bus debugging ring.
    #[serde(default = "d_100")]
    pub event_ring_capacity: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tool_history: 50,
            max_error_history: 20,
            event_ring_capacity: 100,
        }
    }
}

fn d_20() -> usize {
    20
}
fn d_50() -> usize {
    50
}
fn d_100() -> usize {
    100
}
