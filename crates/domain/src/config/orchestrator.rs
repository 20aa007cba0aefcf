use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Soft step cap. `None` = unbounded; production deployments should set
    /// a finite value. When hit, the turn ends with a truncation marker.
    #[serde(default)]
    pub max_steps: Option<u32>,
    /// Compress the conversation once it exceeds this many messages.
    #[serde(default = "d_30")]
    pub compress_messages_above: usize,
    /// How many trailing messages survive compression (plus the leading
    /// system message).
    #[serde(default = "d_20")]
    pub compress_keep_tail: usize,
    /// Sampling temperature passed to the LLM.
    #[serde(default = "d_temp")]
    pub temperature: f32,
    /// Name given to projects persisted before any title is derived.
    #[serde(default = "d_untitled")]
    pub default_project_name: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: None,
            compress_messages_above: 30,
            compress_keep_tail: 20,
            temperature: 0.2,
            default_project_name: d_untitled(),
        }
    }
}

fn d_20() -> usize {
    20
}
fn d_30() -> usize {
    30
}
fn d_temp() -> f32 {
    0.2
}
fn d_untitled() -> String {
    "Untitled Project".into()
}
