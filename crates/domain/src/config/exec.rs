use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sandbox command execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Default timeout for sandbox commands (ms).
    #[serde(default = "d_60000")]
    pub default_timeout_ms: u64,
    /// Timeout for package installs (ms).
    #[serde(default = "d_120000")]
    pub install_timeout_ms: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 60_000,
            install_timeout_ms: 120_000,
        }
    }
}

fn d_60000() -> u64 {
    60_000
}
fn d_120000() -> u64 {
    120_000
}
