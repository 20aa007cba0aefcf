use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sandbox lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Pre-built VM template to shorten cold start. `None` = provider default.
    #[serde(default)]
    pub vm_template_id: Option<String>,
    /// Max RETRY attempts before the machine refuses further retries.
    #[serde(default = "d_3")]
    pub max_retries: u32,
    /// Deadline for creating a fresh VM (ms).
    #[serde(default = "d_30000")]
    pub create_timeout_ms: u64,
    /// Deadline for reconnecting to an existing VM (ms).
    #[serde(default = "d_10000")]
    pub connect_timeout_ms: u64,
    /// Deadline for the liveness probe against an active VM (ms).
    #[serde(default = "d_2000")]
    pub liveness_timeout_ms: u64,
    /// Deadline for dependency installs after restoration (ms).
    #[serde(default = "d_120000")]
    pub install_timeout_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            vm_template_id: None,
            max_retries: 3,
            create_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            liveness_timeout_ms: 2_000,
            install_timeout_ms: 120_000,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_3() -> u32 {
    3
}
fn d_2000() -> u64 {
    2_000
}
fn d_10000() -> u64 {
    10_000
}
fn d_30000() -> u64 {
    30_000
}
fn d_120000() -> u64 {
    120_000
}
