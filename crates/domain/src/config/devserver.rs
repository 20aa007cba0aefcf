use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dev-server supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevServerConfig {
    /// Candidate ports probed for a running dev server, in order.
    #[serde(default = "d_ports")]
    pub ports: Vec<u16>,
    /// TTL for the per-project status cache (ms). Absorbs polling bursts.
    #[serde(default = "d_1500")]
    pub status_cache_ttl_ms: u64,
    /// Per-port probe deadline (ms).
    #[serde(default = "d_2000")]
    pub probe_timeout_ms: u64,
    /// How long to wait for the dev server to come up (ms).
    #[serde(default = "d_15000")]
    pub ready_timeout_ms: u64,
    /// Readiness poll interval (ms).
    #[serde(default = "d_1000")]
    pub poll_interval_ms: u64,
    /// Well-known log file the dev server's output is redirected to.
    #[serde(default = "d_log_file")]
    pub log_file: String,
    /// Log lines returned in the error payload on readiness timeout.
    #[serde(default = "d_30")]
    pub error_log_lines: usize,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            ports: d_ports(),
            status_cache_ttl_ms: 1_500,
            probe_timeout_ms: 2_000,
            ready_timeout_ms: 15_000,
            poll_interval_ms: 1_000,
            log_file: d_log_file(),
            error_log_lines: 30,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_ports() -> Vec<u16> {
    (3000..=3005).collect()
}
fn d_1000() -> u64 {
    1_000
}
fn d_1500() -> u64 {
    1_500
}
fn d_2000() -> u64 {
    2_000
}
fn d_15000() -> u64 {
    15_000
}
fn d_30() -> usize {
    30
}
fn d_log_file() -> String {
    "/tmp/dev-server.log".into()
}
