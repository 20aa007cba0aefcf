//! The VM provider contract the sandbox manager drives.
//!
//! Implementations wrap the deployment's VM SDK; [`crate::mock`] provides
//! an in-memory implementation for tests and local runs.
//!
//! Error conventions: `connect` to an expired or unknown VM returns a
//! `NotFound` error (the manager maps it to an `EXPIRE` transition);
//! transport failures return `ProviderUnavailable` (eligible for retry).

use std::sync::Arc;
use std::time::Duration;

use wf_domain::error::Result;

/// Options for a sandbox command.
#[derive(Debug, Clone, Default)]
pub struct ExecOpts {
    /// Working directory. `None` = the provider's default.
    pub cwd: Option<String>,
    /// Hard deadline. A command past it is killed; partial output is still
    /// returned with `timed_out` set.
    pub timeout_ms: Option<u64>,
}

/// Outcome of a sandbox command. Timeouts are data, not errors.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

#[async_trait::async_trait]
pub trait VmProvider: Send + Sync {
    /// Request a fresh VM, optionally from a pre-built template.
    async fn create(
        &self,
        template_id: Option<&str>,
        timeout: Duration,
    ) -> Result<Arc<dyn VmHandle>>;

    /// Reconnect to an existing VM by id.
    async fn connect(&self, sandbox_id: &str, timeout: Duration) -> Result<Arc<dyn VmHandle>>;
}

#[async_trait::async_trait]
pub trait VmHandle: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;

    /// Run a command to completion (or until the deadline).
    async fn exec(&self, command: &str, opts: ExecOpts) -> Result<ExecOutcome>;

    /// Write a file, creating parent directories as needed.
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    async fn read_file(&self, path: &str) -> Result<String>;

    /// Start a long-lived background process; returns an opaque handle id.
    async fn start_background(&self, command: &str, cwd: Option<&str>) -> Result<String>;

    /// Kill a background process. Returns whether the handle existed.
    async fn kill(&self, handle_id: &str) -> Result<bool>;

    /// Public URL the VM maps to a port.
    fn host_url(&self, port: u16) -> String;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;
}
