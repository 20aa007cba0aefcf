mod context;
mod devserver;
mod exec;
mod orchestrator;
mod sandbox;

pub use context::*;
pub use devserver::*;
pub use exec::*;
pub use orchestrator::*;
pub use sandbox::*;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub dev_server: DevServerConfig,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Project layout
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fixed filesystem conventions inside the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Absolute project directory inside every sandbox.
    #[serde(default = "d_project_dir")]
    pub project_dir: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_dir: d_project_dir(),
        }
    }
}

fn d_project_dir() -> String {
    "/home/user/project".into()
}
