use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wf_domain::tool::{ContentPart, Role};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// projects
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A row in the `projects` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectRow {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A row in the `messages` table. `parts` is the structured representation
/// the editor consumes; `content` is the flattened text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub parts: Vec<ContentPart>,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// agent_context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A row in the `agent_context` table. The structured fields are stored
/// JSON-encoded; the context store owns the encode/decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContextRow {
    pub project_id: String,
    pub project_name: String,
    pub project_dir: String,
    #[serde(default)]
    pub sandbox_id: Option<String>,
    /// JSON: map of relative path → file record.
    pub files: String,
    /// JSON: map of package name → version.
    pub dependencies: String,
    /// JSON: build status, when known.
    #[serde(default)]
    pub build_status: Option<String>,
    /// JSON: dev-server state, when known.
    #[serde(default)]
    pub server_state: Option<String>,
    /// JSON: bounded ring of recent tool executions.
    pub tool_history: String,
    /// JSON: bounded ring of recent error strings.
    pub error_history: String,
    /// JSON: the task DAG, when planned.
    #[serde(default)]
    pub task_graph: Option<String>,
    /// JSON: ordered list of completed task ids.
    pub completed_steps: String,
    pub updated_at: DateTime<Utc>,
}
