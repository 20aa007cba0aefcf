use std::collections::{BTreeMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wf_domain::error::{Error, Result};
use wf_storage::AgentContextRow;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Files
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Created,
    Updated,
    Deleted,
}

/// One tracked file inside the project snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileState {
    pub content: String,
    pub language: String,
    pub last_modified: DateTime<Utc>,
    pub status: FileStatus,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Build / server state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStatus {
    pub has_errors: bool,
    pub has_warnings: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerState {
    pub is_running: bool,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One recorded tool execution (bounded ring, oldest evicted first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub name: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task graph
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub status: TaskStatus,
}

/// The agent's plan: a DAG of user-visible tasks.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskGraph {
    pub tasks: Vec<Task>,
}

impl TaskGraph {
    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn get_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    /// Check that every dependency exists and the graph has no cycles.
    pub fn validate(&self) -> Result<()> {
        let ids: HashSet<&str> = self.tasks.iter().map(|t| t.id.as_str()).collect();
        if ids.len() != self.tasks.len() {
            return Err(Error::Validation("task graph contains duplicate ids".into()));
        }
        for task in &self.tasks {
            for dep in &task.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(Error::Validation(format!(
                        "task '{}' depends on unknown task '{dep}'",
                        task.id
                    )));
                }
            }
        }
        // Kahn-style cycle check.
        let mut resolved: HashSet<&str> = HashSet::new();
        let mut remaining: Vec<&Task> = self.tasks.iter().collect();
        while !remaining.is_empty() {
            let before = remaining.len();
            remaining.retain(|t| {
                let ready = t.depends_on.iter().all(|d| resolved.contains(d.as_str()));
                !ready
            });
            for t in &self.tasks {
                if t.depends_on.iter().all(|d| resolved.contains(d.as_str())) {
                    resolved.insert(t.id.as_str());
                }
            }
            if remaining.len() == before {
                return Err(Error::Validation("task graph contains a cycle".into()));
            }
        }
        Ok(())
    }

    /// Whether every dependency of `task_id` is completed.
    pub fn dependencies_completed(&self, task_id: &str) -> bool {
        match self.get(task_id) {
            Some(task) => task.depends_on.iter().all(|dep| {
                self.get(dep)
                    .map(|d| d.status == TaskStatus::Completed)
                    .unwrap_or(false)
            }),
            None => false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Project context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The canonical per-project state owned by the context store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub project_id: String,
    pub project_name: String,
    pub project_dir: String,
    #[serde(default)]
    pub sandbox_id: Option<String>,
    #[serde(default)]
    pub files: BTreeMap<String, FileState>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub build_status: Option<BuildStatus>,
    #[serde(default)]
    pub server_state: Option<ServerState>,
    #[serde(default)]
    pub tool_history: VecDeque<ToolExecution>,
    #[serde(default)]
    pub error_history: VecDeque<String>,
    #[serde(default)]
    pub task_graph: Option<TaskGraph>,
    #[serde(default)]
    pub completed_steps: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl ProjectContext {
    pub fn new(
        project_id: impl Into<String>,
        project_name: impl Into<String>,
        project_dir: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            project_id: project_id.into(),
            project_name: project_name.into(),
            project_dir: project_dir.into(),
            sandbox_id: None,
            files: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            build_status: None,
            server_state: None,
            tool_history: VecDeque::new(),
            error_history: VecDeque::new(),
            task_graph: None,
            completed_steps: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Push a tool execution, evicting the oldest past `cap`.
    pub fn push_tool_execution(&mut self, exec: ToolExecution, cap: usize) {
        self.tool_history.push_back(exec);
        while self.tool_history.len() > cap {
            self.tool_history.pop_front();
        }
    }

    /// Push an error string, evicting the oldest past `cap`.
    pub fn push_error(&mut self, msg: impl Into<String>, cap: usize) {
        self.error_history.push_back(msg.into());
        while self.error_history.len() > cap {
            self.error_history.pop_front();
        }
    }

    /// Serialize to the `agent_context` row layout.
    pub fn to_row(&self) -> Result<AgentContextRow> {
        Ok(AgentContextRow {
            project_id: self.project_id.clone(),
            project_name: self.project_name.clone(),
            project_dir: self.project_dir.clone(),
            sandbox_id: self.sandbox_id.clone(),
            files: serde_json::to_string(&self.files)?,
            dependencies: serde_json::to_string(&self.dependencies)?,
            build_status: self
                .build_status
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            server_state: self
                .server_state
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            tool_history: serde_json::to_string(&self.tool_history)?,
            error_history: serde_json::to_string(&self.error_history)?,
            task_graph: self
                .task_graph
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            completed_steps: serde_json::to_string(&self.completed_steps)?,
            updated_at: self.last_activity,
        })
    }

    /// Rehydrate from the `agent_context` row layout.
    pub fn from_row(row: &AgentContextRow, created_at: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            project_id: row.project_id.clone(),
            project_name: row.project_name.clone(),
            project_dir: row.project_dir.clone(),
            sandbox_id: row.sandbox_id.clone(),
            files: serde_json::from_str(&row.files)?,
            dependencies: serde_json::from_str(&row.dependencies)?,
            build_status: row
                .build_status
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            server_state: row
                .server_state
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            tool_history: serde_json::from_str(&row.tool_history)?,
            error_history: serde_json::from_str(&row.error_history)?,
            task_graph: row
                .task_graph
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            completed_steps: serde_json::from_str(&row.completed_steps)?,
            created_at,
            last_activity: row.updated_at,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Patch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A partial update to a project context. `None` fields are untouched;
/// `files` and `dependencies` entries are merged in, not replaced wholesale.
/// `sandbox_id: Some(None)` clears the handle.
#[derive(Debug, Clone, Default)]
pub struct ContextPatch {
    pub project_name: Option<String>,
    pub sandbox_id: Option<Option<String>>,
    pub files: Option<BTreeMap<String, FileState>>,
    pub dependencies: Option<BTreeMap<String, String>>,
    pub build_status: Option<BuildStatus>,
    pub server_state: Option<ServerState>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exec(name: &str) -> ToolExecution {
        ToolExecution {
            name: name.into(),
            input: json!({}),
            output: json!({"ok": true}),
            success: true,
            error: None,
            started_at: Utc::now(),
            duration_ms: 5,
        }
    }

    #[test]
    fn tool_ring_evicts_fifo() {
        let mut ctx = ProjectContext::new("p", "p", "/home/user/project");
        for i in 0..60 {
            ctx.push_tool_execution(exec(&format!("tool{i}")), 50);
        }
        assert_eq!(ctx.tool_history.len(), 50);
        assert_eq!(ctx.tool_history.front().unwrap().name, "tool10");
        assert_eq!(ctx.tool_history.back().unwrap().name, "tool59");
    }

    #[test]
    fn error_ring_evicts_fifo() {
        let mut ctx = ProjectContext::new("p", "p", "/home/user/project");
        for i in 0..25 {
            ctx.push_error(format!("err{i}"), 20);
        }
        assert_eq!(ctx.error_history.len(), 20);
        assert_eq!(ctx.error_history.front().unwrap(), "err5");
    }

    #[test]
    fn row_round_trip_is_structurally_equal() {
        let mut ctx = ProjectContext::new("p1", "Coffee Shop", "/home/user/project");
        ctx.files.insert(
            "app/page.tsx".into(),
            FileState {
                content: "export default function Page() {}".into(),
                language: "typescriptreact".into(),
                last_modified: Utc::now(),
                status: FileStatus::Created,
            },
        );
        ctx.dependencies.insert("next".into(), "15.0.0".into());
        ctx.push_tool_execution(exec("writeFile"), 50);
        ctx.task_graph = Some(TaskGraph {
            tasks: vec![Task {
                id: "t1".into(),
                title: "Scaffold".into(),
                depends_on: vec![],
                status: TaskStatus::Completed,
            }],
        });
        ctx.completed_steps.push("t1".into());

        let row = ctx.to_row().unwrap();
        let back = ProjectContext::from_row(&row, ctx.created_at).unwrap();
        assert_eq!(ctx, back);
    }

    #[test]
    fn task_graph_rejects_unknown_dependency() {
        let graph = TaskGraph {
            tasks: vec![Task {
                id: "t1".into(),
                title: "x".into(),
                depends_on: vec!["ghost".into()],
                status: TaskStatus::Pending,
            }],
        };
        assert!(graph.validate().is_err());
    }

    #[test]
    fn task_graph_rejects_cycle() {
        let graph = TaskGraph {
            tasks: vec![
                Task {
                    id: "t1".into(),
                    title: "a".into(),
                    depends_on: vec!["t2".into()],
                    status: TaskStatus::Pending,
                },
                Task {
                    id: "t2".into(),
                    title: "b".into(),
                    depends_on: vec!["t1".into()],
                    status: TaskStatus::Pending,
                },
            ],
        };
        assert!(graph.validate().is_err());
    }

    #[test]
    fn dependencies_completed_requires_all() {
        let mut graph = TaskGraph {
            tasks: vec![
                Task {
                    id: "t1".into(),
                    title: "a".into(),
                    depends_on: vec![],
                    status: TaskStatus::Pending,
                },
                Task {
                    id: "t2".into(),
                    title: "b".into(),
                    depends_on: vec!["t1".into()],
                    status: TaskStatus::Pending,
                },
            ],
        };
        assert!(!graph.dependencies_completed("t2"));
        graph.get_mut("t1").unwrap().status = TaskStatus::Completed;
        assert!(graph.dependencies_completed("t2"));
    }
}
