//! Tool executors: per-tool side effects against the context store,
//! sandbox manager, and dev-server supervisor.
//!
//! Tools never unwind. `dispatch` catches every failure, records the
//! execution into the project's tool history, and returns a tagged
//! outcome the orchestrator feeds back to the LLM. The turn's cancel
//! token rides along: a cancelled turn drops the in-flight tool and, for
//! command tools, the sandbox command underneath it.

mod build;
mod commands;
mod files;
mod plan;
mod project;

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use wf_context::types::ToolExecution;
use wf_context::ContextStore;
use wf_devserver::DevServerSupervisor;
use wf_domain::cancel::CancelToken;
use wf_domain::config::ExecConfig;
use wf_domain::error::{Error, Result};
use wf_sandbox::SandboxManager;

/// The result of one tool execution, as fed back to the LLM.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub output: Value,
    pub success: bool,
    pub error: Option<String>,
}

impl ToolOutcome {
    /// The string form placed into the tool-result message part.
    pub fn content_string(&self) -> String {
        serde_json::to_string(&self.output).unwrap_or_else(|_| "{}".to_string())
    }
}

pub struct Executors {
    pub(crate) context: Arc<ContextStore>,
    pub(crate) sandbox: Arc<SandboxManager>,
    pub(crate) devserver: Arc<DevServerSupervisor>,
    pub(crate) exec_cfg: ExecConfig,
}

impl Executors {
    pub fn new(
        context: Arc<ContextStore>,
        sandbox: Arc<SandboxManager>,
        devserver: Arc<DevServerSupervisor>,
        exec_cfg: ExecConfig,
    ) -> Self {
        Self {
            context,
            sandbox,
            devserver,
            exec_cfg,
        }
    }

    /// Execute a tool call, recording the execution into tool history.
    ///
    /// The whole execution races against `cancel`: when the token fires,
    /// the tool future is dropped (partial writes stay committed) and the
    /// call is recorded as a failed execution.
    pub async fn dispatch(
        &self,
        project_id: &str,
        tool_name: &str,
        input: &Value,
        cancel: &CancelToken,
    ) -> ToolOutcome {
        let started_at = Utc::now();
        let t0 = std::time::Instant::now();

        let result = tokio::select! {
            result = self.execute(project_id, tool_name, input, cancel) => result,
            _ = cancel.cancelled() => Err(Error::Internal(format!(
                "tool '{tool_name}' cancelled"
            ))),
        };
        let duration_ms = t0.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(output) => ToolOutcome {
                output,
                success: true,
                error: None,
            },
            Err(e) => {
                tracing::warn!(project_id, tool_name, error = %e, "tool execution failed");
                ToolOutcome {
                    output: json!({ "error": e.to_wire() }),
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        };

        if let Some(ref error) = outcome.error {
            if let Err(e) = self
                .context
                .append_error(project_id, format!("{tool_name}: {error}"))
                .await
            {
                tracing::debug!(project_id, error = %e, "error history not recorded");
            }
        }

        let record = ToolExecution {
            name: tool_name.to_owned(),
            input: input.clone(),
            output: outcome.output.clone(),
            success: outcome.success,
            error: outcome.error.clone(),
            started_at,
            duration_ms,
        };
        if let Err(e) = self.context.append_tool_execution(project_id, record).await {
            tracing::debug!(project_id, error = %e, "tool history not recorded");
        }

        outcome
    }

    async fn execute(
        &self,
        project_id: &str,
        tool_name: &str,
        input: &Value,
        cancel: &CancelToken,
    ) -> Result<Value> {
        match tool_name {
            "planChanges" => plan::plan_changes(self, project_id, input).await,
            "markStepComplete" => plan::mark_step_complete(self, project_id, input).await,
            "analyzeProjectState" => project::analyze_project_state(self, project_id).await,
            "getProjectStructure" => project::get_project_structure(self, project_id).await,
            "syncProject" => project::sync_project(self, project_id).await,
            "readFile" => files::read_file(self, project_id, input).await,
            "writeFile" => files::write_file(self, project_id, input).await,
            "editFile" => files::edit_file(self, project_id, input).await,
            "batchWriteFiles" => files::batch_write_files(self, project_id, input).await,
            "runCommand" => commands::run_command(self, project_id, input, cancel).await,
            "installPackage" => commands::install_package(self, project_id, input, cancel).await,
            "getBuildStatus" => build::get_build_status(self, project_id, input).await,
            other => Err(Error::NotFound(format!("unknown tool '{other}'"))),
        }
    }
}

/// Parse a typed input struct out of a tool-call argument value.
pub(crate) fn parse_input<T: serde::de::DeserializeOwned>(input: &Value) -> Result<T> {
    serde_json::from_value(input.clone())
        .map_err(|e| Error::Validation(format!("malformed tool input: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wf_context::bus::{EventFilter, EventKind, EventPayload};
    use wf_domain::config::{ContextConfig, DevServerConfig, SandboxConfig};
    use wf_sandbox::mock::MockVmProvider;
    use wf_storage::{DurableStore, JsonStore, ProjectRow};

    struct Fixture {
        _dir: tempfile::TempDir,
        provider: Arc<MockVmProvider>,
        context: Arc<ContextStore>,
        sandbox: Arc<SandboxManager>,
        devserver: Arc<DevServerSupervisor>,
        executors: Executors,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStore::new(dir.path()).unwrap());
        store
            .upsert_project(ProjectRow::new("p1", "p1"))
            .await
            .unwrap();
        let context = Arc::new(ContextStore::new(
            ContextConfig::default(),
            "/home/user/project",
            store,
        ));
        let provider = Arc::new(MockVmProvider::new());
        let sandbox = Arc::new(SandboxManager::new(
            SandboxConfig::default(),
            ExecConfig::default(),
            provider.clone(),
            context.clone(),
        ));
        let devserver = Arc::new(DevServerSupervisor::new(
            DevServerConfig::default(),
            sandbox.clone(),
            context.clone(),
        ));
        let executors = Executors::new(
            context.clone(),
            sandbox.clone(),
            devserver.clone(),
            ExecConfig::default(),
        );
        Fixture {
            _dir: dir,
            provider,
            context,
            sandbox,
            devserver,
            executors,
        }
    }

    /// Dispatch against project `p1` with a token that never fires.
    async fn call(fx: &Fixture, tool: &str, input: Value) -> ToolOutcome {
        fx.executors
            .dispatch("p1", tool, &input, &CancelToken::new())
            .await
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let fx = fixture().await;
        let write = call(
            &fx,
            "writeFile",
            json!({"path": "app/page.tsx", "content": "export default function Page() {}"}),
        )
        .await;
        assert!(write.success, "write failed: {:?}", write.output);
        assert_eq!(write.output["status"], "created");

        let read = call(&fx, "readFile", json!({"path": "app/page.tsx"})).await;
        assert!(read.success);
        assert_eq!(read.output["content"], "export default function Page() {}");

        let ctx = fx.context.get("p1").await.unwrap();
        assert!(ctx.files.contains_key("app/page.tsx"));
    }

    #[tokio::test]
    async fn second_write_reports_updated() {
        let fx = fixture().await;
        call(&fx, "writeFile", json!({"path": "a.ts", "content": "one"})).await;
        let second = call(&fx, "writeFile", json!({"path": "a.ts", "content": "two"})).await;
        assert_eq!(second.output["status"], "updated");
    }

    #[tokio::test]
    async fn leading_slash_is_normalized_and_traversal_rejected() {
        let fx = fixture().await;
        let ok = call(
            &fx,
            "writeFile",
            json!({"path": "/app/page.tsx", "content": "x"}),
        )
        .await;
        assert!(ok.success);
        assert_eq!(ok.output["path"], "app/page.tsx");

        let bad = call(
            &fx,
            "writeFile",
            json!({"path": "../escape.ts", "content": "x"}),
        )
        .await;
        assert!(!bad.success);
    }

    #[tokio::test]
    async fn edit_file_replaces_first_occurrence() {
        let fx = fixture().await;
        call(
            &fx,
            "writeFile",
            json!({"path": "app/page.tsx", "content": "const title = 'Old'; // Old"}),
        )
        .await;
        let edit = call(
            &fx,
            "editFile",
            json!({"path": "app/page.tsx", "search": "Old", "replace": "New"}),
        )
        .await;
        assert!(edit.success);

        let read = call(&fx, "readFile", json!({"path": "app/page.tsx"})).await;
        assert_eq!(read.output["content"], "const title = 'New'; // Old");
    }

    #[tokio::test]
    async fn edit_file_without_match_fails_as_data() {
        let fx = fixture().await;
        call(&fx, "writeFile", json!({"path": "a.ts", "content": "hello"})).await;
        let edit = call(
            &fx,
            "editFile",
            json!({"path": "a.ts", "search": "absent", "replace": "x"}),
        )
        .await;
        assert!(!edit.success);
        assert!(edit.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn batch_write_emits_one_files_changed_event() {
        let fx = fixture().await;
        let mut stream = fx
            .context
            .subscribe(EventFilter::kind(EventKind::FilesChanged));

        let outcome = call(
            &fx,
            "batchWriteFiles",
            json!({"files": [
                {"path": "app/page.tsx", "content": "a"},
                {"path": "app/layout.tsx", "content": "b"},
                {"path": "lib/utils.ts", "content": "c"},
                {"path": "../bad.ts", "content": "nope"}
            ]}),
        )
        .await;
        assert!(outcome.success);
        assert_eq!(outcome.output["created"].as_array().unwrap().len(), 3);
        assert_eq!(outcome.output["failed"].as_array().unwrap().len(), 1);

        let event = tokio::time::timeout(Duration::from_secs(1), stream.recv())
            .await
            .unwrap()
            .unwrap();
        match event.payload {
            EventPayload::FilesChanged { paths } => assert_eq!(paths.len(), 3),
            other => panic!("unexpected payload: {other:?}"),
        }
        assert!(
            tokio::time::timeout(Duration::from_millis(50), stream.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn run_command_records_installed_dependencies() {
        let fx = fixture().await;
        let outcome = call(
            &fx,
            "runCommand",
            json!({"command": "npm install zod@3.23.8"}),
        )
        .await;
        assert!(outcome.success);
        let ctx = fx.context.get("p1").await.unwrap();
        assert_eq!(ctx.dependencies.get("zod").map(String::as_str), Some("3.23.8"));
    }

    #[tokio::test]
    async fn install_package_restarts_running_dev_server() {
        let fx = fixture().await;
        call(
            &fx,
            "writeFile",
            json!({"path": "package.json", "content": "{\"name\":\"demo\"}"}),
        )
        .await;
        fx.devserver.start("p1", None, false).await.unwrap();

        let outcome = call(&fx, "installPackage", json!({"packages": ["clsx"]})).await;
        assert!(outcome.success, "{:?}", outcome.output);
        assert_eq!(outcome.output["dev_server_restarted"], true);

        let vm = fx
            .provider
            .vm(fx.sandbox.handle_for("p1").unwrap().id())
            .unwrap();
        // Once for the initial start, once for the restart after install.
        assert_eq!(vm.dev_start_count(), 2);
        let ctx = fx.context.get("p1").await.unwrap();
        assert!(ctx.dependencies.contains_key("clsx"));
    }

    #[tokio::test]
    async fn build_status_classifies_log_lines() {
        let fx = fixture().await;
        let handle = fx.sandbox.ensure_sandbox("p1").await.unwrap();
        handle
            .write_file(
                "/tmp/dev-server.log",
                "✓ Ready in 1.2s\nError: Cannot find module 'next'\nwarn  - slow page\n",
            )
            .await
            .unwrap();

        let outcome = call(&fx, "getBuildStatus", json!({})).await;
        assert!(outcome.success);
        assert_eq!(outcome.output["has_errors"], true);
        assert_eq!(outcome.output["has_warnings"], true);

        let ctx = fx.context.get("p1").await.unwrap();
        let status = ctx.build_status.as_ref().unwrap();
        assert_eq!(status.errors.len(), 1);
        assert_eq!(status.warnings.len(), 1);
    }

    #[tokio::test]
    async fn plan_then_complete_steps() {
        let fx = fixture().await;
        let plan = call(
            &fx,
            "planChanges",
            json!({"steps": ["Scaffold the page", "Add styling", "Wire up the form"]}),
        )
        .await;
        assert!(plan.success);
        let tasks = plan.output["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 3);
        let first_id = tasks[0]["id"].as_str().unwrap().to_string();

        let done = call(&fx, "markStepComplete", json!({"id": first_id})).await;
        assert!(done.success);

        let ctx = fx.context.get("p1").await.unwrap();
        assert_eq!(ctx.completed_steps.len(), 1);
    }

    #[tokio::test]
    async fn sync_project_persists_snapshot() {
        let fx = fixture().await;
        call(&fx, "writeFile", json!({"path": "app/page.tsx", "content": "x"})).await;
        let outcome = call(&fx, "syncProject", json!({})).await;
        assert!(outcome.success);
        assert_eq!(outcome.output["files"], 1);
    }

    #[tokio::test]
    async fn failures_land_in_tool_and_error_history() {
        let fx = fixture().await;
        let outcome = call(&fx, "readFile", json!({"path": "missing.ts"})).await;
        assert!(!outcome.success);

        let ctx = fx.context.get("p1").await.unwrap();
        assert_eq!(ctx.tool_history.len(), 1);
        let record = ctx.tool_history.front().unwrap();
        assert_eq!(record.name, "readFile");
        assert!(!record.success);
        assert_eq!(ctx.error_history.len(), 1);
    }

    #[tokio::test]
    async fn analyze_reports_plan_progress() {
        let fx = fixture().await;
        call(&fx, "planChanges", json!({"steps": ["a", "b"]})).await;
        let outcome = call(&fx, "analyzeProjectState", json!({})).await;
        assert!(outcome.success);
        assert_eq!(outcome.output["tasks"]["total"], 2);
        assert_eq!(outcome.output["tasks"]["completed"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_a_running_command_tool() {
        let fx = fixture().await;
        fx.sandbox.ensure_sandbox("p1").await.unwrap();

        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        // The command would run for ten minutes; the token stops it.
        let outcome = fx
            .executors
            .dispatch("p1", "runCommand", &json!({"command": "sleep 600"}), &cancel)
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("cancelled"));

        // The cancelled call was still recorded as a failed execution.
        let ctx = fx.context.get("p1").await.unwrap();
        let record = ctx.tool_history.back().unwrap();
        assert_eq!(record.name, "runCommand");
        assert!(!record.success);
    }
}
