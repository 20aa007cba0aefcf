//! The process-wide runtime registry.
//!
//! Owns the component lifecycles — store, context, sandbox, dev server,
//! tools, provider — and exposes the entry points the request layer
//! calls. Components receive their collaborators explicitly; nothing in
//! the core reaches for a global.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use wf_context::types::{BuildStatus, FileState, FileStatus, ServerState};
use wf_context::ContextStore;
use wf_devserver::{DevServerStatus, DevServerSupervisor, StartOutcome};
use wf_domain::config::Config;
use wf_domain::error::{Error, Result};
use wf_providers::LlmProvider;
use wf_sandbox::{SandboxManager, VmProvider};
use wf_storage::DurableStore;
use wf_tools::{Executors, ToolRegistry};

use crate::cancel::CancelMap;
use crate::turn_lock::TurnLockMap;

pub struct CoreRuntime {
    pub config: Arc<Config>,
    pub store: Arc<dyn DurableStore>,
    pub context: Arc<ContextStore>,
    pub sandbox: Arc<SandboxManager>,
    pub devserver: Arc<DevServerSupervisor>,
    pub llm: Arc<dyn LlmProvider>,
    pub registry: ToolRegistry,
    pub executors: Executors,
    pub cancel_map: CancelMap,
    pub(crate) turn_locks: TurnLockMap,
}

impl CoreRuntime {
    pub fn new(
        config: Config,
        store: Arc<dyn DurableStore>,
        vm_provider: Arc<dyn VmProvider>,
        llm: Arc<dyn LlmProvider>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let context = Arc::new(ContextStore::new(
            config.context.clone(),
            config.project.project_dir.clone(),
            store.clone(),
        ));
        let sandbox = Arc::new(SandboxManager::new(
            config.sandbox.clone(),
            config.exec.clone(),
            vm_provider,
            context.clone(),
        ));
        let devserver = Arc::new(DevServerSupervisor::new(
            config.dev_server.clone(),
            sandbox.clone(),
            context.clone(),
        ));
        let executors = Executors::new(
            context.clone(),
            sandbox.clone(),
            devserver.clone(),
            config.exec.clone(),
        );

        Arc::new(Self {
            config,
            store,
            context,
            sandbox,
            devserver,
            llm,
            registry: ToolRegistry::builtin(),
            executors,
            cancel_map: CancelMap::new(),
            turn_locks: TurnLockMap::new(),
        })
    }

    // ── Request-layer entry points ────────────────────────────────

    /// The project's persisted view: row metadata plus the tracked
    /// snapshot.
    pub async fn get_project(&self, project_id: &str) -> Result<ProjectView> {
        let row = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("project '{project_id}' does not exist")))?;
        let ctx = self.context.get(project_id).await?;
        Ok(ProjectView {
            id: row.id,
            name: row.name,
            files: ctx.files.clone(),
            dependencies: ctx.dependencies.clone(),
            server_state: ctx.server_state.clone(),
            build_status: ctx.build_status.clone(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    /// Bring a project back to a working preview: rehydrate a sandbox
    /// from the snapshot and start the dev server.
    pub async fn restore_project(&self, project_id: &str) -> Result<RestoreOutcome> {
        self.store
            .get_project(project_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("project '{project_id}' does not exist")))?;

        let ctx = self.context.get(project_id).await?;
        let files_restored = ctx
            .files
            .values()
            .filter(|f| f.status != FileStatus::Deleted)
            .count();

        let handle = self.sandbox.ensure_sandbox(project_id).await?;
        let started = self.devserver.start(project_id, None, false).await?;

        Ok(RestoreOutcome {
            sandbox_id: handle.id().to_string(),
            preview_url: started.url,
            files_restored,
        })
    }

    pub async fn start_dev(
        &self,
        project_id: &str,
        project_name: Option<&str>,
        force_restart: bool,
    ) -> Result<StartOutcome> {
        self.devserver
            .start(project_id, project_name, force_restart)
            .await
    }

    pub async fn stop_dev(&self, project_id: &str) -> Result<()> {
        self.devserver.stop(project_id).await
    }

    pub async fn status_dev(&self, project_id: &str) -> Result<DevServerStatus> {
        self.devserver.status(project_id).await
    }

    /// Cancel the running turn for a project, if any.
    pub fn stop_turn(&self, project_id: &str) -> bool {
        self.cancel_map.cancel(project_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectView {
    pub id: String,
    pub name: String,
    pub files: BTreeMap<String, FileState>,
    pub dependencies: BTreeMap<String, String>,
    pub server_state: Option<ServerState>,
    pub build_status: Option<BuildStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub sandbox_id: String,
    pub preview_url: String,
    pub files_restored: usize,
}
