//! Write-through context store.
//!
//! Memory is a cache of `Arc` snapshots; every mutation serializes per
//! project, persists to the durable store before it is visible, then
//! publishes onto the event bus. Reads are lock-free snapshot clones.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use wf_domain::config::ContextConfig;
use wf_domain::error::{Error, Result};
use wf_domain::path::normalize_rel_path;
use wf_storage::DurableStore;

use crate::bus::{Event, EventBus, EventFilter, EventPayload, EventStream, Subscription};
use crate::types::{ContextPatch, ProjectContext, TaskGraph, TaskStatus, ToolExecution};

pub struct ContextStore {
    config: ContextConfig,
    default_project_dir: String,
    store: Arc<dyn DurableStore>,
    bus: Arc<EventBus>,
    cache: RwLock<HashMap<String, Arc<ProjectContext>>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ContextStore {
    pub fn new(
        config: ContextConfig,
        default_project_dir: impl Into<String>,
        store: Arc<dyn DurableStore>,
    ) -> Self {
        let bus = Arc::new(EventBus::new(config.event_ring_capacity));
        Self {
            config,
            default_project_dir: default_project_dir.into(),
            store,
            bus,
            cache: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    fn lock_for(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(project_id.to_owned())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Load a context from the durable store, or start a fresh one with the
    /// project id as a placeholder name.
    async fn load(&self, project_id: &str) -> Result<ProjectContext> {
        if let Some(row) = self.store.get_agent_context(project_id).await? {
            let created_at = match self.store.get_project(project_id).await? {
                Some(project) => project.created_at,
                None => row.updated_at,
            };
            return ProjectContext::from_row(&row, created_at);
        }
        Ok(ProjectContext::new(
            project_id,
            project_id,
            &self.default_project_dir,
        ))
    }

    /// Current snapshot. Lazily loads from the durable store on a cache
    /// miss and populates memory.
    pub async fn get(&self, project_id: &str) -> Result<Arc<ProjectContext>> {
        if let Some(ctx) = self.cache.read().get(project_id) {
            return Ok(ctx.clone());
        }
        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;
        if let Some(ctx) = self.cache.read().get(project_id) {
            return Ok(ctx.clone());
        }
        let ctx = Arc::new(self.load(project_id).await?);
        self.cache
            .write()
            .insert(project_id.to_owned(), ctx.clone());
        Ok(ctx)
    }

    /// Serialize a read-modify-persist cycle for one project. The mutation
    /// closure returns the events to publish once the write lands.
    async fn mutate<F>(&self, project_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut ProjectContext) -> Result<Vec<EventPayload>>,
    {
        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;

        let cached = self.cache.read().get(project_id).cloned();
        let mut ctx = match cached {
            Some(existing) => (*existing).clone(),
            None => self.load(project_id).await?,
        };

        let events = f(&mut ctx)?;
        ctx.last_activity = Utc::now();

        // Write-through: the durable row is updated before memory. A missing
        // project row fails loudly here (referential integrity).
        self.store.put_agent_context(ctx.to_row()?).await?;
        self.cache
            .write()
            .insert(project_id.to_owned(), Arc::new(ctx));

        for payload in events {
            self.bus.publish(project_id, payload);
        }
        Ok(())
    }

    /// Apply a partial patch. Persists immediately; fails with `NotFound`
    /// if the external project row does not exist.
    pub async fn update(&self, project_id: &str, patch: ContextPatch) -> Result<()> {
        self.mutate(project_id, move |ctx| {
            let mut fields = Vec::new();
            let mut events = Vec::new();

            if let Some(name) = patch.project_name {
                ctx.project_name = name;
                fields.push("project_name".to_string());
            }
            if let Some(sandbox_id) = patch.sandbox_id {
                ctx.sandbox_id = sandbox_id;
                fields.push("sandbox_id".to_string());
            }
            if let Some(files) = patch.files {
                let mut paths = Vec::with_capacity(files.len());
                for (path, state) in files {
                    if normalize_rel_path(&path)? != path {
                        return Err(Error::Validation(format!(
                            "file path '{path}' is not normalized"
                        )));
                    }
                    paths.push(path.clone());
                    ctx.files.insert(path, state);
                }
                fields.push("files".to_string());
                events.push(EventPayload::FilesChanged { paths });
            }
            if let Some(deps) = patch.dependencies {
                ctx.dependencies.extend(deps);
                fields.push("dependencies".to_string());
            }
            if let Some(build_status) = patch.build_status {
                events.push(EventPayload::BuildStatusChanged {
                    has_errors: build_status.has_errors,
                });
                ctx.build_status = Some(build_status);
                fields.push("build_status".to_string());
            }
            if let Some(server_state) = patch.server_state {
                events.push(EventPayload::DevServerStateChanged {
                    is_running: server_state.is_running,
                    port: server_state.port,
                });
                ctx.server_state = Some(server_state);
                fields.push("server_state".to_string());
            }

            // A running dev server without a live sandbox is inconsistent.
            if ctx
                .server_state
                .as_ref()
                .map(|s| s.is_running)
                .unwrap_or(false)
                && ctx.sandbox_id.is_none()
            {
                return Err(Error::StateConflict(
                    "server_state.is_running requires a sandbox_id".into(),
                ));
            }

            events.insert(0, EventPayload::ProjectUpdated { fields });
            Ok(events)
        })
        .await
    }

    /// Record a tool execution in the bounded ring.
    pub async fn append_tool_execution(
        &self,
        project_id: &str,
        exec: ToolExecution,
    ) -> Result<()> {
        let cap = self.config.max_tool_history;
        self.mutate(project_id, move |ctx| {
            let event = EventPayload::ToolExecuted {
                name: exec.name.clone(),
                success: exec.success,
            };
            ctx.push_tool_execution(exec, cap);
            Ok(vec![event])
        })
        .await
    }

    /// Record an error string in the bounded ring.
    pub async fn append_error(&self, project_id: &str, msg: impl Into<String>) -> Result<()> {
        let cap = self.config.max_error_history;
        let msg = msg.into();
        self.mutate(project_id, move |ctx| {
            ctx.push_error(msg, cap);
            Ok(vec![])
        })
        .await
    }

    /// Install a new task graph (validated: known dependencies, acyclic).
    pub async fn set_task_graph(&self, project_id: &str, graph: TaskGraph) -> Result<()> {
        graph.validate()?;
        self.mutate(project_id, move |ctx| {
            ctx.task_graph = Some(graph);
            ctx.completed_steps.clear();
            Ok(vec![EventPayload::ProjectUpdated {
                fields: vec!["task_graph".to_string()],
            }])
        })
        .await
    }

    /// Update one task's status. A task may become `running` only when all
    /// of its dependencies are `completed`.
    pub async fn update_task_status(
        &self,
        project_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<()> {
        let task_id = task_id.to_owned();
        self.mutate(project_id, move |ctx| {
            let graph = ctx
                .task_graph
                .as_mut()
                .ok_or_else(|| Error::NotFound("no task graph planned".into()))?;
            if graph.get(&task_id).is_none() {
                return Err(Error::NotFound(format!("unknown task '{task_id}'")));
            }
            if status == TaskStatus::Running && !graph.dependencies_completed(&task_id) {
                return Err(Error::StateConflict(format!(
                    "task '{task_id}' has incomplete dependencies"
                )));
            }
            if let Some(task) = graph.get_mut(&task_id) {
                task.status = status;
            }
            Ok(vec![EventPayload::ProjectUpdated {
                fields: vec!["task_graph".to_string()],
            }])
        })
        .await
    }

    /// Mark a task completed and append it to the completed-steps log.
    pub async fn mark_step_complete(&self, project_id: &str, task_id: &str) -> Result<()> {
        let task_id = task_id.to_owned();
        self.mutate(project_id, move |ctx| {
            let graph = ctx
                .task_graph
                .as_mut()
                .ok_or_else(|| Error::NotFound("no task graph planned".into()))?;
            let task = graph
                .get_mut(&task_id)
                .ok_or_else(|| Error::NotFound(format!("unknown task '{task_id}'")))?;
            task.status = TaskStatus::Completed;
            if !ctx.completed_steps.contains(&task_id) {
                ctx.completed_steps.push(task_id.clone());
            }
            Ok(vec![EventPayload::ProjectUpdated {
                fields: vec!["task_graph".to_string(), "completed_steps".to_string()],
            }])
        })
        .await
    }

    /// Re-persist the current snapshot, overwriting the durable row.
    pub async fn persist(&self, project_id: &str) -> Result<()> {
        self.mutate(project_id, |_| Ok(vec![])).await
    }

    /// Drop the memory entry; the next `get` round-trips the durable store.
    pub async fn invalidate(&self, project_id: &str) {
        self.cache.write().remove(project_id);
        self.bus.publish(project_id, EventPayload::ContextChanged);
    }

    // ── Event bus passthrough ─────────────────────────────────────

    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        self.bus.subscribe(filter)
    }

    pub fn subscribe_handler<F>(&self, filter: EventFilter, handler: F) -> Subscription
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.bus.subscribe_handler(filter, handler)
    }

    pub async fn wait_for_event(&self, filter: EventFilter, timeout: Duration) -> Result<Event> {
        self.bus.wait_for_event(filter, timeout).await
    }

    pub fn recent_events(&self) -> Vec<Event> {
        self.bus.recent_events()
    }
}
