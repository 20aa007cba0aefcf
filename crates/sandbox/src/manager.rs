//! Sandbox manager — drives the per-project state machine against the VM
//! provider: ensure/connect/create, snapshot restoration, command exec,
//! and background process handles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use wf_context::bus::EventPayload;
use wf_context::types::{ContextPatch, ProjectContext, ServerState};
use wf_context::ContextStore;
use wf_domain::cancel::CancelToken;
use wf_domain::config::{ExecConfig, SandboxConfig};
use wf_domain::error::{Error, ErrorKind, Result};

use crate::machine::{SandboxEvent, SandboxRecord, SandboxState};
use crate::pkg::PackageManager;
use crate::provider::{ExecOpts, ExecOutcome, VmHandle, VmProvider};

pub struct SandboxManager {
    sandbox_cfg: SandboxConfig,
    exec_cfg: ExecConfig,
    provider: Arc<dyn VmProvider>,
    context: Arc<ContextStore>,
    records: Mutex<HashMap<String, SandboxRecord>>,
    handles: Mutex<HashMap<String, Arc<dyn VmHandle>>>,
    /// (project_id, purpose) → provider background handle id.
    background: Mutex<HashMap<(String, String), String>>,
    /// Per-project dedupe: concurrent `ensure_sandbox` calls share one
    /// attempt instead of racing the provider.
    ensure_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SandboxManager {
    pub fn new(
        sandbox_cfg: SandboxConfig,
        exec_cfg: ExecConfig,
        provider: Arc<dyn VmProvider>,
        context: Arc<ContextStore>,
    ) -> Self {
        Self {
            sandbox_cfg,
            exec_cfg,
            provider,
            context,
            records: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            background: Mutex::new(HashMap::new()),
            ensure_locks: Mutex::new(HashMap::new()),
        }
    }

    // ── Record access ─────────────────────────────────────────────

    pub fn state(&self, project_id: &str) -> SandboxState {
        self.records
            .lock()
            .get(project_id)
            .map(|r| r.state)
            .unwrap_or(SandboxState::Idle)
    }

    pub fn record(&self, project_id: &str) -> SandboxRecord {
        self.records
            .lock()
            .entry(project_id.to_owned())
            .or_default()
            .clone()
    }

    pub fn handle_for(&self, project_id: &str) -> Option<Arc<dyn VmHandle>> {
        self.handles.lock().get(project_id).cloned()
    }

    /// Public URL the project's VM maps to a port.
    pub fn host_url(&self, project_id: &str, port: u16) -> Result<String> {
        let handle = self
            .handle_for(project_id)
            .ok_or_else(|| Error::NotFound(format!("no active sandbox for '{project_id}'")))?;
        Ok(handle.host_url(port))
    }

    /// Apply a lifecycle event atomically and publish the new state.
    pub fn transition(&self, project_id: &str, event: SandboxEvent) -> Result<SandboxState> {
        let next = {
            let mut records = self.records.lock();
            let record = records.entry(project_id.to_owned()).or_default();
            record.apply(event, self.sandbox_cfg.max_retries)?
        };
        tracing::info!(project_id, state = %next, "sandbox transition");
        self.context.bus().publish(
            project_id,
            EventPayload::SandboxStateChanged {
                state: next.to_string(),
            },
        );
        Ok(next)
    }

    fn ensure_lock(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.ensure_locks
            .lock()
            .entry(project_id.to_owned())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // ── Ensure ────────────────────────────────────────────────────

    /// Return a live VM handle for the project, creating or reconnecting
    /// as needed and restoring the file snapshot onto fresh VMs.
    pub async fn ensure_sandbox(&self, project_id: &str) -> Result<Arc<dyn VmHandle>> {
        let lock = self.ensure_lock(project_id);
        let _guard = lock.lock().await;

        let ctx = self.context.get(project_id).await?;

        // 1. Active with a handle that answers the liveness probe: done.
        if self.state(project_id) == SandboxState::Active {
            if let Some(handle) = self.handle_for(project_id) {
                if self.is_alive(handle.as_ref()).await {
                    return Ok(handle);
                }
                tracing::warn!(project_id, "active sandbox failed liveness probe");
                self.handles.lock().remove(project_id);
            }
            self.transition(project_id, SandboxEvent::Expire)?;
        }

        let persisted_id = self
            .record(project_id)
            .sandbox_id
            .or_else(|| ctx.sandbox_id.clone());

        // 2. Paused: reconnect and resume in place.
        if self.state(project_id) == SandboxState::Paused {
            match &persisted_id {
                Some(id) => {
                    match self
                        .provider
                        .connect(id, Duration::from_millis(self.sandbox_cfg.connect_timeout_ms))
                        .await
                    {
                        Ok(handle) => {
                            handle.resume().await?;
                            self.transition(project_id, SandboxEvent::Resume)?;
                            self.handles
                                .lock()
                                .insert(project_id.to_owned(), handle.clone());
                            return Ok(handle);
                        }
                        Err(e) if e.kind() == ErrorKind::NotFound => {
                            // The paused VM is gone; surface as expiry, then recreate.
                            self.transition(project_id, SandboxEvent::Expire)?;
                        }
                        Err(e) => return Err(e),
                    }
                }
                None => {
                    self.transition(project_id, SandboxEvent::Expire)?;
                }
            }
        }

        // 3. Enter `creating` (RETRY increments the counter and enforces
        //    the cap; a capped machine refuses here with StateConflict).
        match self.state(project_id) {
            SandboxState::Error => {
                self.transition(project_id, SandboxEvent::Retry)?;
            }
            SandboxState::Idle | SandboxState::Expired => {
                self.transition(project_id, SandboxEvent::Create)?;
            }
            SandboxState::Creating => {}
            other => {
                return Err(Error::StateConflict(format!(
                    "cannot acquire sandbox from state {other}"
                )));
            }
        }

        // 4. A persisted sandbox id may still point at a live VM.
        if let Some(id) = persisted_id {
            let connected = self
                .provider
                .connect(&id, Duration::from_millis(self.sandbox_cfg.connect_timeout_ms))
                .await;
            match connected {
                Ok(handle) => {
                    if self.is_alive(handle.as_ref()).await {
                        return self.finish_acquisition(project_id, handle, false).await;
                    }
                    tracing::debug!(project_id, sandbox_id = %id, "stored sandbox not responding, creating fresh");
                }
                Err(e) => {
                    tracing::debug!(project_id, sandbox_id = %id, error = %e, "stored sandbox unusable, creating fresh");
                }
            }
        }

        // 5. Fresh VM.
        let handle = match self
            .provider
            .create(
                self.sandbox_cfg.vm_template_id.as_deref(),
                Duration::from_millis(self.sandbox_cfg.create_timeout_ms),
            )
            .await
        {
            Ok(h) => h,
            Err(e) => {
                self.transition(
                    project_id,
                    SandboxEvent::Error {
                        message: e.to_string(),
                    },
                )?;
                return Err(e);
            }
        };

        // 6. Restore the snapshot before the machine goes active.
        if !ctx.files.is_empty() {
            if let Err(e) = self.restore_snapshot(handle.as_ref(), &ctx).await {
                self.transition(
                    project_id,
                    SandboxEvent::Error {
                        message: e.to_string(),
                    },
                )?;
                return Err(e);
            }
        }

        self.finish_acquisition(project_id, handle, true).await
    }

    /// Shared tail of the connect/create paths: transition to active,
    /// persist the handle id into the context, and cache the handle.
    async fn finish_acquisition(
        &self,
        project_id: &str,
        handle: Arc<dyn VmHandle>,
        freshly_created: bool,
    ) -> Result<Arc<dyn VmHandle>> {
        let sandbox_id = handle.id().to_string();
        let sandbox_url = handle.host_url(3000);
        self.transition(
            project_id,
            SandboxEvent::Created {
                sandbox_id: sandbox_id.clone(),
                sandbox_url: Some(sandbox_url),
            },
        )?;
        self.context
            .update(
                project_id,
                ContextPatch {
                    sandbox_id: Some(Some(sandbox_id)),
                    ..Default::default()
                },
            )
            .await?;
        self.handles
            .lock()
            .insert(project_id.to_owned(), handle.clone());
        tracing::info!(project_id, freshly_created, "sandbox ready");
        Ok(handle)
    }

    async fn is_alive(&self, handle: &dyn VmHandle) -> bool {
        let deadline = Duration::from_millis(self.sandbox_cfg.liveness_timeout_ms);
        let probe = handle.exec(
            "echo ok",
            ExecOpts {
                cwd: None,
                timeout_ms: Some(self.sandbox_cfg.liveness_timeout_ms),
            },
        );
        matches!(tokio::time::timeout(deadline, probe).await, Ok(Ok(o)) if o.success())
    }

    // ── Snapshot restoration ──────────────────────────────────────

    /// Write every tracked file onto the VM, then install dependencies
    /// with the package manager detected from the lockfiles. Idempotent:
    /// rewriting identical files is a no-op for dependency detection.
    async fn restore_snapshot(&self, handle: &dyn VmHandle, ctx: &ProjectContext) -> Result<usize> {
        use wf_context::types::FileStatus;

        let writes: Vec<_> = ctx
            .files
            .iter()
            .filter(|(_, state)| state.status != FileStatus::Deleted)
            .map(|(path, state)| {
                let abs = format!("{}/{}", ctx.project_dir, path);
                async move { handle.write_file(&abs, &state.content).await }
            })
            .collect();
        let count = writes.len();
        futures_util::future::try_join_all(writes).await?;

        let has_manifest = ctx.files.contains_key("package.json");
        if has_manifest || !ctx.dependencies.is_empty() {
            let pm = PackageManager::detect(ctx.files.keys().map(String::as_str));
            let outcome = handle
                .exec(
                    pm.install_command(),
                    ExecOpts {
                        cwd: Some(ctx.project_dir.clone()),
                        timeout_ms: Some(self.sandbox_cfg.install_timeout_ms),
                    },
                )
                .await?;
            if outcome.timed_out {
                return Err(Error::Timeout("dependency install timed out".into()));
            }
            if !outcome.success() {
                return Err(Error::Internal(format!(
                    "dependency install failed: {}",
                    outcome.stderr
                )));
            }
        }

        tracing::info!(files = count, "snapshot restored");
        Ok(count)
    }

    // ── Command execution ─────────────────────────────────────────

    /// Run a command in the project's sandbox. Default cwd is the project
    /// directory; default timeout comes from config. Timeouts come back as
    /// data (`timed_out`), not errors.
    pub async fn exec(
        &self,
        project_id: &str,
        command: &str,
        cwd: Option<String>,
        timeout_ms: Option<u64>,
    ) -> Result<ExecOutcome> {
        let handle = self
            .handle_for(project_id)
            .ok_or_else(|| Error::NotFound(format!("no active sandbox for '{project_id}'")))?;
        let ctx = self.context.get(project_id).await?;
        let opts = ExecOpts {
            cwd: cwd.or(Some(ctx.project_dir.clone())),
            timeout_ms: Some(timeout_ms.unwrap_or(self.exec_cfg.default_timeout_ms)),
        };
        handle.exec(command, opts).await
    }

    /// Like [`Self::exec`], but races the command against a cancellation
    /// token: the in-flight provider call is dropped and an error comes
    /// back the moment the token fires. This is how a cancelled turn
    /// reaches into a tool's running sandbox command.
    pub async fn exec_with_cancel(
        &self,
        project_id: &str,
        command: &str,
        cwd: Option<String>,
        timeout_ms: Option<u64>,
        cancel: &CancelToken,
    ) -> Result<ExecOutcome> {
        tokio::select! {
            result = self.exec(project_id, command, cwd, timeout_ms) => result,
            _ = cancel.cancelled() => {
                tracing::debug!(project_id, command, "command cancelled");
                Err(Error::Internal(format!("command cancelled: {command}")))
            }
        }
    }

    // ── Background processes ──────────────────────────────────────

    /// Start (or replace) the background process for `(project, purpose)`.
    pub async fn start_background(
        &self,
        project_id: &str,
        purpose: &str,
        command: &str,
        working_dir: Option<&str>,
    ) -> Result<String> {
        let handle = self
            .handle_for(project_id)
            .ok_or_else(|| Error::NotFound(format!("no active sandbox for '{project_id}'")))?;

        self.kill_background(project_id, purpose).await?;

        let proc_id = handle.start_background(command, working_dir).await?;
        self.background.lock().insert(
            (project_id.to_owned(), purpose.to_owned()),
            proc_id.clone(),
        );
        tracing::debug!(project_id, purpose, proc_id, "background process started");
        Ok(proc_id)
    }

    /// Kill the background process for `(project, purpose)`.
    /// Returns whether a handle existed.
    pub async fn kill_background(&self, project_id: &str, purpose: &str) -> Result<bool> {
        let entry = self
            .background
            .lock()
            .remove(&(project_id.to_owned(), purpose.to_owned()));
        let Some(proc_id) = entry else {
            return Ok(false);
        };
        if let Some(handle) = self.handle_for(project_id) {
            let _ = handle.kill(&proc_id).await;
        }
        Ok(true)
    }

    // ── Pause / cleanup ───────────────────────────────────────────

    /// Pause the project's VM. The snapshot stays on the provider side;
    /// `ensure_sandbox` resumes it.
    pub async fn pause(&self, project_id: &str) -> Result<()> {
        let handle = self
            .handle_for(project_id)
            .ok_or_else(|| Error::NotFound(format!("no active sandbox for '{project_id}'")))?;
        handle.pause().await?;
        self.transition(project_id, SandboxEvent::Pause)?;
        self.handles.lock().remove(project_id);
        Ok(())
    }

    /// Mark the sandbox expired (the VM aged out on the provider side).
    pub fn mark_expired(&self, project_id: &str) -> Result<()> {
        self.handles.lock().remove(project_id);
        self.transition(project_id, SandboxEvent::Expire)?;
        Ok(())
    }

    /// Tear everything down: background processes, the VM handle, and the
    /// machine back to `idle`. Clears the persisted sandbox id.
    pub async fn cleanup(&self, project_id: &str) -> Result<()> {
        let purposes: Vec<String> = self
            .background
            .lock()
            .keys()
            .filter(|(pid, _)| pid == project_id)
            .map(|(_, purpose)| purpose.clone())
            .collect();
        for purpose in purposes {
            let _ = self.kill_background(project_id, &purpose).await;
        }

        self.handles.lock().remove(project_id);
        self.transition(project_id, SandboxEvent::Cleanup)?;

        let ctx = self.context.get(project_id).await?;
        let server_state = ctx.server_state.as_ref().and_then(|s| {
            s.is_running.then(|| ServerState {
                is_running: false,
                port: None,
                url: None,
                started_at: None,
            })
        });
        let patch = ContextPatch {
            sandbox_id: Some(None),
            server_state,
            ..Default::default()
        };
        match self.context.update(project_id, patch).await {
            Ok(()) => {}
            // A project that was never persisted has nothing to clear.
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }
}
