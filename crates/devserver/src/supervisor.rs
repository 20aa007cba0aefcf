//! Dev-server supervisor.
//!
//! One background `dev` process per project, discovered through a parallel
//! port scan. Status reads are absorbed by a short-TTL cache; concurrent
//! start requests for the same project collapse onto a single attempt.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use wf_context::types::{ContextPatch, ServerState};
use wf_context::ContextStore;
use wf_domain::config::DevServerConfig;
use wf_domain::error::{Error, ErrorKind, Result};
use wf_sandbox::{PackageManager, SandboxManager};

use crate::logs;

/// The purpose key the supervisor registers its background process under.
const DEV_PURPOSE: &str = "dev";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status / outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct DevServerStatus {
    pub is_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub errors: Vec<String>,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub url: String,
    pub port: u16,
}

struct CachedStatus {
    status: DevServerStatus,
    fetched_at: Instant,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DevServerSupervisor {
    cfg: DevServerConfig,
    sandbox: Arc<SandboxManager>,
    context: Arc<ContextStore>,
    status_cache: Mutex<HashMap<String, CachedStatus>>,
    /// Per-project start dedupe: additional callers await the in-flight
    /// attempt and then observe its result through the fresh probe.
    start_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DevServerSupervisor {
    pub fn new(
        cfg: DevServerConfig,
        sandbox: Arc<SandboxManager>,
        context: Arc<ContextStore>,
    ) -> Self {
        Self {
            cfg,
            sandbox,
            context,
            status_cache: Mutex::new(HashMap::new()),
            start_locks: Mutex::new(HashMap::new()),
        }
    }

    fn start_lock(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.start_locks
            .lock()
            .entry(project_id.to_owned())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // ── Port discovery ────────────────────────────────────────────

    /// Probe every candidate port concurrently; the first responder wins
    /// and the probes still in flight are dropped with it. The set is
    /// polled in port order, so with comparable response times the
    /// lowest listening port answers first.
    async fn probe_ports(&self, project_id: &str) -> Option<u16> {
        let mut probes: FuturesUnordered<_> = self
            .cfg
            .ports
            .iter()
            .map(|port| {
                let port = *port;
                async move {
                    let cmd = format!("curl -sf -o /dev/null http://localhost:{port}");
                    let outcome = self
                        .sandbox
                        .exec(project_id, &cmd, None, Some(self.cfg.probe_timeout_ms))
                        .await;
                    match outcome {
                        Ok(o) if o.success() => Some(port),
                        _ => None,
                    }
                }
            })
            .collect();

        while let Some(result) = probes.next().await {
            if result.is_some() {
                // Dropping the set cancels the losing probes.
                return result;
            }
        }
        None
    }

    /// The last `lines` lines of the dev-server log, empty when there is
    /// no sandbox or no log yet.
    pub async fn log_tail(&self, project_id: &str, lines: usize) -> Vec<String> {
        if self.sandbox.handle_for(project_id).is_none() {
            return Vec::new();
        }
        let cmd = format!("tail -n {lines} {}", self.cfg.log_file);
        match self.sandbox.exec(project_id, &cmd, None, None).await {
            Ok(o) if o.success() => o.stdout.lines().map(str::to_owned).collect(),
            _ => Vec::new(),
        }
    }

    // ── Status ────────────────────────────────────────────────────

    /// Current dev-server status. Served from the per-project cache inside
    /// the TTL window; on a miss the candidate ports are scanned.
    pub async fn status(&self, project_id: &str) -> Result<DevServerStatus> {
        let ttl = Duration::from_millis(self.cfg.status_cache_ttl_ms);
        if let Some(cached) = self.status_cache.lock().get(project_id) {
            if cached.fetched_at.elapsed() < ttl {
                return Ok(cached.status.clone());
            }
        }

        let status = self.probe_status(project_id).await;
        self.status_cache.lock().insert(
            project_id.to_owned(),
            CachedStatus {
                status: status.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(status)
    }

    async fn probe_status(&self, project_id: &str) -> DevServerStatus {
        if self.sandbox.handle_for(project_id).is_none() {
            return DevServerStatus {
                is_running: false,
                port: None,
                url: None,
                errors: Vec::new(),
                last_checked: Utc::now(),
            };
        }

        match self.probe_ports(project_id).await {
            Some(port) => {
                let url = self.sandbox.host_url(project_id, port).ok();
                let tail = self.log_tail(project_id, 50).await;
                DevServerStatus {
                    is_running: true,
                    port: Some(port),
                    url,
                    errors: logs::error_lines(&tail),
                    last_checked: Utc::now(),
                }
            }
            None => DevServerStatus {
                is_running: false,
                port: None,
                url: None,
                errors: Vec::new(),
                last_checked: Utc::now(),
            },
        }
    }

    // ── Start ─────────────────────────────────────────────────────

    /// Start the dev server (or return the one already listening).
    ///
    /// Safe under concurrent invocation for the same project: callers
    /// serialize on a per-project lock, and late arrivals see the running
    /// port instead of spawning a second process.
    pub async fn start(
        &self,
        project_id: &str,
        project_name: Option<&str>,
        force_restart: bool,
    ) -> Result<StartOutcome> {
        let lock = self.start_lock(project_id);
        let _guard = lock.lock().await;

        self.sandbox.ensure_sandbox(project_id).await?;
        if let Some(name) = project_name {
            self.record_project_name(project_id, name).await;
        }

        if !force_restart {
            if let Some(port) = self.probe_ports(project_id).await {
                let url = self.sandbox.host_url(project_id, port)?;
                self.record_running(project_id, port, &url).await?;
                return Ok(StartOutcome { url, port });
            }
        }

        // 1. Clear out any previous dev process and stale listeners.
        self.sandbox.kill_background(project_id, DEV_PURPOSE).await?;
        self.kill_port_listeners(project_id).await;

        // 2. Truncate the log so readiness parsing sees only this run.
        let _ = self
            .sandbox
            .exec(project_id, &format!(": > {}", self.cfg.log_file), None, None)
            .await;

        // 3. Launch the dev command with output redirected to the log.
        let ctx = self.context.get(project_id).await?;
        let pm = PackageManager::detect(ctx.files.keys().map(String::as_str));
        let command = format!("{} > {} 2>&1", pm.dev_command(), self.cfg.log_file);
        self.sandbox
            .start_background(project_id, DEV_PURPOSE, &command, Some(&ctx.project_dir))
            .await?;

        // 4. Poll until a candidate port answers, with the log's
        //    `Local:` line as a fallback source for the port to confirm.
        let deadline = Instant::now() + Duration::from_millis(self.cfg.ready_timeout_ms);
        loop {
            if let Some(port) = self.probe_ports(project_id).await {
                let url = self.sandbox.host_url(project_id, port)?;
                self.record_running(project_id, port, &url).await?;
                tracing::info!(project_id, port, "dev server ready");
                return Ok(StartOutcome { url, port });
            }

            let tail = self.log_tail(project_id, 50).await;
            if let Some(port) = logs::parse_local_url_port(&tail.join("\n")) {
                if self.probe_port(project_id, port).await {
                    let url = self.sandbox.host_url(project_id, port)?;
                    self.record_running(project_id, port, &url).await?;
                    tracing::info!(project_id, port, "dev server ready (log-derived port)");
                    return Ok(StartOutcome { url, port });
                }
            }

            if Instant::now() >= deadline {
                let tail = self
                    .log_tail(project_id, self.cfg.error_log_lines)
                    .await;
                return Err(Error::Timeout(format!(
                    "dev server not ready after {}ms; recent log:\n{}",
                    self.cfg.ready_timeout_ms,
                    tail.join("\n")
                )));
            }
            tokio::time::sleep(Duration::from_millis(self.cfg.poll_interval_ms)).await;
        }
    }

    /// Record a caller-supplied display name into the context. Best
    /// effort: a project that was never persisted is left alone.
    async fn record_project_name(&self, project_id: &str, name: &str) {
        let Ok(ctx) = self.context.get(project_id).await else {
            return;
        };
        if ctx.project_name == name {
            return;
        }
        let patch = ContextPatch {
            project_name: Some(name.to_owned()),
            ..Default::default()
        };
        if let Err(e) = self.context.update(project_id, patch).await {
            tracing::debug!(project_id, error = %e, "project name not recorded");
        }
    }

    async fn probe_port(&self, project_id: &str, port: u16) -> bool {
        let cmd = format!("curl -sf -o /dev/null http://localhost:{port}");
        matches!(
            self.sandbox
                .exec(project_id, &cmd, None, Some(self.cfg.probe_timeout_ms))
                .await,
            Ok(o) if o.success()
        )
    }

    async fn record_running(&self, project_id: &str, port: u16, url: &str) -> Result<()> {
        self.status_cache.lock().remove(project_id);
        self.context
            .update(
                project_id,
                ContextPatch {
                    server_state: Some(ServerState {
                        is_running: true,
                        port: Some(port),
                        url: Some(url.to_owned()),
                        started_at: Some(Utc::now()),
                    }),
                    ..Default::default()
                },
            )
            .await
    }

    // ── Stop ──────────────────────────────────────────────────────

    /// Stop the dev server: kill the background process and any port
    /// listeners, then invalidate the status cache. Idempotent.
    pub async fn stop(&self, project_id: &str) -> Result<()> {
        let existed = self.sandbox.kill_background(project_id, DEV_PURPOSE).await?;
        self.kill_port_listeners(project_id).await;
        self.status_cache.lock().remove(project_id);

        let ctx = self.context.get(project_id).await?;
        if ctx.server_state.as_ref().map(|s| s.is_running).unwrap_or(false) {
            let patch = ContextPatch {
                server_state: Some(ServerState {
                    is_running: false,
                    port: None,
                    url: None,
                    started_at: None,
                }),
                ..Default::default()
            };
            match self.context.update(project_id, patch).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        tracing::debug!(project_id, existed, "dev server stopped");
        Ok(())
    }

    async fn kill_port_listeners(&self, project_id: &str) {
        if self.sandbox.handle_for(project_id).is_none() {
            return;
        }
        for port in &self.cfg.ports {
            let _ = self
                .sandbox
                .exec(project_id, &format!("fuser -k {port}/tcp"), None, Some(2_000))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wf_context::types::{FileState, FileStatus};
    use wf_domain::config::{ContextConfig, ExecConfig, SandboxConfig};
    use wf_sandbox::mock::MockVmProvider;
    use wf_sandbox::VmHandle;
    use wf_storage::{DurableStore, JsonStore, ProjectRow};

    struct Fixture {
        _dir: tempfile::TempDir,
        provider: Arc<MockVmProvider>,
        context: Arc<ContextStore>,
        sandbox: Arc<SandboxManager>,
        supervisor: Arc<DevServerSupervisor>,
    }

    async fn fixture_with(provider: MockVmProvider) -> Fixture {
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
        let provider = Arc::new(provider);
        let sandbox = Arc::new(SandboxManager::new(
            SandboxConfig::default(),
            ExecConfig::default(),
            provider.clone(),
            context.clone(),
        ));
        let supervisor = Arc::new(DevServerSupervisor::new(
            DevServerConfig::default(),
            sandbox.clone(),
            context.clone(),
        ));

        // A minimal project so package-manager detection has something to see.
        let mut files = BTreeMap::new();
        files.insert(
            "package.json".to_string(),
            FileState {
                content: "{\"name\":\"demo\"}".into(),
                language: "json".into(),
                last_modified: Utc::now(),
                status: FileStatus::Created,
            },
        );
        context
            .update(
                "p1",
                ContextPatch {
                    files: Some(files),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        Fixture {
            _dir: dir,
            provider,
            context,
            sandbox,
            supervisor,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(MockVmProvider::new()).await
    }

    #[tokio::test]
    async fn start_reports_port_3000_and_host_url() {
        let fx = fixture().await;
        let outcome = fx.supervisor.start("p1", None, false).await.unwrap();
        assert_eq!(outcome.port, 3000);
        assert!(outcome.url.contains("3000-"));

        let ctx = fx.context.get("p1").await.unwrap();
        let server = ctx.server_state.as_ref().unwrap();
        assert!(server.is_running);
        assert_eq!(server.port, Some(3000));
    }

    #[tokio::test]
    async fn start_falls_back_when_3000_is_busy() {
        let fx = fixture_with(MockVmProvider::new().with_busy_port(3000)).await;
        let outcome = fx.supervisor.start("p1", None, false).await.unwrap();
        assert_eq!(outcome.port, 3001);
        assert!(outcome.url.contains("3001-"));

        let status = fx.supervisor.status("p1").await.unwrap();
        assert_eq!(status.port, Some(3001));
    }

    #[tokio::test]
    async fn concurrent_starts_run_the_dev_command_once() {
        let fx = Arc::new(fixture().await);
        let mut joins = Vec::new();
        for _ in 0..4 {
            let fx = fx.clone();
            joins.push(tokio::spawn(async move {
                fx.supervisor.start("p1", None, false).await
            }));
        }
        for join in joins {
            let outcome = join.await.unwrap().unwrap();
            assert_eq!(outcome.port, 3000);
        }
        let vm = fx.provider.vm(fx.sandbox.handle_for("p1").unwrap().id()).unwrap();
        assert_eq!(vm.dev_start_count(), 1);
    }

    #[tokio::test]
    async fn status_is_cached_within_ttl() {
        let fx = fixture().await;
        fx.supervisor.start("p1", None, false).await.unwrap();

        let first = fx.supervisor.status("p1").await.unwrap();
        assert!(first.is_running);
        assert_eq!(first.port, Some(3000));

        // Unbind behind the cache's back: the cached answer survives the TTL.
        let vm = fx.provider.vm(fx.sandbox.handle_for("p1").unwrap().id()).unwrap();
        vm.exec("fuser -k 3000/tcp", Default::default()).await.unwrap();
        let second = fx.supervisor.status("p1").await.unwrap();
        assert!(second.is_running);
    }

    #[tokio::test]
    async fn status_without_sandbox_is_not_running() {
        let fx = fixture().await;
        let status = fx.supervisor.status("p1").await.unwrap();
        assert!(!status.is_running);
        assert!(status.port.is_none());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let fx = fixture().await;
        fx.supervisor.start("p1", None, false).await.unwrap();
        fx.supervisor.stop("p1").await.unwrap();
        fx.supervisor.stop("p1").await.unwrap();

        let vm = fx.provider.vm(fx.sandbox.handle_for("p1").unwrap().id()).unwrap();
        assert_eq!(vm.background_count(), 0);
        let ctx = fx.context.get("p1").await.unwrap();
        assert!(!ctx.server_state.as_ref().unwrap().is_running);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_timeout_returns_log_tail() {
        let fx = fixture().await;
        let handle = fx.sandbox.ensure_sandbox("p1").await.unwrap();
        fx.provider.vm(handle.id()).unwrap().break_dev();

        let err = fx.supervisor.start("p1", None, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("Cannot find module"));
    }
}
