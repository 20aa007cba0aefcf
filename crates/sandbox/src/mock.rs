//! In-memory VM provider.
//!
//! Simulates enough of a VM to exercise the whole core without a real
//! provider: a filesystem, port bindings, a dev-server that writes its
//! `Local:` line into the log file, and scriptable create/connect
//! failures. Used by the test suites and local runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use wf_domain::error::{Error, Result};

use crate::provider::{ExecOpts, ExecOutcome, VmHandle, VmProvider};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct MockVmProvider {
    vms: Mutex<HashMap<String, Arc<MockVm>>>,
    expired: Mutex<HashSet<String>>,
    /// Ports held by a foreign (non-HTTP, unkillable) process in every
    /// newly created VM.
    busy_ports: Mutex<HashSet<u16>>,
    fail_creates: AtomicU32,
    created_count: AtomicUsize,
}

impl MockVmProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` create calls fail with `ProviderUnavailable`.
    pub fn fail_next_creates(&self, n: u32) {
        self.fail_creates.store(n, Ordering::SeqCst);
    }

    /// Pre-occupy a port in every VM created afterwards. The occupant is
    /// a foreign process: it does not answer HTTP probes and survives
    /// `fuser -k`, so the dev server must bind elsewhere.
    pub fn with_busy_port(self, port: u16) -> Self {
        self.busy_ports.lock().insert(port);
        self
    }

    /// Expire a VM: subsequent `connect` calls return `NotFound`.
    pub fn expire(&self, sandbox_id: &str) {
        self.expired.lock().insert(sandbox_id.to_owned());
        self.vms.lock().remove(sandbox_id);
    }

    pub fn created_count(&self) -> usize {
        self.created_count.load(Ordering::SeqCst)
    }

    pub fn vm(&self, sandbox_id: &str) -> Option<Arc<MockVm>> {
        self.vms.lock().get(sandbox_id).cloned()
    }
}

#[async_trait::async_trait]
impl VmProvider for MockVmProvider {
    async fn create(
        &self,
        _template_id: Option<&str>,
        _timeout: Duration,
    ) -> Result<Arc<dyn VmHandle>> {
        let remaining = self.fail_creates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_creates.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::ProviderUnavailable("vm provider is down".into()));
        }
        let n = self.created_count.fetch_add(1, Ordering::SeqCst);
        let vm = Arc::new(MockVm::new(format!("mock-vm-{n}")));
        for port in self.busy_ports.lock().iter() {
            vm.foreign.lock().insert(*port);
        }
        self.vms.lock().insert(vm.id.clone(), vm.clone());
        Ok(vm)
    }

    async fn connect(&self, sandbox_id: &str, _timeout: Duration) -> Result<Arc<dyn VmHandle>> {
        if self.expired.lock().contains(sandbox_id) {
            return Err(Error::NotFound(format!("sandbox '{sandbox_id}' has expired")));
        }
        match self.vms.lock().get(sandbox_id) {
            Some(vm) => Ok(vm.clone()),
            None => Err(Error::NotFound(format!("unknown sandbox '{sandbox_id}'"))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct MockVm {
    id: String,
    files: Mutex<BTreeMap<String, String>>,
    listening: Mutex<HashSet<u16>>,
    /// Foreign-process ports: occupied but not probe-responsive.
    foreign: Mutex<HashSet<u16>>,
    /// background handle id → port bound by that process (if any).
    background: Mutex<HashMap<String, Option<u16>>>,
    paused: AtomicBool,
    broken_dev: AtomicBool,
    exec_log: Mutex<Vec<String>>,
    dev_starts: AtomicUsize,
    next_handle: AtomicUsize,
}

impl MockVm {
    fn new(id: String) -> Self {
        Self {
            id,
            files: Mutex::new(BTreeMap::new()),
            listening: Mutex::new(HashSet::new()),
            foreign: Mutex::new(HashSet::new()),
            background: Mutex::new(HashMap::new()),
            paused: AtomicBool::new(false),
            broken_dev: AtomicBool::new(false),
            exec_log: Mutex::new(Vec::new()),
            dev_starts: AtomicUsize::new(0),
            next_handle: AtomicUsize::new(0),
        }
    }

    pub fn bind_port(&self, port: u16) {
        self.listening.lock().insert(port);
    }

    pub fn is_listening(&self, port: u16) -> bool {
        self.listening.lock().contains(&port)
    }

    fn is_occupied(&self, port: u16) -> bool {
        self.is_listening(port) || self.foreign.lock().contains(&port)
    }

    /// Make subsequent dev-server starts crash on boot: nothing binds and
    /// the log fills with a module-resolution error.
    pub fn break_dev(&self) {
        self.broken_dev.store(true, Ordering::SeqCst);
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().get(path).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    /// How many times a dev server was started in this VM.
    pub fn dev_start_count(&self) -> usize {
        self.dev_starts.load(Ordering::SeqCst)
    }

    pub fn commands_run(&self) -> Vec<String> {
        self.exec_log.lock().clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn background_count(&self) -> usize {
        self.background.lock().len()
    }

    fn ok(stdout: impl Into<String>) -> ExecOutcome {
        ExecOutcome {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
            duration_ms: 1,
            timed_out: false,
        }
    }

    fn fail(exit_code: i32, stderr: impl Into<String>) -> ExecOutcome {
        ExecOutcome {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
            duration_ms: 1,
            timed_out: false,
        }
    }
}

fn parse_port(command: &str, marker: &str) -> Option<u16> {
    let idx = command.find(marker)? + marker.len();
    let digits: String = command[idx..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[async_trait::async_trait]
impl VmHandle for MockVm {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exec(&self, command: &str, _opts: ExecOpts) -> Result<ExecOutcome> {
        self.exec_log.lock().push(command.to_owned());

        // Simulated long-running command: `sleep N` blocks for N seconds.
        if let Some(rest) = command.strip_prefix("sleep ") {
            let secs: u64 = rest.trim().parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_secs(secs)).await;
            return Ok(Self::ok(""));
        }

        // Port probe: `curl ... http://localhost:NNNN`.
        if command.contains("curl") {
            if let Some(port) = parse_port(command, "localhost:") {
                return Ok(if self.is_listening(port) {
                    Self::ok("")
                } else {
                    Self::fail(7, "connection refused")
                });
            }
        }

        // Kill a port listener: `fuser -k NNNN/tcp`. Foreign processes
        // are out of reach.
        if command.starts_with("fuser") {
            if let Some(port) = parse_port(command, "-k ") {
                let existed = self.listening.lock().remove(&port);
                return Ok(if existed {
                    Self::ok("")
                } else {
                    Self::fail(1, "")
                });
            }
        }

        // Log tail: `tail -n N <path>`.
        if let Some(rest) = command.strip_prefix("tail -n ") {
            let mut parts = rest.splitn(2, ' ');
            let n: usize = parts.next().unwrap_or("0").parse().unwrap_or(0);
            let path = parts.next().unwrap_or("").trim();
            let content = self.files.lock().get(path).cloned().unwrap_or_default();
            let lines: Vec<&str> = content.lines().collect();
            let start = lines.len().saturating_sub(n);
            return Ok(Self::ok(lines[start..].join("\n")));
        }

        // Truncate a file: `: > <path>`.
        if let Some(path) = command.strip_prefix(": > ") {
            self.files.lock().insert(path.trim().to_owned(), String::new());
            return Ok(Self::ok(""));
        }

        // File tree: `find . -type f`.
        if command.starts_with("find") {
            let listing = self.files.lock().keys().cloned().collect::<Vec<_>>().join("\n");
            return Ok(Self::ok(listing));
        }

        // Everything else (echo ok, installs, rm, mkdir) succeeds.
        Ok(Self::ok(""))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.files.lock().insert(path.to_owned(), content.to_owned());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no such file: {path}")))
    }

    async fn start_background(&self, command: &str, _cwd: Option<&str>) -> Result<String> {
        let handle_id = format!(
            "{}-proc-{}",
            self.id,
            self.next_handle.fetch_add(1, Ordering::SeqCst)
        );

        // A dev command binds the lowest free port in the dev range and
        // writes the readiness line into its redirected log file.
        let mut bound = None;
        if command.contains("run dev") {
            let log_path = command
                .split("> ")
                .nth(1)
                .and_then(|rest| rest.split_whitespace().next())
                .unwrap_or("/tmp/dev-server.log")
                .to_owned();

            if self.broken_dev.load(Ordering::SeqCst) {
                self.files.lock().entry(log_path).or_default().push_str(
                    "$ npm run dev\nError: Cannot find module 'next'\n    at Function._resolveFilename\n",
                );
            } else {
                self.dev_starts.fetch_add(1, Ordering::SeqCst);
                let port = (3000..=3005)
                    .find(|p| !self.is_occupied(*p))
                    .ok_or_else(|| Error::Internal("no free port in mock vm".into()))?;
                self.bind_port(port);
                bound = Some(port);
                self.files.lock().entry(log_path).or_default().push_str(&format!(
                    "$ {command}\n  ▲ Next.js 15.0.0\n  - Local: http://localhost:{port}\n ✓ Ready in 1.2s\n"
                ));
            }
        }

        self.background.lock().insert(handle_id.clone(), bound);
        Ok(handle_id)
    }

    async fn kill(&self, handle_id: &str) -> Result<bool> {
        match self.background.lock().remove(handle_id) {
            Some(port) => {
                if let Some(port) = port {
                    self.listening.lock().remove(&port);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn host_url(&self, port: u16) -> String {
        format!("https://{port}-{}.mock-vm.dev", self.id)
    }

    async fn pause(&self) -> Result<()> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_connect_round_trip() {
        let provider = MockVmProvider::new();
        let vm = provider.create(None, Duration::from_secs(1)).await.unwrap();
        let again = provider
            .connect(vm.id(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(vm.id(), again.id());
    }

    #[tokio::test]
    async fn expired_vm_connect_is_not_found() {
        let provider = MockVmProvider::new();
        let vm = provider.create(None, Duration::from_secs(1)).await.unwrap();
        provider.expire(vm.id());
        let err = provider
            .connect(vm.id(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), wf_domain::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn dev_command_binds_lowest_free_port() {
        let provider = MockVmProvider::new().with_busy_port(3000);
        let vm = provider.create(None, Duration::from_secs(1)).await.unwrap();
        vm.start_background("npm run dev > /tmp/dev-server.log 2>&1", None)
            .await
            .unwrap();
        let mock = provider.vm(vm.id()).unwrap();
        assert!(mock.is_listening(3001));
        let log = mock.file("/tmp/dev-server.log").unwrap();
        assert!(log.contains("http://localhost:3001"));
    }

    #[tokio::test]
    async fn foreign_port_fails_probe_and_survives_fuser() {
        let provider = MockVmProvider::new().with_busy_port(3000);
        let vm = provider.create(None, Duration::from_secs(1)).await.unwrap();
        let probe = vm
            .exec("curl -sf -o /dev/null http://localhost:3000", ExecOpts::default())
            .await
            .unwrap();
        assert_ne!(probe.exit_code, 0);
        vm.exec("fuser -k 3000/tcp", ExecOpts::default()).await.unwrap();
        // Still occupied: a later dev start must skip it.
        vm.start_background("npm run dev > /tmp/dev-server.log 2>&1", None)
            .await
            .unwrap();
        let mock = provider.vm(vm.id()).unwrap();
        assert!(mock.is_listening(3001));
    }

    #[tokio::test]
    async fn broken_dev_writes_errors_and_binds_nothing() {
        let provider = MockVmProvider::new();
        let vm = provider.create(None, Duration::from_secs(1)).await.unwrap();
        provider.vm(vm.id()).unwrap().break_dev();
        vm.start_background("npm run dev > /tmp/dev-server.log 2>&1", None)
            .await
            .unwrap();
        let mock = provider.vm(vm.id()).unwrap();
        assert!(!mock.is_listening(3000));
        assert!(mock.file("/tmp/dev-server.log").unwrap().contains("Cannot find module"));
    }

    #[tokio::test]
    async fn curl_probe_reflects_bindings() {
        let provider = MockVmProvider::new();
        let vm = provider.create(None, Duration::from_secs(1)).await.unwrap();
        let miss = vm
            .exec("curl -sf -o /dev/null http://localhost:3000", ExecOpts::default())
            .await
            .unwrap();
        assert_ne!(miss.exit_code, 0);
        provider.vm(vm.id()).unwrap().bind_port(3000);
        let hit = vm
            .exec("curl -sf -o /dev/null http://localhost:3000", ExecOpts::default())
            .await
            .unwrap();
        assert_eq!(hit.exit_code, 0);
    }

    #[tokio::test]
    async fn kill_releases_the_dev_port() {
        let provider = MockVmProvider::new();
        let vm = provider.create(None, Duration::from_secs(1)).await.unwrap();
        let handle = vm
            .start_background("npm run dev > /tmp/dev-server.log 2>&1", None)
            .await
            .unwrap();
        let mock = provider.vm(vm.id()).unwrap();
        assert!(mock.is_listening(3000));
        assert!(vm.kill(&handle).await.unwrap());
        assert!(!mock.is_listening(3000));
        assert!(!vm.kill(&handle).await.unwrap());
    }
}
