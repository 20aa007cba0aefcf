//! The per-project sandbox state machine.
//!
//! Transitions are table-driven; anything not in the table is rejected
//! with a `StateConflict` and no side effects. Counters and metadata move
//! with the transitions: `RETRY` increments `retry_count`, entering
//! `active` resets it, entering `idle` clears everything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wf_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// States and events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    Idle,
    Creating,
    Active,
    Paused,
    Expired,
    Error,
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SandboxState::Idle => "idle",
            SandboxState::Creating => "creating",
            SandboxState::Active => "active",
            SandboxState::Paused => "paused",
            SandboxState::Expired => "expired",
            SandboxState::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SandboxEvent {
    Create,
    Created {
        sandbox_id: String,
        sandbox_url: Option<String>,
    },
    Error {
        message: String,
    },
    Pause,
    Resume,
    Expire,
    Retry,
    Cleanup,
}

impl SandboxEvent {
    fn name(&self) -> &'static str {
        match self {
            SandboxEvent::Create => "CREATE",
            SandboxEvent::Created { .. } => "CREATED",
            SandboxEvent::Error { .. } => "ERROR",
            SandboxEvent::Pause => "PAUSE",
            SandboxEvent::Resume => "RESUME",
            SandboxEvent::Expire => "EXPIRE",
            SandboxEvent::Retry => "RETRY",
            SandboxEvent::Cleanup => "CLEANUP",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The tracked lifecycle record for one project's sandbox.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxRecord {
    pub state: SandboxState,
    pub sandbox_id: Option<String>,
    pub sandbox_url: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub created_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
}

impl Default for SandboxRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxRecord {
    pub fn new() -> Self {
        Self {
            state: SandboxState::Idle,
            sandbox_id: None,
            sandbox_url: None,
            error: None,
            retry_count: 0,
            created_at: None,
            paused_at: None,
            last_activity: Utc::now(),
        }
    }

    /// Apply an event. Returns the new state, or `StateConflict` for any
    /// (state, event) pair outside the legal table — the record is left
    /// untouched in that case.
    pub fn apply(&mut self, event: SandboxEvent, max_retries: u32) -> Result<SandboxState> {
        use SandboxEvent as E;
        use SandboxState as S;

        let next = match (self.state, &event) {
            (S::Idle, E::Create) => S::Creating,
            (S::Creating, E::Created { .. }) => S::Active,
            (S::Creating, E::Error { .. }) => S::Error,
            (S::Active, E::Pause) => S::Paused,
            (S::Active, E::Expire) => S::Expired,
            (S::Active, E::Error { .. }) => S::Error,
            (S::Active, E::Cleanup) => S::Idle,
            (S::Paused, E::Resume) => S::Active,
            (S::Paused, E::Expire) => S::Expired,
            (S::Paused, E::Cleanup) => S::Idle,
            (S::Expired, E::Create) => S::Creating,
            (S::Expired, E::Cleanup) => S::Idle,
            (S::Error, E::Retry) => {
                if self.retry_count >= max_retries {
                    return Err(Error::StateConflict(format!(
                        "retry limit reached ({max_retries}); CLEANUP required"
                    )));
                }
                S::Creating
            }
            (S::Error, E::Cleanup) => S::Idle,
            (state, event) => {
                return Err(Error::StateConflict(format!(
                    "event {} is not legal in state {state}",
                    event.name()
                )));
            }
        };

        match &event {
            E::Retry => self.retry_count += 1,
            E::Created {
                sandbox_id,
                sandbox_url,
            } => {
                self.sandbox_id = Some(sandbox_id.clone());
                self.sandbox_url = sandbox_url.clone();
                self.error = None;
                self.created_at = Some(Utc::now());
            }
            E::Error { message } => self.error = Some(message.clone()),
            E::Pause => self.paused_at = Some(Utc::now()),
            E::Resume => self.paused_at = None,
            _ => {}
        }

        match next {
            SandboxState::Active => self.retry_count = 0,
            SandboxState::Idle => {
                self.sandbox_id = None;
                self.sandbox_url = None;
                self.error = None;
                self.retry_count = 0;
                self.created_at = None;
                self.paused_at = None;
            }
            _ => {}
        }

        self.state = next;
        self.last_activity = Utc::now();
        Ok(next)
    }
}
