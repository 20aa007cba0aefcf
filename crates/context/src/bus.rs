//! Context-store-owned event bus.
//!
//! Sandbox, dev-server, and tool components publish here instead of calling
//! back into each other; subscribers (including the request layer's cache
//! invalidators) read without direct cross-calls. Delivery is asynchronous
//! and FIFO per subscriber; handler panics are logged, never re-thrown to
//! the emitter. A bounded ring of recent events is kept for debugging.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use wf_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProjectUpdated,
    SandboxStateChanged,
    DevServerStateChanged,
    FilesChanged,
    ContextChanged,
    ToolExecuted,
    BuildStatusChanged,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    ProjectUpdated {
        fields: Vec<String>,
    },
    SandboxStateChanged {
        state: String,
    },
    DevServerStateChanged {
        is_running: bool,
        port: Option<u16>,
    },
    FilesChanged {
        paths: Vec<String>,
    },
    ContextChanged,
    ToolExecuted {
        name: String,
        success: bool,
    },
    BuildStatusChanged {
        has_errors: bool,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::ProjectUpdated { .. } => EventKind::ProjectUpdated,
            EventPayload::SandboxStateChanged { .. } => EventKind::SandboxStateChanged,
            EventPayload::DevServerStateChanged { .. } => EventKind::DevServerStateChanged,
            EventPayload::FilesChanged { .. } => EventKind::FilesChanged,
            EventPayload::ContextChanged => EventKind::ContextChanged,
            EventPayload::ToolExecuted { .. } => EventKind::ToolExecuted,
            EventPayload::BuildStatusChanged { .. } => EventKind::BuildStatusChanged,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub project_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Subscription filter. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub project_id: Option<String>,
    pub kinds: Option<Vec<EventKind>>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            kinds: None,
        }
    }

    pub fn kind(kind: EventKind) -> Self {
        Self {
            project_id: None,
            kinds: Some(vec![kind]),
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref pid) = self.project_id {
            if event.project_id != *pid {
                return false;
            }
        }
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.payload.kind()) {
                return false;
            }
        }
        true
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const CHANNEL_CAPACITY: usize = 1024;

pub struct EventBus {
    sender: broadcast::Sender<Event>,
    ring: Mutex<VecDeque<Event>>,
    ring_capacity: usize,
}

impl EventBus {
    pub fn new(ring_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            ring: Mutex::new(VecDeque::new()),
            ring_capacity,
        }
    }

    /// Publish an event. Never blocks; having no subscribers is fine.
    pub fn publish(&self, project_id: impl Into<String>, payload: EventPayload) {
        let event = Event {
            project_id: project_id.into(),
            timestamp: Utc::now(),
            payload,
        };
        {
            let mut ring = self.ring.lock();
            ring.push_back(event.clone());
            while ring.len() > self.ring_capacity {
                ring.pop_front();
            }
        }
        tracing::debug!(
            project_id = %event.project_id,
            kind = ?event.payload.kind(),
            "event published"
        );
        let _ = self.sender.send(event);
    }

    /// Subscribe as a pull-based stream of matching events.
    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        EventStream {
            rx: self.sender.subscribe(),
            filter,
        }
    }

    /// Subscribe with a handler callback. Dispatch runs on its own task;
    /// panics inside the handler are caught and logged. Dropping the
    /// returned [`Subscription`] stops delivery.
    pub fn subscribe_handler<F>(&self, filter: EventFilter, handler: F) -> Subscription
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let mut stream = self.subscribe(filter);
        let task = tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
                if result.is_err() {
                    tracing::warn!("event handler panicked; subscriber kept alive");
                }
            }
        });
        Subscription { task }
    }

    /// Wait for the next event matching `filter`, up to `timeout`.
    pub async fn wait_for_event(&self, filter: EventFilter, timeout: Duration) -> Result<Event> {
        let mut stream = self.subscribe(filter);
        match tokio::time::timeout(timeout, stream.recv()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(Error::Internal("event bus closed".into())),
            Err(_) => Err(Error::Timeout(format!(
                "no matching event within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// The bounded ring of recent events, oldest first.
    pub fn recent_events(&self) -> Vec<Event> {
        self.ring.lock().iter().cloned().collect()
    }
}

/// Handle for a handler subscription; delivery stops when dropped.
pub struct Subscription {
    task: tokio::task::JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streams
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pull-based subscription. Lagged events are skipped, not errored.
pub struct EventStream {
    rx: broadcast::Receiver<Event>,
    filter: EventFilter,
}

impl EventStream {
    /// Next matching event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Collapse bursts: deliver only the last event of any burst, once the
    /// bus has been quiet for `duration`.
    pub fn debounced(self, duration: Duration) -> DebouncedStream {
        DebouncedStream { inner: self, duration }
    }

    /// Rate-limit: deliver at most one event per `interval`; suppressed
    /// events are dropped.
    pub fn throttled(self, interval: Duration) -> ThrottledStream {
        ThrottledStream {
            inner: self,
            interval,
            last_delivery: None,
        }
    }
}

pub struct DebouncedStream {
    inner: EventStream,
    duration: Duration,
}

impl DebouncedStream {
    pub async fn recv(&mut self) -> Option<Event> {
        let mut latest = self.inner.recv().await?;
        loop {
            match tokio::time::timeout(self.duration, self.inner.recv()).await {
                Ok(Some(event)) => latest = event,
                Ok(None) => return Some(latest),
                Err(_) => return Some(latest),
            }
        }
    }
}

pub struct ThrottledStream {
    inner: EventStream,
    interval: Duration,
    last_delivery: Option<tokio::time::Instant>,
}

impl ThrottledStream {
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            let event = self.inner.recv().await?;
            let now = tokio::time::Instant::now();
            match self.last_delivery {
                Some(last) if now.duration_since(last) < self.interval => continue,
                _ => {
                    self.last_delivery = Some(now);
                    return Some(event);
                }
            }
        }
    }
}
