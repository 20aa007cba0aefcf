//! Per-project turn serialization.
//!
//! One turn runs per project at a time; a second request queues on the
//! project's `Semaphore(1)` permit and proceeds when the first finishes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use wf_domain::error::{Error, Result};

#[derive(Default)]
pub struct TurnLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl TurnLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the turn lock for a project. The permit auto-releases on
    /// drop; hold it for the duration of the turn.
    pub async fn acquire(&self, project_id: &str) -> Result<OwnedSemaphorePermit> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(project_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned()
            .await
            .map_err(|_| Error::Internal("turn lock closed".into()))
    }

    /// Drop lock entries for projects with no holder or waiter.
    pub fn prune_idle(&self) {
        self.locks.lock().retain(|_, sem| sem.available_permits() == 0);
    }
}
