//! Worker registration and lifecycle states.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use url::Url;

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Installing (precache running).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (stale store eviction, client claim).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced by a newer version).
    Redundant,
}

/// A worker instance bound to one cache version.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Store name / version identifier this instance serves from.
    pub version: String,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new worker instance.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            version: version.into(),
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }
}

/// The registration slots for one scope.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,

    /// The waiting worker may replace the active one without waiting for clients to close.
    skip_waiting: bool,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            skip_waiting: false,
        }
    }

    /// Get the active worker.
    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// Start installing a worker for `version`.
    pub fn update(&mut self, version: impl Into<String>) {
        let mut worker = ServiceWorker::new(version);
        worker.set_state(ServiceWorkerState::Installing);
        self.installing = Some(worker);
        self.skip_waiting = false;
    }

    /// Transition installing to waiting.
    pub fn install_complete(&mut self) {
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(ServiceWorkerState::Installed);
            if let Some(mut superseded) = self.waiting.replace(worker) {
                superseded.set_state(ServiceWorkerState::Redundant);
            }
        }
    }

    /// Let the waiting worker replace the active one immediately.
    pub fn skip_waiting(&mut self) {
        self.skip_waiting = true;
    }

    /// Whether skip-waiting has been requested for the pending worker.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting
    }

    /// Whether the waiting worker may activate given the number of clients
    /// still controlled by the current active worker.
    pub fn ready_to_activate(&self, controlled_clients: usize) -> bool {
        self.waiting.is_some()
            && (self.skip_waiting || self.active.is_none() || controlled_clients == 0)
    }

    /// Promote the waiting worker to activating. Returns `false` when nothing waits.
    pub fn begin_activation(&mut self) -> bool {
        let Some(mut worker) = self.waiting.take() else {
            return false;
        };
        worker.set_state(ServiceWorkerState::Activating);

        // Mark old active as redundant
        if let Some(mut old) = self.active.replace(worker) {
            old.set_state(ServiceWorkerState::Redundant);
        }
        self.skip_waiting = false;
        true
    }

    /// Finish activation of the active worker.
    pub fn finish_activation(&mut self) {
        if let Some(worker) = self.active.as_mut() {
            if worker.state == ServiceWorkerState::Activating {
                worker.set_state(ServiceWorkerState::Activated);
            }
        }
    }
}
