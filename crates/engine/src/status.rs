use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use docmatrix_store::CellStatus;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{EngineError, Result};

/// Point-in-time view of a project's current or most recent run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatus {
    pub is_running: bool,
    pub total: usize,
    pub completed: usize,
    pub errored: usize,
    pub cancel_requested: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct RunState {
    total: usize,
    completed: AtomicUsize,
    errored: AtomicUsize,
    running: AtomicBool,
    cancelled: AtomicBool,
    started_at: DateTime<Utc>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

impl RunState {
    fn status(&self) -> RunStatus {
        RunStatus {
            is_running: self.running.load(Ordering::SeqCst),
            total: self.total,
            completed: self.completed.load(Ordering::SeqCst),
            errored: self.errored.load(Ordering::SeqCst),
            cancel_requested: self.cancelled.load(Ordering::SeqCst),
            started_at: self.started_at,
            finished_at: *self.finished_at.lock(),
        }
    }
}

/// Tracks one run per project. The last finished run stays visible for polling
/// until the next one starts.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, Arc<RunState>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the project for a new run, failing if one is already active.
    pub fn begin(&self, project: &str, total: usize) -> Result<RunGuard> {
        let mut runs = self.runs.lock();
        if let Some(existing) = runs.get(project) {
            if existing.running.load(Ordering::SeqCst) {
                return Err(EngineError::AlreadyRunning(project.to_string()));
            }
        }
        let state = Arc::new(RunState {
            total,
            completed: AtomicUsize::new(0),
            errored: AtomicUsize::new(0),
            running: AtomicBool::new(true),
            cancelled: AtomicBool::new(false),
            started_at: Utc::now(),
            finished_at: Mutex::new(None),
        });
        runs.insert(project.to_string(), Arc::clone(&state));
        Ok(RunGuard { state })
    }

    pub fn status(&self, project: &str) -> Option<RunStatus> {
        self.runs.lock().get(project).map(|state| state.status())
    }

    pub fn is_running(&self, project: &str) -> bool {
        self.status(project).is_some_and(|status| status.is_running)
    }

    /// Stops further dispatch for the active run. Returns false when nothing is running.
    pub fn cancel(&self, project: &str) -> bool {
        match self.runs.lock().get(project) {
            Some(state) if state.running.load(Ordering::SeqCst) => {
                state.cancelled.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }
}

/// Held for the lifetime of a run; dropping it marks the run finished.
#[derive(Debug)]
pub struct RunGuard {
    state: Arc<RunState>,
}

impl RunGuard {
    pub fn record(&self, status: CellStatus) {
        match status {
            CellStatus::Completed => self.state.completed.fetch_add(1, Ordering::SeqCst),
            CellStatus::Error => self.state.errored.fetch_add(1, Ordering::SeqCst),
            CellStatus::Pending | CellStatus::Running => return,
        };
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> RunStatus {
        self.state.status()
    }

    pub fn finish(&self) {
        if self.state.running.swap(false, Ordering::SeqCst) {
            *self.state.finished_at.lock() = Some(Utc::now());
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.finish();
    }
}
