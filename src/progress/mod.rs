//! Polled progress state machines for the long running startup steps.

pub mod bootstrapper;
pub mod builder;

use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::watch;

pub use bootstrapper::{Bootstrapper, HttpSnapshotSource, SnapshotSource};
pub use builder::ConsensusBuilder;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Phase {
    NotStarted,
    Running,
    Skipped,
    Closed,
    Done,
    Failed(String),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Phase::NotStarted | Phase::Running)
    }

    fn name(&self) -> &'static str {
        match self {
            Phase::NotStarted => "not started",
            Phase::Running => "running",
            Phase::Skipped => "skipped",
            Phase::Closed => "closed",
            Phase::Done => "done",
            Phase::Failed(_) => "failed",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("{tracker} cannot go from {from} to {to}")]
    IllegalTransition {
        tracker: &'static str,
        from: &'static str,
        to: &'static str,
    },
    #[error("{tracker} must wait until {gate} has finished")]
    Gated {
        tracker: &'static str,
        gate: &'static str,
    },
}

#[derive(Debug)]
struct TrackerState {
    phase: Phase,
    completed: u64,
    total: Option<u64>,
}

/// One startup step's phase plus a monotonic progress counter.
///
/// Phase changes are broadcast so the task doing the work, and anyone
/// waiting on it, wake up as soon as the phase moves.
#[derive(Debug)]
pub struct ProgressTracker {
    name: &'static str,
    verb: &'static str,
    unit: &'static str,
    state: RwLock<TrackerState>,
    gate: Option<Arc<ProgressTracker>>,
    changed: watch::Sender<Phase>,
}

impl ProgressTracker {
    pub fn new(name: &'static str, verb: &'static str, unit: &'static str) -> Self {
        let (changed, _) = watch::channel(Phase::NotStarted);
        Self {
            name,
            verb,
            unit,
            state: RwLock::new(TrackerState {
                phase: Phase::NotStarted,
                completed: 0,
                total: None,
            }),
            gate: None,
            changed,
        }
    }

    /// Refuses `initialize` until `gate` reaches a terminal phase.
    pub fn gated_by(mut self, gate: Arc<ProgressTracker>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn phase(&self) -> Phase {
        self.read().phase.clone()
    }

    fn transition(
        &self,
        to: Phase,
        allowed: impl Fn(&Phase) -> bool,
    ) -> Result<(), TrackerError> {
        let mut state = self.write();
        if state.phase == to {
            return Ok(());
        }
        if !allowed(&state.phase) {
            return Err(TrackerError::IllegalTransition {
                tracker: self.name,
                from: state.phase.name(),
                to: to.name(),
            });
        }
        tracing::debug!("{}: {} -> {}", self.name, state.phase.name(), to.name());
        state.phase = to.clone();
        drop(state);
        self.changed.send_replace(to);
        Ok(())
    }

    pub fn initialize(&self) -> Result<(), TrackerError> {
        if let Some(gate) = &self.gate {
            if !gate.phase().is_terminal() {
                return Err(TrackerError::Gated {
                    tracker: self.name,
                    gate: gate.name,
                });
            }
        }
        self.transition(Phase::Running, |p| *p == Phase::NotStarted)
    }

    pub fn skip(&self) -> Result<(), TrackerError> {
        self.transition(Phase::Skipped, |p| {
            matches!(p, Phase::NotStarted | Phase::Running)
        })
    }

    /// Marks the step finished. Only the task doing the work calls this.
    pub fn complete(&self) -> Result<(), TrackerError> {
        self.transition(Phase::Done, |p| *p == Phase::Running)
    }

    pub fn fail(&self, reason: impl Into<String>) -> Result<(), TrackerError> {
        self.transition(Phase::Failed(reason.into()), |p| {
            matches!(p, Phase::NotStarted | Phase::Running)
        })
    }

    /// Stops the step. Terminal phases are left as they are.
    pub fn close(&self) {
        let _ = self.transition(Phase::Closed, |p| !p.is_terminal());
    }

    pub fn set_total(&self, total: Option<u64>) {
        self.write().total = total;
    }

    /// Raises the completed count; lower values are ignored.
    pub fn advance(&self, completed: u64) {
        let mut state = self.write();
        state.completed = state.completed.max(completed);
    }

    pub fn completed(&self) -> u64 {
        self.read().completed
    }

    /// Short status for polling clients. Empty until the step starts.
    pub fn progress(&self) -> String {
        let state = self.read();
        match &state.phase {
            Phase::NotStarted => String::new(),
            Phase::Running => match state.total {
                Some(total) if total > 0 => {
                    let pct = (state.completed.saturating_mul(100) / total).min(100);
                    format!("{} {}%", self.verb, pct)
                }
                _ => format!("{} {} {}", self.verb, state.completed, self.unit),
            },
            Phase::Skipped => "Skipped".to_string(),
            Phase::Closed => "Closed".to_string(),
            Phase::Done => "Done".to_string(),
            Phase::Failed(reason) => format!("Failed: {}", reason),
        }
    }

    /// Resolves with the first phase, current or future, matching `pred`.
    pub async fn wait_until(&self, pred: impl Fn(&Phase) -> bool) -> Phase {
        let current = self.phase();
        if pred(&current) {
            return current;
        }
        let mut rx = self.changed.subscribe();
        loop {
            let phase = self.phase();
            if pred(&phase) {
                return phase;
            }
            if rx.changed().await.is_err() {
                return self.phase();
            }
        }
    }

    pub async fn wait_terminal(&self) -> Phase {
        self.wait_until(Phase::is_terminal).await
    }
}
