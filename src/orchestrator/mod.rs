//! The remediation state machine.
//!
//! ```text
//! IDLE -> MONITORING -> ANALYZING -> LOCATING -> REMEDIATING -> VERIFYING -> RECORDED
//!            |              |            |             |             |
//!            +-> IDLE       +------------+-------------+-------------+--> ABORTED
//! ```
//!
//! Each call to [`IncidentOrchestrator::step`] performs the work of the
//! current state and records exactly one transition in the [`Episode`].

pub mod runner;
pub mod state;

pub use runner::{IncidentOrchestrator, RunSettings};
pub use state::{AbortReason, AgentState, Episode, IncidentDraft, Transition};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag asking the orchestrator to stop before the next stage.
///
/// A stage already in flight always runs to completion or timeout.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
