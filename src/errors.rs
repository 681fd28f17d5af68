//! Typed error hierarchy for the remediation agent.
//!
//! One enum per failure domain:
//! - `StageError` — a stage could not be invoked at all
//! - `AuditError` — the audit trail could not be read or rewritten
//! - `PersistenceError` — an incident artifact could not be saved
//! - `GovernanceViolation` — a thought signature failed correlation
//! - `OrchestratorError` — failures that end the whole run
//!
//! Stage *outcomes* such as a non-zero exit or malformed output are values
//! (`crate::stage::StageOutcome`), not errors.

use crate::orchestrator::AgentState;
use crate::stage::StageName;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while invoking an external stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Stage {stage} contract violation: {reason}")]
    ContractViolation { stage: StageName, reason: String },

    #[error("Failed to spawn stage {stage}: {source}")]
    Spawn {
        stage: StageName,
        #[source]
        source: std::io::Error,
    },

    #[error("Stage {stage} timed out after {secs}s")]
    Timeout { stage: StageName, secs: u64 },

    #[error("I/O error while running stage {stage}: {source}")]
    Io {
        stage: StageName,
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    /// Contract violations are caller bugs and must never be absorbed as stage failures.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, StageError::ContractViolation { .. })
    }

    pub fn stage(&self) -> StageName {
        match self {
            StageError::ContractViolation { stage, .. }
            | StageError::Spawn { stage, .. }
            | StageError::Timeout { stage, .. }
            | StageError::Io { stage, .. } => *stage,
        }
    }
}

/// Errors from the append-only audit trail.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to lock audit trail at {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read audit trail at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audit trail at {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write audit trail at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize audit trail: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Errors from the incident artifact store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to write artifact at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read artifact directory {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize incident {incident_id}: {source}")]
    Serialize {
        incident_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Incident id '{incident_id}' is not a valid artifact file name")]
    InvalidId { incident_id: String },

    #[error("Gave up persisting incident {incident_id} after {attempts} attempts: {last}")]
    Exhausted {
        incident_id: String,
        attempts: u32,
        #[source]
        last: Box<PersistenceError>,
    },
}

impl PersistenceError {
    /// I/O failures may clear up on retry; serialization failures never will.
    pub fn is_transient(&self) -> bool {
        matches!(self, PersistenceError::Write { .. })
    }
}

/// A remediation was attempted with a signature that does not match the recorded analysis.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Governance violation on incident {incident_id}: presented signature {presented} does not match {expected}"
)]
pub struct GovernanceViolation {
    pub incident_id: String,
    pub presented: String,
    pub expected: String,
}

/// Errors that end an orchestrator run with a non-zero exit.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Episode is already terminal in state {0}")]
    AlreadyTerminal(AgentState),

    #[error("No incident is in progress while in state {0}")]
    MissingIncident(AgentState),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_contract_violation_is_flagged() {
        let err = StageError::ContractViolation {
            stage: StageName::Monitor,
            reason: "missing required argument `threshold`".to_string(),
        };
        assert!(err.is_contract_violation());
        assert_eq!(err.stage(), StageName::Monitor);
        assert!(err.to_string().contains("threshold"));
    }

    #[test]
    fn stage_error_timeout_is_not_contract_violation() {
        let err = StageError::Timeout {
            stage: StageName::Locate,
            secs: 30,
        };
        assert!(!err.is_contract_violation());
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn persistence_error_transience() {
        let write = PersistenceError::Write {
            path: PathBuf::from("/tmp/x.json"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        };
        assert!(write.is_transient());

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let ser = PersistenceError::Serialize {
            incident_id: "inc-1".to_string(),
            source: json_err,
        };
        assert!(!ser.is_transient());

        let invalid = PersistenceError::InvalidId {
            incident_id: "../x".to_string(),
        };
        assert!(!invalid.is_transient());
        assert!(invalid.to_string().contains("../x"));
    }

    #[test]
    fn persistence_exhausted_carries_attempts() {
        let last = PersistenceError::Write {
            path: PathBuf::from("/tmp/x.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let err = PersistenceError::Exhausted {
            incident_id: "inc-7".to_string(),
            attempts: 3,
            last: Box::new(last),
        };
        let msg = err.to_string();
        assert!(msg.contains("inc-7"));
        assert!(msg.contains("3 attempts"));
        assert!(!err.is_transient());
    }

    #[test]
    fn orchestrator_error_converts_from_persistence_error() {
        let inner = PersistenceError::Read {
            path: PathBuf::from("/tmp"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        let err: OrchestratorError = inner.into();
        assert!(matches!(
            err,
            OrchestratorError::Persistence(PersistenceError::Read { .. })
        ));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StageError::Timeout {
            stage: StageName::Verify,
            secs: 1,
        });
        assert_std_error(&AuditError::Serialize(
            serde_json::from_str::<serde_json::Value>("]").unwrap_err(),
        ));
        assert_std_error(&GovernanceViolation {
            incident_id: "inc".into(),
            presented: "a".into(),
            expected: "b".into(),
        });
        assert_std_error(&OrchestratorError::AlreadyTerminal(AgentState::Recorded));
    }
}
