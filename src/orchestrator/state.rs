use crate::artifact::{FixAction, Incident, UNKNOWN_CHANGE_REF};
use crate::audit::ActionStatus;
use crate::signature::Signature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where an episode is in the remediation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Idle,
    Monitoring,
    Analyzing,
    Locating,
    Remediating,
    Verifying,
    Recorded,
    Aborted,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "IDLE",
            AgentState::Monitoring => "MONITORING",
            AgentState::Analyzing => "ANALYZING",
            AgentState::Locating => "LOCATING",
            AgentState::Remediating => "REMEDIATING",
            AgentState::Verifying => "VERIFYING",
            AgentState::Recorded => "RECORDED",
            AgentState::Aborted => "ABORTED",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why an episode was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbortReason {
    AnalysisFailed,
    GovernanceViolation,
    OperatorAbort,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::AnalysisFailed => "ANALYSIS_FAILED",
            AbortReason::GovernanceViolation => "GOVERNANCE_VIOLATION",
            AbortReason::OperatorAbort => "OPERATOR_ABORT",
        }
    }
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: AgentState,
    pub to: AgentState,
    pub at: DateTime<Utc>,
    pub note: String,
}

/// The incident under construction. Owned by the orchestrator until it is
/// finalized into an [`Incident`] and persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentDraft {
    pub incident_id: String,
    pub detected_at: DateTime<Utc>,
    pub error_count: u64,
    pub sample_errors: Vec<String>,
    pub root_cause_analysis: Option<String>,
    pub thought_signature: Option<Signature>,
    pub fix_action: Option<FixAction>,
    pub reproduction_script: Option<String>,
    pub bad_change_ref: Option<String>,
    pub remediation_status: Option<ActionStatus>,
    pub remediation_message: Option<String>,
    pub verification_result: Option<bool>,
    pub degradations: Vec<String>,
}

impl IncidentDraft {
    pub fn new(incident_id: String, error_count: u64, sample_errors: Vec<String>) -> Self {
        Self {
            incident_id,
            detected_at: Utc::now(),
            error_count,
            sample_errors,
            root_cause_analysis: None,
            thought_signature: None,
            fix_action: None,
            reproduction_script: None,
            bad_change_ref: None,
            remediation_status: None,
            remediation_message: None,
            verification_result: None,
            degradations: Vec::new(),
        }
    }

    /// Record a degraded-continue event.
    pub fn degrade(&mut self, note: impl Into<String>) {
        self.degradations.push(note.into());
    }

    /// Assemble the immutable record. `None` until analysis has produced a
    /// hypothesis, signature and action.
    pub fn finalize(&self) -> Option<Incident> {
        let root_cause_analysis = self.root_cause_analysis.clone()?;
        let thought_signature = self.thought_signature.clone()?;
        let fix_action = self.fix_action?;
        let verification_result = self.verification_result.unwrap_or(false);

        Some(Incident {
            incident_id: self.incident_id.clone(),
            detected_at: self.detected_at,
            error_count: self.error_count,
            sample_errors: self.sample_errors.clone(),
            root_cause_analysis,
            thought_signature,
            bad_change_ref: self
                .bad_change_ref
                .clone()
                .unwrap_or_else(|| UNKNOWN_CHANGE_REF.to_string()),
            reproduction_script: self.reproduction_script.clone().unwrap_or_default(),
            fix_action,
            verification_result,
            status_message: self.status_message(verification_result),
            remediation_message: self.remediation_message.clone(),
            degradations: self.degradations.clone(),
        })
    }

    fn status_message(&self, verified: bool) -> String {
        let action = self.fix_action.map(|a| a.as_str()).unwrap_or("no action");
        let mut message = if verified {
            format!("Resolved: {} applied and verified", action)
        } else if self.remediation_status == Some(ActionStatus::Success) {
            format!("Unresolved: {} applied but verification failed", action)
        } else {
            format!("Unresolved: {} was not applied", action)
        };
        if !self.degradations.is_empty() {
            message.push_str(&format!(" ({} degradation(s))", self.degradations.len()));
        }
        message
    }
}

/// One run of the state machine, from IDLE to a terminal state.
#[derive(Debug, Clone)]
pub struct Episode {
    state: AgentState,
    finished: bool,
    abort_reason: Option<AbortReason>,
    abort_detail: Option<String>,
    draft: Option<IncidentDraft>,
    history: Vec<Transition>,
    incident: Option<Incident>,
    artifact_path: Option<PathBuf>,
}

impl Default for Episode {
    fn default() -> Self {
        Self::new()
    }
}

impl Episode {
    pub fn new() -> Self {
        Self {
            state: AgentState::Idle,
            finished: false,
            abort_reason: None,
            abort_detail: None,
            draft: None,
            history: Vec::new(),
            incident: None,
            artifact_path: None,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// True once the episode reached RECORDED, ABORTED, or returned to IDLE.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Finished in IDLE: no spike, nothing recorded.
    pub fn is_healthy(&self) -> bool {
        self.finished && self.state == AgentState::Idle
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort_reason
    }

    pub fn abort_detail(&self) -> Option<&str> {
        self.abort_detail.as_deref()
    }

    pub fn draft(&self) -> Option<&IncidentDraft> {
        self.draft.as_ref()
    }

    pub fn draft_mut(&mut self) -> Option<&mut IncidentDraft> {
        self.draft.as_mut()
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// The persisted record, once RECORDED.
    pub fn incident(&self) -> Option<&Incident> {
        self.incident.as_ref()
    }

    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact_path.as_deref()
    }

    pub(crate) fn set_draft(&mut self, draft: IncidentDraft) {
        self.draft = Some(draft);
    }

    pub(crate) fn transition(&mut self, to: AgentState, note: impl Into<String>) -> &Transition {
        let from = self.state;
        self.state = to;
        if matches!(to, AgentState::Recorded | AgentState::Aborted)
            || (to == AgentState::Idle && from != AgentState::Idle)
        {
            self.finished = true;
        }
        self.history.push(Transition {
            from,
            to,
            at: Utc::now(),
            note: note.into(),
        });
        &self.history[self.history.len() - 1]
    }

    pub(crate) fn abort(
        &mut self,
        reason: AbortReason,
        detail: impl Into<String>,
    ) -> &Transition {
        let detail = detail.into();
        self.abort_reason = Some(reason);
        self.abort_detail = Some(detail.clone());
        self.transition(AgentState::Aborted, format!("{}: {}", reason, detail))
    }

    pub(crate) fn record(&mut self, incident: Incident, path: PathBuf) -> &Transition {
        let note = format!("artifact written to {}", path.display());
        self.incident = Some(incident);
        self.artifact_path = Some(path);
        self.transition(AgentState::Recorded, note)
    }
}
