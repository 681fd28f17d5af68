//! Incident records.
//!
//! An [`Incident`] is the immutable, durable record of one complete
//! remediation episode. It is assembled by the orchestrator only at the end
//! of the episode and written once through [`ArtifactStore`].

use crate::signature::Signature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod store;
pub use store::ArtifactStore;

/// Sentinel used when the offending change could not be located.
pub const UNKNOWN_CHANGE_REF: &str = "unknown";

/// Remediation strategy chosen by the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixAction {
    /// Roll the deployment back past the offending change (code or logic errors).
    Revert,
    /// Patch the running deployment in place (configuration drift).
    Hotfix,
}

impl FixAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixAction::Revert => "REVERT",
            FixAction::Hotfix => "HOTFIX",
        }
    }
}

impl std::fmt::Display for FixAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FixAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "REVERT" => Ok(FixAction::Revert),
            "HOTFIX" => Ok(FixAction::Hotfix),
            _ => anyhow::bail!("Invalid fix action '{}'. Valid values: REVERT, HOTFIX", s),
        }
    }
}

/// One complete remediation episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: String,
    pub detected_at: DateTime<Utc>,
    pub error_count: u64,
    pub sample_errors: Vec<String>,
    pub root_cause_analysis: String,
    pub thought_signature: Signature,
    #[serde(alias = "bad_commit_hash")]
    pub bad_change_ref: String,
    #[serde(default)]
    pub reproduction_script: String,
    pub fix_action: FixAction,
    pub verification_result: bool,
    #[serde(default)]
    pub status_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation_message: Option<String>,
    /// Degraded-continue events, e.g. a failed locate stage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degradations: Vec<String>,
}

impl Incident {
    pub fn location_known(&self) -> bool {
        self.bad_change_ref != UNKNOWN_CHANGE_REF
    }
}

/// Allocate an incident id: UTC timestamp plus a random suffix, unique for the process lifetime.
pub fn new_incident_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "inc-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S"),
        &suffix[..8]
    )
}

#[cfg(test)]
pub(crate) fn sample_incident(id: &str) -> Incident {
    let analysis = "Root Cause: Database connection failure due to missing retry logic.";
    Incident {
        incident_id: id.to_string(),
        detected_at: "2025-01-01T10:00:00Z".parse().unwrap(),
        error_count: 7,
        sample_errors: vec!["ERROR ConnectionRefusedError: database:5432".to_string()],
        root_cause_analysis: analysis.to_string(),
        thought_signature: crate::signature::SignatureEngine::derive(analysis),
        bad_change_ref: "a1b2c3d4".to_string(),
        reproduction_script: "exit 0".to_string(),
        fix_action: FixAction::Revert,
        verification_result: true,
        status_message: "resolved".to_string(),
        remediation_message: Some("REVERT applied to deployment/main-app".to_string()),
        degradations: Vec::new(),
    }
}
