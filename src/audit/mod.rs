use crate::artifact::FixAction;
use crate::signature::Signature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a governed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Success,
    Failure,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Success => "SUCCESS",
            ActionStatus::Failure => "FAILURE",
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One governed remediation attempt. Appended once, never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: FixAction,
    pub target: String,
    pub thought_signature: Signature,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuditEntry {
    pub fn new(
        action: FixAction,
        target: &str,
        thought_signature: Signature,
        status: ActionStatus,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            target: target.to_string(),
            thought_signature,
            status,
            incident_id: None,
            message: None,
        }
    }

    pub fn with_incident(mut self, incident_id: &str) -> Self {
        self.incident_id = Some(incident_id.to_string());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

pub mod trail;
pub use trail::{AppendReport, AuditTrail, Recovery};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_entry_wire_format() {
        let entry = AuditEntry::new(
            FixAction::Revert,
            "deployment/main-app",
            Signature::new("abc123"),
            ActionStatus::Success,
        );
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["action"], "REVERT");
        assert_eq!(value["status"], "SUCCESS");
        assert_eq!(value["thought_signature"], "abc123");
        assert!(
            value.get("incident_id").is_none(),
            "unset optional fields must be omitted"
        );
    }

    #[test]
    fn test_audit_entry_reads_minimal_record() {
        let json = r#"{
            "timestamp": "2025-01-01T10:00:00Z",
            "action": "HOTFIX",
            "target": "deployment/main-app",
            "thought_signature": "ff",
            "status": "FAILURE"
        }"#;
        let entry: AuditEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.action, FixAction::Hotfix);
        assert_eq!(entry.status, ActionStatus::Failure);
        assert!(entry.incident_id.is_none());
    }

    #[test]
    fn test_builder_sets_correlation_fields() {
        let entry = AuditEntry::new(
            FixAction::Hotfix,
            "deployment/api",
            Signature::new("00"),
            ActionStatus::Failure,
        )
        .with_incident("inc-42")
        .with_message("governance violation");
        assert_eq!(entry.incident_id.as_deref(), Some("inc-42"));
        assert_eq!(entry.message.as_deref(), Some("governance violation"));
    }
}
