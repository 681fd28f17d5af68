//! Typed response shapes for each stage.
//!
//! Built-in stages serialize these; the orchestrator decodes stage output into them.

use crate::artifact::FixAction;
use crate::audit::ActionStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorReport {
    pub spike_detected: bool,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub recent_errors: Vec<String>,
    /// Why the scan could not run (e.g. missing log file).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub root_cause_analysis: String,
    #[serde(alias = "recommended_action")]
    pub fix_action: FixAction,
    #[serde(default, alias = "reproduction_code")]
    pub reproduction_script: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocateReport {
    #[serde(alias = "bad_commit_hash")]
    pub bad_change_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bisect_steps: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediateReport {
    pub status: ActionStatus,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyReport {
    /// True while the reproduction check still observes the failure.
    pub failure_reproduced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_locate_accepts_legacy_commit_key() {
        let report: LocateReport = serde_json::from_value(json!({
            "bad_commit_hash": "a1b2c3d4",
            "author": "dev@example.com",
            "bisect_steps": 5
        }))
        .unwrap();
        assert_eq!(report.bad_change_ref, "a1b2c3d4");
        assert_eq!(report.bisect_steps, Some(5));
        assert!(report.message.is_none());
    }

    #[test]
    fn test_monitor_defaults_for_missing_fields() {
        let report: MonitorReport =
            serde_json::from_value(json!({"spike_detected": false, "error": "Log file not found"}))
                .unwrap();
        assert!(!report.spike_detected);
        assert_eq!(report.error_count, 0);
        assert!(report.recent_errors.is_empty());
        assert_eq!(report.error.as_deref(), Some("Log file not found"));
    }

    #[test]
    fn test_remediate_status_wire_format() {
        let report: RemediateReport =
            serde_json::from_value(json!({"status": "SUCCESS", "message": "REVERT applied"}))
                .unwrap();
        assert_eq!(report.status, ActionStatus::Success);
        assert!(
            serde_json::from_value::<RemediateReport>(json!({"status": "MAYBE"})).is_err(),
            "unknown status must not decode"
        );
    }

    #[test]
    fn test_analysis_accepts_recommended_action_alias() {
        let report: AnalysisReport = serde_json::from_value(json!({
            "root_cause_analysis": "config drift",
            "recommended_action": "HOTFIX"
        }))
        .unwrap();
        assert_eq!(report.fix_action, FixAction::Hotfix);
        assert!(report.reproduction_script.is_empty());
    }
}
