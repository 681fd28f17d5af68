//! In-process reference implementations of every stage.
//!
//! Used for any stage without a configured command, and exposed through
//! `sre-agent stage <name>` so a process-backed configuration can point at the
//! binary itself.

use super::{
    AnalysisReport, LocateReport, MonitorReport, RemediateReport, StageArgs, StageExecutor,
    StageName, StageOutcome, VerifyReport, required, required_int,
};
use crate::artifact::FixAction;
use crate::audit::ActionStatus;
use crate::errors::StageError;
use crate::signature::Signature;
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

// Compile regexes once using LazyLock
static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"ERROR|CRITICAL").unwrap());

/// Matching error lines kept in a monitor report.
const RECENT_ERRORS: usize = 10;

/// Captured verify output kept in a report.
const MAX_VERIFY_OUTPUT: usize = 2000;

/// Shell exit codes for a command that exists but cannot execute, and one that does not exist.
const NOT_EXECUTABLE: i32 = 126;
const NOT_FOUND: i32 = 127;

/// A root-cause pattern the reference analyst knows about.
struct Cause {
    pattern: LazyLock<Regex>,
    /// Short label used in the analysis text
    label: &'static str,
    analysis: &'static str,
    action: FixAction,
    reproduction: &'static str,
}

/// Recognised causes, in tie-break order.
static CAUSES: [Cause; 5] = [
    Cause {
        pattern: LazyLock::new(|| {
            Regex::new(r"(?i)connection ?refused|could not connect to (server|database)").unwrap()
        }),
        label: "connection refused",
        analysis: "Database connection failure due to missing retry logic in the data access layer.",
        action: FixAction::Revert,
        reproduction: "nc -z \"${DB_HOST:-database}\" \"${DB_PORT:-5432}\"",
    },
    Cause {
        pattern: LazyLock::new(|| {
            Regex::new(r"(?i)null ?pointer|NoneType|Traceback|\w+Exception").unwrap()
        }),
        label: "unhandled exception",
        analysis: "Code logic error: an unhandled exception introduced by a recent change.",
        action: FixAction::Revert,
        reproduction: "python test_repro.py",
    },
    Cause {
        pattern: LazyLock::new(|| Regex::new(r"(?i)deadlock").unwrap()),
        label: "deadlock",
        analysis: "Transaction handling error: concurrent writers acquire locks in conflicting order.",
        action: FixAction::Revert,
        reproduction: "python test_repro.py --concurrency 8",
    },
    Cause {
        pattern: LazyLock::new(|| Regex::new(r"(?i)time[ds]? ?out").unwrap()),
        label: "timeout",
        analysis: "Upstream latency exceeds the configured request timeout (configuration drift).",
        action: FixAction::Hotfix,
        reproduction: "curl --fail --max-time 5 \"${UPSTREAM_URL:-http://localhost:8080/health}\"",
    },
    Cause {
        pattern: LazyLock::new(|| {
            Regex::new(r"(?i)OOMKilled|MemoryLimitExceeded|out of memory").unwrap()
        }),
        label: "out of memory",
        analysis: "Memory limit too low for current load (configuration drift).",
        action: FixAction::Hotfix,
        reproduction: "kubectl top pod -l app=main-app",
    },
];

/// Built-in stage implementations.
#[derive(Debug, Clone)]
pub struct BuiltinStages {
    /// Base for relative paths and working directory for reproduction commands
    project_dir: PathBuf,
    bad_change_ref: String,
    verify_timeout: Duration,
}

impl BuiltinStages {
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
            bad_change_ref: "a1b2c3d4".to_string(),
            verify_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_bad_change_ref(mut self, change_ref: &str) -> Self {
        self.bad_change_ref = change_ref.to_string();
        self
    }

    pub fn with_timeout(mut self, verify_timeout: Duration) -> Self {
        self.verify_timeout = verify_timeout;
        self
    }

    /// Count error lines in the log; a spike is `count >= threshold`.
    pub fn monitor(&self, log_source: &str, threshold: i64) -> MonitorReport {
        let path = self.resolve(log_source);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                let error = if err.kind() == std::io::ErrorKind::NotFound {
                    format!("Log file not found: {}", path.display())
                } else {
                    format!("Failed to read log file {}: {}", path.display(), err)
                };
                return MonitorReport {
                    spike_detected: false,
                    error_count: 0,
                    recent_errors: Vec::new(),
                    error: Some(error),
                };
            }
        };

        let errors: Vec<&str> = content
            .lines()
            .filter(|line| ERROR_LINE.is_match(line))
            .map(str::trim)
            .collect();
        let count = errors.len();
        let recent = errors[count.saturating_sub(RECENT_ERRORS)..]
            .iter()
            .map(|s| s.to_string())
            .collect();

        MonitorReport {
            spike_detected: i64::try_from(count).unwrap_or(i64::MAX) >= threshold,
            error_count: count as u64,
            recent_errors: recent,
            error: None,
        }
    }

    /// Classify the recent errors. `None` when no known cause matches.
    pub fn analyze(&self, recent_errors: &[String], error_count: i64) -> Option<AnalysisReport> {
        let mut best: Option<(&Cause, usize)> = None;
        for cause in CAUSES.iter() {
            let hits = recent_errors
                .iter()
                .filter(|line| cause.pattern.is_match(line))
                .count();
            // Strictly greater keeps the earlier cause on ties
            if hits > 0 && best.is_none_or(|(_, top)| hits > top) {
                best = Some((cause, hits));
            }
        }

        let (cause, hits) = best?;
        Some(AnalysisReport {
            root_cause_analysis: format!(
                "Root Cause: {}\nEvidence: {} of {} recent error lines match '{}' ({} errors in window).",
                cause.analysis,
                hits,
                recent_errors.len(),
                cause.label,
                error_count
            ),
            fix_action: cause.action,
            reproduction_script: cause.reproduction.to_string(),
        })
    }

    /// Reference bisect: reports the configured change.
    pub fn locate(&self, repro_command: &str) -> LocateReport {
        LocateReport {
            bad_change_ref: self.bad_change_ref.clone(),
            author: None,
            message: Some(format!(
                "reference locator; bisect with `{}` not performed",
                repro_command
            )),
            bisect_steps: None,
        }
    }

    /// Apply `action` to `target` if the signature is a well-formed digest.
    pub fn remediate(&self, action: FixAction, target: &str, signature: &str) -> RemediateReport {
        let signature = Signature::new(signature);
        if target.trim().is_empty() {
            return RemediateReport {
                status: ActionStatus::Failure,
                message: format!("refusing {}: empty target", action),
            };
        }
        if !signature.is_well_formed() {
            return RemediateReport {
                status: ActionStatus::Failure,
                message: format!(
                    "refusing {} on {}: signature is not a SHA-256 digest",
                    action, target
                ),
            };
        }
        RemediateReport {
            status: ActionStatus::Success,
            message: format!("{} applied to {}", action, target),
        }
    }

    /// Run the reproduction command; the failure is reproduced when it exits non-zero.
    ///
    /// Exit codes 126 and 127 mean the command itself could not run, which says
    /// nothing about the failure, so they come back as a non-zero stage exit.
    pub async fn verify(&self, repro_command: &str) -> Result<StageOutcome, StageError> {
        let stage = StageName::Verify;
        let child = Command::new("sh")
            .arg("-c")
            .arg(repro_command)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StageError::Spawn { stage, source })?;

        let output = match timeout(self.verify_timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| StageError::Io { stage, source })?,
            Err(_) => {
                return Err(StageError::Timeout {
                    stage,
                    secs: self.verify_timeout.as_secs(),
                });
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = tail(combined.trim(), MAX_VERIFY_OUTPUT);
        debug!(command = repro_command, status = ?output.status.code(), "reproduction finished");

        if let Some(code @ (NOT_EXECUTABLE | NOT_FOUND)) = output.status.code() {
            return Ok(StageOutcome::NonZeroExit {
                code,
                stderr: format!("reproduction command could not run: {}", combined),
            });
        }

        Ok(StageOutcome::success(&VerifyReport {
            failure_reproduced: !output.status.success(),
            output: (!combined.is_empty()).then_some(combined),
        }))
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }
}

fn tail(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        s.to_string()
    } else {
        s.chars().skip(count - max).collect()
    }
}

#[async_trait]
impl StageExecutor for BuiltinStages {
    async fn dispatch(
        &self,
        stage: StageName,
        args: &StageArgs,
    ) -> Result<StageOutcome, StageError> {
        let outcome = match stage {
            StageName::Monitor => {
                let log_source = required(stage, args, "logSource", |v| v.as_str())?;
                let threshold = required_int(stage, args, "threshold")?;
                StageOutcome::success(&self.monitor(log_source, threshold))
            }
            StageName::Analyze => {
                let recent = required(stage, args, "recentErrors", |v| v.as_list())?;
                let count = required_int(stage, args, "errorCount")?;
                match self.analyze(recent, count) {
                    Some(report) => StageOutcome::success(&report),
                    None => StageOutcome::NonZeroExit {
                        code: 1,
                        stderr: "no recognised failure pattern in recent errors".to_string(),
                    },
                }
            }
            StageName::Locate => {
                let repro = required(stage, args, "reproCommand", |v| v.as_str())?;
                StageOutcome::success(&self.locate(repro))
            }
            StageName::Remediate => {
                let action = required(stage, args, "action", |v| v.as_str())?;
                let action = action.parse::<FixAction>().map_err(|err| {
                    StageError::ContractViolation {
                        stage,
                        reason: err.to_string(),
                    }
                })?;
                let target = required(stage, args, "target", |v| v.as_str())?;
                let signature = required(stage, args, "signature", |v| v.as_str())?;
                StageOutcome::success(&self.remediate(action, target, signature))
            }
            StageName::Verify => {
                let repro = required(stage, args, "reproCommand", |v| v.as_str())?;
                self.verify(repro).await?
            }
        };
        Ok(outcome)
    }
}
