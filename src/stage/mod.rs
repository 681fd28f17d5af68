//! Stage invocation boundary.
//!
//! Every external step of an episode (log scan, reasoning, bisect, patch,
//! reproduction check) is a *stage*: it receives named, typed arguments and
//! answers with a single JSON object. The orchestrator only ever talks to
//! stages through [`StageExecutor`], so a stage can be a spawned process
//! ([`ProcessStageExecutor`]), the in-process reference implementation
//! ([`BuiltinStages`]), or a test double.
//!
//! # Argument contract
//!
//! | Stage     | Required args                                   |
//! |-----------|-------------------------------------------------|
//! | monitor   | `logSource: str`, `threshold: int`              |
//! | analyze   | `recentErrors: [str]`, `errorCount: int`        |
//! | locate    | `reproCommand: str`                             |
//! | remediate | `action: REVERT\|HOTFIX`, `target: str`, `signature: str` |
//! | verify    | `reproCommand: str`, `target: str`              |
//!
//! Missing or mistyped arguments are rejected by [`validate_args`] before the
//! stage runs.

use crate::artifact::FixAction;
use crate::errors::StageError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod builtin;
pub mod process;
pub mod responses;
pub mod router;

pub use builtin::BuiltinStages;
pub use process::ProcessStageExecutor;
pub use responses::{AnalysisReport, LocateReport, MonitorReport, RemediateReport, VerifyReport};
pub use router::StageRouter;

/// The stages an episode can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Monitor,
    Analyze,
    Locate,
    Remediate,
    Verify,
}

impl StageName {
    pub fn all() -> &'static [StageName] {
        &[
            StageName::Monitor,
            StageName::Analyze,
            StageName::Locate,
            StageName::Remediate,
            StageName::Verify,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Monitor => "monitor",
            StageName::Analyze => "analyze",
            StageName::Locate => "locate",
            StageName::Remediate => "remediate",
            StageName::Verify => "verify",
        }
    }

    /// Arguments that must be present (with the given kind) for this stage.
    pub fn required_args(&self) -> &'static [ArgSpec] {
        match self {
            StageName::Monitor => MONITOR_ARGS,
            StageName::Analyze => ANALYZE_ARGS,
            StageName::Locate => LOCATE_ARGS,
            StageName::Remediate => REMEDIATE_ARGS,
            StageName::Verify => VERIFY_ARGS,
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StageName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monitor" => Ok(StageName::Monitor),
            "analyze" | "analyse" => Ok(StageName::Analyze),
            "locate" | "bisect" => Ok(StageName::Locate),
            "remediate" | "patch" => Ok(StageName::Remediate),
            "verify" => Ok(StageName::Verify),
            _ => anyhow::bail!(
                "Invalid stage '{}'. Valid values: monitor, analyze, locate, remediate, verify",
                s
            ),
        }
    }
}

/// Primitive kinds an argument may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Str,
    Int,
    Bool,
    List,
}

impl std::fmt::Display for ArgKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArgKind::Str => "string",
            ArgKind::Int => "int",
            ArgKind::Bool => "bool",
            ArgKind::List => "list of strings",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
}

const MONITOR_ARGS: &[ArgSpec] = &[
    ArgSpec { name: "logSource", kind: ArgKind::Str },
    ArgSpec { name: "threshold", kind: ArgKind::Int },
];

const ANALYZE_ARGS: &[ArgSpec] = &[
    ArgSpec { name: "recentErrors", kind: ArgKind::List },
    ArgSpec { name: "errorCount", kind: ArgKind::Int },
];

const LOCATE_ARGS: &[ArgSpec] = &[ArgSpec { name: "reproCommand", kind: ArgKind::Str }];

const REMEDIATE_ARGS: &[ArgSpec] = &[
    ArgSpec { name: "action", kind: ArgKind::Str },
    ArgSpec { name: "target", kind: ArgKind::Str },
    ArgSpec { name: "signature", kind: ArgKind::Str },
];

const VERIFY_ARGS: &[ArgSpec] = &[
    ArgSpec { name: "reproCommand", kind: ArgKind::Str },
    ArgSpec { name: "target", kind: ArgKind::Str },
];

/// A single named argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl ArgValue {
    pub fn kind(&self) -> ArgKind {
        match self {
            ArgValue::Bool(_) => ArgKind::Bool,
            ArgValue::Int(_) => ArgKind::Int,
            ArgValue::Str(_) => ArgKind::Str,
            ArgValue::List(_) => ArgKind::List,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ArgValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Values as they appear on a command line; lists expand to one value per item.
    pub fn to_cli_values(&self) -> Vec<String> {
        match self {
            ArgValue::Bool(b) => vec![b.to_string()],
            ArgValue::Int(i) => vec![i.to_string()],
            ArgValue::Str(s) => vec![s.clone()],
            ArgValue::List(items) => items.clone(),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Str(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Str(value)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Int(value)
    }
}

impl From<u32> for ArgValue {
    fn from(value: u32) -> Self {
        ArgValue::Int(i64::from(value))
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Bool(value)
    }
}

impl From<Vec<String>> for ArgValue {
    fn from(value: Vec<String>) -> Self {
        ArgValue::List(value)
    }
}

/// Named arguments for a stage invocation. Ordered so command lines are reproducible.
pub type StageArgs = BTreeMap<String, ArgValue>;

/// Check `args` against the stage's contract.
pub fn validate_args(stage: StageName, args: &StageArgs) -> Result<(), StageError> {
    for spec in stage.required_args() {
        let value = args
            .get(spec.name)
            .ok_or_else(|| StageError::ContractViolation {
                stage,
                reason: format!("missing required argument `{}`", spec.name),
            })?;
        if value.kind() != spec.kind {
            return Err(StageError::ContractViolation {
                stage,
                reason: format!(
                    "argument `{}` must be {}, got {}",
                    spec.name,
                    spec.kind,
                    value.kind()
                ),
            });
        }
    }

    if stage == StageName::Remediate
        && let Some(action) = args.get("action").and_then(ArgValue::as_str)
        && action.parse::<FixAction>().is_err()
    {
        return Err(StageError::ContractViolation {
            stage,
            reason: format!("argument `action` must be REVERT or HOTFIX, got '{}'", action),
        });
    }

    Ok(())
}

/// Fetch an argument that [`validate_args`] has already checked.
pub(crate) fn required<'a, T: ?Sized>(
    stage: StageName,
    args: &'a StageArgs,
    name: &str,
    get: impl FnOnce(&'a ArgValue) -> Option<&'a T>,
) -> Result<&'a T, StageError> {
    args.get(name)
        .and_then(get)
        .ok_or_else(|| StageError::ContractViolation {
            stage,
            reason: format!("argument `{}` is missing or has the wrong type", name),
        })
}

pub(crate) fn required_int(
    stage: StageName,
    args: &StageArgs,
    name: &str,
) -> Result<i64, StageError> {
    args.get(name)
        .and_then(ArgValue::as_int)
        .ok_or_else(|| StageError::ContractViolation {
            stage,
            reason: format!("argument `{}` is missing or has the wrong type", name),
        })
}

/// How a stage run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Exit status zero and a JSON object on stdout.
    Success(serde_json::Value),
    NonZeroExit { code: i32, stderr: String },
    /// Exit status zero but the output was empty or not a JSON object.
    MalformedOutput { raw: String },
}

impl StageOutcome {
    /// Classify a finished stage from its exit code and captured streams.
    ///
    /// Never fails: anything that is not a JSON object becomes `MalformedOutput`.
    pub fn from_output(code: i32, stdout: &str, stderr: &str) -> Self {
        if code != 0 {
            return StageOutcome::NonZeroExit {
                code,
                stderr: stderr.trim().to_string(),
            };
        }

        let trimmed = stdout.trim();
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value) if value.is_object() => StageOutcome::Success(value),
            _ => StageOutcome::MalformedOutput {
                raw: trimmed.to_string(),
            },
        }
    }

    /// Serialize a typed report as a successful outcome.
    pub fn success<T: Serialize>(report: &T) -> Self {
        match serde_json::to_value(report) {
            Ok(value) => StageOutcome::Success(value),
            Err(err) => StageOutcome::MalformedOutput {
                raw: err.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success(_))
    }

    /// Decode a successful response into the stage's typed report.
    ///
    /// A response that parses as JSON but not as `T` is a collaborator contract
    /// violation and is reported as malformed output.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, StageFailure> {
        match self {
            StageOutcome::Success(value) => {
                let raw = value.to_string();
                serde_json::from_value(value).map_err(|_| StageFailure::MalformedOutput { raw })
            }
            StageOutcome::NonZeroExit { code, stderr } => {
                Err(StageFailure::NonZeroExit { code, stderr })
            }
            StageOutcome::MalformedOutput { raw } => Err(StageFailure::MalformedOutput { raw }),
        }
    }
}

/// Why a stage produced no usable response. All variants are handled alike by the
/// orchestrator's fallback policies; the distinction is kept for reporting.
#[derive(Debug, Clone, PartialEq)]
pub enum StageFailure {
    /// Spawn failure, I/O failure or timeout.
    Invocation(String),
    NonZeroExit { code: i32, stderr: String },
    MalformedOutput { raw: String },
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageFailure::Invocation(reason) => write!(f, "{}", reason),
            StageFailure::NonZeroExit { code, stderr } if stderr.is_empty() => {
                write!(f, "exited with code {}", code)
            }
            StageFailure::NonZeroExit { code, stderr } => {
                write!(f, "exited with code {}: {}", code, stderr)
            }
            StageFailure::MalformedOutput { raw } if raw.is_empty() => {
                write!(f, "produced no output")
            }
            StageFailure::MalformedOutput { raw } => {
                write!(f, "produced malformed output: {}", truncate(raw, 120))
            }
        }
    }
}

/// Result of a stage call as seen by the orchestrator.
pub type StageReply<T> = Result<T, StageFailure>;

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}

/// Uniform interface for invoking a stage.
///
/// Implementors provide [`StageExecutor::dispatch`]; callers use
/// [`StageExecutor::invoke`], which enforces the argument contract first.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Run the stage. `args` has already been validated.
    async fn dispatch(
        &self,
        stage: StageName,
        args: &StageArgs,
    ) -> Result<StageOutcome, StageError>;

    /// Validate `args` and run the stage.
    async fn invoke(&self, stage: StageName, args: &StageArgs) -> Result<StageOutcome, StageError> {
        validate_args(stage, args)?;
        self.dispatch(stage, args).await
    }
}
