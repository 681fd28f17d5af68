//! File-based configuration for the agent.
//!
//! Settings live in `.sre/agent.toml`. Every section is optional; a missing
//! file yields the defaults shown below.
//!
//! ```toml
//! [monitor]
//! log_source = "data/mock_production.log"
//! threshold = 5
//!
//! [locate]
//! repro_command = "python test_repro.py"
//! bad_change_ref = "a1b2c3d4"   # reported by the built-in locator
//!
//! [remediation]
//! target = "deployment/main-app"
//!
//! [stages]
//! timeout_secs = 60
//!
//! # Run a stage as an external process instead of the built-in implementation.
//! # Arguments are appended as `--kebab-case-name value` flags.
//! [stages.locate]
//! command = "python3"
//! args = ["skills/git_bisect/bisect.py"]
//! timeout_secs = 300
//!
//! [persistence]
//! attempts = 3
//! backoff_ms = 100
//! ```

use crate::stage::StageName;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "agent.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSection {
    /// Log file scanned by the monitor stage (relative to the project directory)
    #[serde(default = "default_log_source")]
    pub log_source: String,
    /// Error lines needed to declare a spike
    #[serde(default = "default_threshold")]
    pub threshold: u32,
}

fn default_log_source() -> String {
    "data/mock_production.log".to_string()
}

fn default_threshold() -> u32 {
    5
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            log_source: default_log_source(),
            threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocateSection {
    /// Command that reproduces the failure; used by locate and verify
    #[serde(default = "default_repro_command")]
    pub repro_command: String,
    /// Change reported by the built-in reference locator
    #[serde(default = "default_bad_change_ref")]
    pub bad_change_ref: String,
}

fn default_repro_command() -> String {
    "python test_repro.py".to_string()
}

fn default_bad_change_ref() -> String {
    "a1b2c3d4".to_string()
}

impl Default for LocateSection {
    fn default() -> Self {
        Self {
            repro_command: default_repro_command(),
            bad_change_ref: default_bad_change_ref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationSection {
    /// Deployment the remediation stage acts on
    #[serde(default = "default_target")]
    pub target: String,
}

fn default_target() -> String {
    "deployment/main-app".to_string()
}

impl Default for RemediationSection {
    fn default() -> Self {
        Self {
            target: default_target(),
        }
    }
}

/// An external process standing in for a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Overrides `[stages] timeout_secs` for this stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl StageCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            timeout_secs: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesSection {
    /// Execution budget for every stage, in seconds
    #[serde(default = "default_stage_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<StageCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyze: Option<StageCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locate: Option<StageCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediate: Option<StageCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<StageCommand>,
}

fn default_stage_timeout_secs() -> u64 {
    60
}

impl Default for StagesSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_stage_timeout_secs(),
            monitor: None,
            analyze: None,
            locate: None,
            remediate: None,
            verify: None,
        }
    }
}

impl StagesSection {
    pub fn command_for(&self, stage: StageName) -> Option<&StageCommand> {
        match stage {
            StageName::Monitor => self.monitor.as_ref(),
            StageName::Analyze => self.analyze.as_ref(),
            StageName::Locate => self.locate.as_ref(),
            StageName::Remediate => self.remediate.as_ref(),
            StageName::Verify => self.verify.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSection {
    /// Total attempts to write the incident artifact (at least 2)
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Delay before the first retry; grows linearly per attempt
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    100
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// The complete agent.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentToml {
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub locate: LocateSection,
    #[serde(default)]
    pub remediation: RemediationSection,
    #[serde(default)]
    pub stages: StagesSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
}

impl AgentToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse agent.toml")
    }

    /// Load `<sre_dir>/agent.toml`, or the defaults if it does not exist.
    pub fn load_or_default(sre_dir: &Path) -> Result<Self> {
        let config_path = sre_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize agent.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Configuration problems that do not prevent a run.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.monitor.threshold == 0 {
            warnings.push(
                "monitor.threshold is 0: every run will report a spike, even on a clean log"
                    .to_string(),
            );
        }
        if self.remediation.target.trim().is_empty() {
            warnings.push("remediation.target is empty".to_string());
        }
        if self.locate.repro_command.trim().is_empty() {
            warnings.push("locate.repro_command is empty".to_string());
        }
        if self.stages.timeout_secs == 0 {
            warnings.push("stages.timeout_secs is 0: every stage will time out".to_string());
        }
        if self.persistence.attempts < 2 {
            warnings.push(format!(
                "persistence.attempts = {} is raised to 2: the artifact write is always retried once",
                self.persistence.attempts
            ));
        }
        for stage in StageName::all() {
            if let Some(cmd) = self.stages.command_for(*stage)
                && cmd.command.trim().is_empty()
            {
                warnings.push(format!("stages.{}.command is empty", stage));
            }
        }

        warnings
    }
}
