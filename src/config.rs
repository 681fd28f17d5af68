use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent_config::AgentToml;
use crate::stage::{BuiltinStages, ProcessStageExecutor, StageName, StageRouter};

/// Name of the per-project state directory.
pub const SRE_DIR: &str = ".sre";

/// Runtime configuration for one agent run.
///
/// Resolved from `.sre/agent.toml`, then environment variables
/// (`SRE_LOG_SOURCE`, `SRE_THRESHOLD`, `SRE_TARGET`), then CLI flags, and
/// handed to the orchestrator explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub sre_dir: PathBuf,
    pub audit_file: PathBuf,
    pub artifacts_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_source: PathBuf,
    pub threshold: u32,
    pub repro_command: String,
    pub target: String,
    pub stage_timeout: Duration,
    pub persist_attempts: u32,
    pub persist_backoff: Duration,
    pub verbose: bool,
    toml: AgentToml,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let sre_dir = project_dir.join(SRE_DIR);
        let toml = AgentToml::load_or_default(&sre_dir)?;
        let mut config = Self::from_toml(project_dir, toml, verbose);
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Build a config from already-parsed file settings, without consulting the environment.
    pub fn from_toml(project_dir: PathBuf, toml: AgentToml, verbose: bool) -> Self {
        let sre_dir = project_dir.join(SRE_DIR);
        let log_source = resolve(&project_dir, Path::new(&toml.monitor.log_source));

        Self {
            audit_file: sre_dir.join("audit_trail.json"),
            artifacts_dir: sre_dir.join("artifacts"),
            log_dir: sre_dir.join("logs"),
            sre_dir,
            log_source,
            threshold: toml.monitor.threshold,
            repro_command: toml.locate.repro_command.clone(),
            target: toml.remediation.target.clone(),
            stage_timeout: Duration::from_secs(toml.stages.timeout_secs),
            persist_attempts: toml.persistence.attempts.max(2),
            persist_backoff: Duration::from_millis(toml.persistence.backoff_ms),
            verbose,
            project_dir,
            toml,
        }
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(source) = lookup("SRE_LOG_SOURCE") {
            self.log_source = resolve(&self.project_dir, Path::new(&source));
        }
        if let Some(threshold) = lookup("SRE_THRESHOLD") {
            self.threshold = threshold
                .trim()
                .parse()
                .with_context(|| format!("SRE_THRESHOLD must be an integer, got '{}'", threshold))?;
        }
        if let Some(target) = lookup("SRE_TARGET") {
            self.target = target;
        }
        Ok(())
    }

    /// Apply CLI flag overrides.
    pub fn with_overrides(
        mut self,
        log_source: Option<&Path>,
        threshold: Option<u32>,
        target: Option<&str>,
    ) -> Self {
        if let Some(source) = log_source {
            self.log_source = resolve(&self.project_dir, source);
        }
        if let Some(threshold) = threshold {
            self.threshold = threshold;
        }
        if let Some(target) = target {
            self.target = target.to_string();
        }
        self
    }

    pub fn toml(&self) -> &AgentToml {
        &self.toml
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.sre_dir).context("Failed to create .sre directory")?;
        std::fs::create_dir_all(&self.artifacts_dir)
            .context("Failed to create artifacts directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    /// Executor routing each stage to its configured process or to the built-in implementation.
    pub fn stage_executor(&self) -> StageRouter {
        let mut process = ProcessStageExecutor::new(&self.project_dir, self.stage_timeout);
        for stage in StageName::all() {
            if let Some(cmd) = self.toml.stages.command_for(*stage) {
                process = process.with_command(*stage, cmd.clone());
            }
        }
        let builtin = BuiltinStages::new(&self.project_dir)
            .with_bad_change_ref(&self.toml.locate.bad_change_ref)
            .with_timeout(self.stage_timeout);
        StageRouter::new(process, builtin)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
