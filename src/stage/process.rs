//! Stages run as external processes.
//!
//! A configured stage is spawned with its arguments as `--kebab-case` flags
//! (`reproCommand` becomes `--repro-command <value>`; list arguments repeat
//! the flag once per item). The process must print a single JSON object on
//! stdout and exit 0; anything else is classified by
//! [`StageOutcome::from_output`]. `SRE_STAGE` names the stage being run.

use super::{StageArgs, StageExecutor, StageName, StageOutcome};
use crate::agent_config::StageCommand;
use crate::errors::StageError;
use crate::util::kebab_case;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Spawns the process configured for each stage.
#[derive(Debug, Clone)]
pub struct ProcessStageExecutor {
    /// Working directory for every stage process
    project_dir: PathBuf,
    commands: HashMap<StageName, StageCommand>,
    default_timeout: Duration,
}

impl ProcessStageExecutor {
    pub fn new(project_dir: impl AsRef<Path>, default_timeout: Duration) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
            commands: HashMap::new(),
            default_timeout,
        }
    }

    pub fn with_command(mut self, stage: StageName, command: StageCommand) -> Self {
        self.commands.insert(stage, command);
        self
    }

    pub fn with_timeout(mut self, default_timeout: Duration) -> Self {
        self.default_timeout = default_timeout;
        self
    }

    /// Whether a process is configured for `stage`.
    pub fn handles(&self, stage: StageName) -> bool {
        self.commands.contains_key(&stage)
    }

    fn timeout_for(&self, command: &StageCommand) -> Duration {
        command
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }
}

/// Command-line arguments for a stage: configured args followed by one flag per argument.
fn build_argv(command: &StageCommand, args: &StageArgs) -> Vec<String> {
    let mut argv = command.args.clone();
    for (name, value) in args {
        let flag = format!("--{}", kebab_case(name));
        for item in value.to_cli_values() {
            argv.push(flag.clone());
            argv.push(item);
        }
    }
    argv
}

#[async_trait]
impl StageExecutor for ProcessStageExecutor {
    async fn dispatch(
        &self,
        stage: StageName,
        args: &StageArgs,
    ) -> Result<StageOutcome, StageError> {
        let command = self
            .commands
            .get(&stage)
            .ok_or_else(|| StageError::Spawn {
                stage,
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no command configured for stage {}", stage),
                ),
            })?;

        let argv = build_argv(command, args);
        let limit = self.timeout_for(command);
        debug!(%stage, command = %command.command, ?argv, timeout_secs = limit.as_secs(), "spawning stage");

        let child = Command::new(&command.command)
            .args(&argv)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("SRE_STAGE", stage.as_str())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StageError::Spawn { stage, source })?;

        // Dropping the wait future on timeout kills the child
        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| StageError::Io { stage, source })?,
            Err(_) => {
                return Err(StageError::Timeout {
                    stage,
                    secs: limit.as_secs(),
                });
            }
        };

        let code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(%stage, code, "stage exited");

        Ok(StageOutcome::from_output(code, &stdout, &stderr))
    }
}
