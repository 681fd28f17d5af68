//! One remediation episode — `sre-agent run`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::warn;

/// Flags that override agent.toml and the environment for a single run.
#[derive(Debug, Default)]
pub struct RunOverrides {
    pub log_source: Option<PathBuf>,
    pub threshold: Option<u32>,
    pub target: Option<String>,
}

pub async fn cmd_run(project_dir: &Path, verbose: bool, overrides: RunOverrides) -> Result<ExitCode> {
    use sre_agent::config::Config;
    use sre_agent::orchestrator::{AbortHandle, AgentState, Episode, IncidentOrchestrator};
    use sre_agent::ui::AgentUI;

    let config = Config::new(project_dir.to_path_buf(), verbose)?.with_overrides(
        overrides.log_source.as_deref(),
        overrides.threshold,
        overrides.target.as_deref(),
    );
    config.ensure_directories()?;

    let ui = Arc::new(AgentUI::new(verbose));
    for warning in config.toml().validate() {
        ui.warn(&warning);
    }

    let abort = AbortHandle::new();
    {
        let abort = abort.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, aborting before the next stage");
                abort.trigger();
            }
        });
    }

    let mut orchestrator = IncidentOrchestrator::from_config(&config, config.stage_executor())
        .with_ui(Arc::clone(&ui))
        .with_abort(abort);

    let mut episode = Episode::new();
    if let Err(err) = orchestrator.drive(&mut episode).await {
        ui.show_partial(&episode);
        return Err(err).context("Remediation episode did not complete");
    }

    match episode.state() {
        AgentState::Recorded => {
            if let Some(path) = episode.artifact_path() {
                println!("{}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        AgentState::Idle => Ok(ExitCode::SUCCESS),
        AgentState::Aborted => {
            ui.show_partial(&episode);
            Ok(ExitCode::FAILURE)
        }
        other => anyhow::bail!("Episode stopped in non-terminal state {}", other),
    }
}
