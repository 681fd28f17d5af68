//! Single built-in stage invocation — `sre-agent stage <name>`.
//!
//! Prints the stage's JSON result on stdout, so the binary itself can be
//! configured as an external stage command in agent.toml.

use anyhow::Result;
use std::path::Path;
use std::process::ExitCode;

use super::super::StageCommands;

pub async fn cmd_stage(project_dir: &Path, command: StageCommands) -> Result<ExitCode> {
    use sre_agent::config::Config;
    use sre_agent::stage::{StageArgs, StageExecutor, StageName, StageOutcome};

    let config = Config::new(project_dir.to_path_buf(), false)?;
    let router = config.stage_executor();
    let builtin = router.builtin();

    let mut args = StageArgs::new();
    let stage = match command {
        StageCommands::Monitor {
            log_source,
            threshold,
        } => {
            args.insert("logSource".into(), log_source.into());
            args.insert("threshold".into(), threshold.into());
            StageName::Monitor
        }
        StageCommands::Analyze {
            recent_errors,
            error_count,
        } => {
            args.insert("recentErrors".into(), recent_errors.into());
            args.insert("errorCount".into(), error_count.into());
            StageName::Analyze
        }
        StageCommands::Locate { repro_command } => {
            args.insert("reproCommand".into(), repro_command.into());
            StageName::Locate
        }
        StageCommands::Remediate {
            action,
            target,
            signature,
        } => {
            args.insert("action".into(), action.into());
            args.insert("target".into(), target.into());
            args.insert("signature".into(), signature.into());
            StageName::Remediate
        }
        StageCommands::Verify {
            repro_command,
            target,
        } => {
            args.insert("reproCommand".into(), repro_command.into());
            args.insert("target".into(), target.into());
            StageName::Verify
        }
    };

    match builtin.invoke(stage, &args).await? {
        StageOutcome::Success(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        StageOutcome::NonZeroExit { code, stderr } => {
            eprintln!("{}", stderr);
            Ok(ExitCode::from(u8::try_from(code).unwrap_or(1).max(1)))
        }
        StageOutcome::MalformedOutput { raw } => {
            anyhow::bail!("{} stage produced malformed output: {}", stage, raw)
        }
    }
}
