use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "sre-agent")]
#[command(version, about = "Automated incident remediation loop")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one monitor -> analyze -> locate -> remediate -> verify episode
    Run {
        /// Log file to scan (overrides agent.toml and SRE_LOG_SOURCE)
        #[arg(long)]
        log_source: Option<PathBuf>,

        /// Error count that counts as a spike
        #[arg(long)]
        threshold: Option<u32>,

        /// Deployment target for remediation
        #[arg(long)]
        target: Option<String>,
    },
    /// Show the remediation audit trail
    Audit {
        /// Only entries carrying this thought signature
        #[arg(long)]
        signature: Option<String>,

        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// List or show recorded incident artifacts
    Incidents {
        #[command(subcommand)]
        command: Option<IncidentsCommands>,
    },
    /// Run a single built-in stage and print its JSON result
    Stage {
        #[command(subcommand)]
        command: StageCommands,
    },
    /// View, validate or create agent.toml
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
pub enum IncidentsCommands {
    /// List recorded incidents
    List,
    /// Print one incident artifact
    Show {
        /// Incident ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum StageCommands {
    /// Count error lines in a log file
    Monitor {
        #[arg(long, alias = "log-file")]
        log_source: String,
        #[arg(long, default_value = "5")]
        threshold: i64,
    },
    /// Match recent errors against known failure patterns
    Analyze {
        #[arg(long, allow_hyphen_values = true)]
        recent_errors: Vec<String>,
        #[arg(long)]
        error_count: i64,
    },
    /// Identify the change that introduced the failure
    Locate {
        #[arg(long)]
        repro_command: String,
    },
    /// Apply a fix action to a deployment target
    Remediate {
        #[arg(long)]
        action: String,
        #[arg(long)]
        target: String,
        #[arg(long)]
        signature: String,
    },
    /// Re-run the reproduction command
    Verify {
        #[arg(long)]
        repro_command: String,
        #[arg(long)]
        target: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration file
    Validate,
    /// Create default agent.toml
    Init {
        /// Overwrite an existing agent.toml
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let project_dir = match cli.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let _ = dotenvy::from_path(project_dir.join(".env"));

    let log_dir = matches!(cli.command, Commands::Run { .. })
        .then(|| project_dir.join(sre_agent::config::SRE_DIR).join("logs"));
    let _log_guard = sre_agent::logging::init(cli.verbose, log_dir.as_deref());

    match cli.command {
        Commands::Run {
            log_source,
            threshold,
            target,
        } => {
            let overrides = cmd::RunOverrides {
                log_source,
                threshold,
                target,
            };
            return cmd::cmd_run(&project_dir, cli.verbose, overrides).await;
        }
        Commands::Audit { signature, json } => {
            cmd::cmd_audit(&project_dir, signature.as_deref(), json, cli.verbose)?;
        }
        Commands::Incidents { command } => {
            cmd::cmd_incidents(&project_dir, command)?;
        }
        Commands::Stage { command } => {
            return cmd::cmd_stage(&project_dir, command).await;
        }
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, command)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
