//! Configuration view and validation commands — `sre-agent config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use sre_agent::agent_config::{AgentToml, CONFIG_FILE};
    use sre_agent::config::{Config, SRE_DIR};
    use sre_agent::stage::StageName;

    let sre_dir = project_dir.join(SRE_DIR);
    let config_path = sre_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Agent Configuration");
            println!("===================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                AgentToml::load(&config_path)?
            } else {
                println!("No agent.toml found at {}", config_path.display());
                println!("Using default configuration.");
                AgentToml::default()
            };
            println!();

            println!("[monitor]");
            println!("  log_source = \"{}\"", toml.monitor.log_source);
            println!("  threshold = {}", toml.monitor.threshold);
            println!();
            println!("[locate]");
            println!("  repro_command = \"{}\"", toml.locate.repro_command);
            println!("  bad_change_ref = \"{}\"", toml.locate.bad_change_ref);
            println!();
            println!("[remediation]");
            println!("  target = \"{}\"", toml.remediation.target);
            println!();
            println!("[stages]");
            println!("  timeout_secs = {}", toml.stages.timeout_secs);
            for stage in StageName::all() {
                match toml.stages.command_for(*stage) {
                    Some(cmd) => {
                        let timeout = cmd
                            .timeout_secs
                            .map(|secs| format!(" (timeout {}s)", secs))
                            .unwrap_or_default();
                        println!(
                            "  {} = \"{} {}\"{}",
                            stage,
                            cmd.command,
                            cmd.args.join(" "),
                            timeout
                        );
                    }
                    None => println!("  {} = built-in", stage),
                }
            }
            println!();
            println!("[persistence]");
            println!("  attempts = {}", toml.persistence.attempts);
            println!("  backoff_ms = {}", toml.persistence.backoff_ms);
            println!();

            println!("Effective values (with env overrides):");
            let config = Config::new(project_dir.to_path_buf(), false)?;
            println!("  log_source = \"{}\"", config.log_source.display());
            println!("  threshold = {}", config.threshold);
            println!("  target = \"{}\"", config.target);
            println!("  persist_attempts = {}", config.persist_attempts);
            println!("  audit_file = \"{}\"", config.audit_file.display());
            println!("  artifacts_dir = \"{}\"", config.artifacts_dir.display());
            println!();

            if !config_path.exists() {
                println!("Run 'sre-agent config init' to create an agent.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No agent.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = AgentToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                println!("agent.toml already exists at {}", config_path.display());
                println!("Pass --force to overwrite it.");
                return Ok(());
            }

            std::fs::create_dir_all(&sre_dir)?;
            AgentToml::default().save(&config_path)?;

            println!("Created agent.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [monitor] log_source, threshold");
            println!("  - [locate] repro_command, bad_change_ref");
            println!("  - [remediation] target");
            println!("  - [stages.<name>] command, args, timeout_secs to run a stage as a process");
            println!();
        }
    }

    Ok(())
}
