//! Incident artifact listing — `sre-agent incidents`.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::super::IncidentsCommands;

pub fn cmd_incidents(project_dir: &Path, command: Option<IncidentsCommands>) -> Result<()> {
    use sre_agent::artifact::ArtifactStore;
    use sre_agent::config::Config;

    let config = Config::new(project_dir.to_path_buf(), false)?;
    let store = ArtifactStore::new(&config.artifacts_dir);

    match command {
        None | Some(IncidentsCommands::List) => {
            let ids = store.list()?;
            if ids.is_empty() {
                println!("No incidents recorded in {}", store.dir().display());
                return Ok(());
            }
            for id in ids {
                match store.load(&id) {
                    Some(incident) => {
                        let verdict = if incident.verification_result {
                            style(format!("{:<10}", "verified")).green()
                        } else {
                            style(format!("{:<10}", "unverified")).yellow()
                        };
                        println!(
                            "{}  {}  {:<6}  {}  {}",
                            style(&incident.incident_id).cyan(),
                            incident.detected_at.format("%Y-%m-%d %H:%M:%S"),
                            incident.fix_action.as_str(),
                            verdict,
                            incident.bad_change_ref
                        );
                    }
                    None => println!("{}  {}", style(&id).cyan(), style("<unreadable>").red()),
                }
            }
        }
        Some(IncidentsCommands::Show { id }) => {
            let Some(incident) = store.load(&id) else {
                anyhow::bail!("No incident artifact found for '{}'", id);
            };
            println!("{}", serde_json::to_string_pretty(&incident)?);
        }
    }
    Ok(())
}
