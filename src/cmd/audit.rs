//! Audit trail view — `sre-agent audit`.

use anyhow::Result;
use console::style;
use std::path::Path;

pub fn cmd_audit(
    project_dir: &Path,
    signature: Option<&str>,
    json: bool,
    verbose: bool,
) -> Result<()> {
    use sre_agent::audit::{ActionStatus, AuditTrail};
    use sre_agent::config::Config;
    use sre_agent::signature::Signature;

    let config = Config::new(project_dir.to_path_buf(), verbose)?;
    let trail = AuditTrail::new(&config.audit_file);

    let entries = match signature {
        Some(sig) => trail.entries_for_signature(&Signature::new(sig))?,
        None => trail.read_all()?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No audit entries in {}", trail.path().display());
        return Ok(());
    }

    for (i, entry) in entries.iter().enumerate() {
        let status = match entry.status {
            ActionStatus::Success => style(format!("{:<7}", entry.status.as_str())).green(),
            ActionStatus::Failure => style(format!("{:<7}", entry.status.as_str())).red(),
        };
        println!(
            "{:>4}  {}  {}  {:<6}  {}  sig {}  {}",
            i + 1,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            status,
            entry.action.as_str(),
            entry.target,
            style(entry.thought_signature.short()).cyan(),
            entry.incident_id.as_deref().unwrap_or("-")
        );
        if verbose && let Some(message) = &entry.message {
            println!("        {}", style(message).dim());
        }
    }
    println!();
    println!("{} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
    Ok(())
}
