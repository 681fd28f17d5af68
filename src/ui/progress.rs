use crate::artifact::Incident;
use crate::orchestrator::{AbortReason, AgentState, Episode, Transition};
use crate::stage::StageName;
use crate::ui::icons::{ARROW, CHECK, CROSS, DISK, SEARCH, SHIELD, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// Terminal UI for one remediation episode, rendered via `indicatif`.
///
/// Two bars are stacked vertically:
/// - Pipeline bar: how many of the five stages have run
/// - Stage spinner: the stage currently in flight
pub struct AgentUI {
    multi: MultiProgress,
    pipeline_bar: ProgressBar,
    stage_bar: ProgressBar,
    verbose: bool,
}

impl AgentUI {
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let pipeline_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let pipeline_bar = multi.add(ProgressBar::new(StageName::all().len() as u64));
        pipeline_bar.set_style(pipeline_style);
        pipeline_bar.set_prefix("Stages");

        let stage_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg} {elapsed:.dim}")
            .expect("progress bar template is a valid static string");

        let stage_bar = multi.add(ProgressBar::new_spinner());
        stage_bar.set_style(stage_style);
        stage_bar.set_prefix("   Now");

        Self {
            multi,
            pipeline_bar,
            stage_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` when the bars are
    /// hidden (stderr is not a terminal) or the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.is_hidden() || self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// One progress line per state change.
    pub fn transition(&self, transition: &Transition) {
        let to = match transition.to {
            AgentState::Recorded => style(transition.to.as_str()).green().bold(),
            AgentState::Aborted => style(transition.to.as_str()).red().bold(),
            _ => style(transition.to.as_str()).cyan(),
        };
        self.pipeline_bar.set_message(transition.to.as_str());
        self.print_line(format!(
            "{} {} {} {}",
            ARROW,
            style(transition.from.as_str()).dim(),
            to,
            style(&transition.note).dim()
        ));
    }

    /// Start the spinner for a stage about to run.
    pub fn start_stage(&self, stage: StageName) {
        self.stage_bar.reset_elapsed();
        self.stage_bar
            .set_message(format!("Running {}", style(stage.as_str()).yellow()));
        self.stage_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    /// Stop the spinner and advance the pipeline bar.
    pub fn finish_stage(&self, stage: StageName, ok: bool, detail: &str) {
        self.stage_bar.disable_steady_tick();
        self.stage_bar.set_message("");
        self.pipeline_bar.inc(1);
        let icon = if ok { CHECK } else { CROSS };
        if ok && !self.verbose {
            self.print_line(format!("    {} {}", icon, stage));
        } else {
            self.print_line(format!("    {} {} {}", icon, stage, style(detail).dim()));
        }
    }

    pub fn spike(&self, error_count: u64, incident_id: &str) {
        self.print_line(format!(
            "    {} Spike detected: {} errors, incident {}",
            SEARCH,
            style(error_count).red().bold(),
            style(incident_id).cyan()
        ));
    }

    pub fn signature(&self, short: &str) {
        self.print_line(format!(
            "    {} Thought signature {}...",
            SHIELD,
            style(short).cyan()
        ));
    }

    pub fn warn(&self, msg: &str) {
        self.print_line(format!("    {} {}", WARN, style(msg).yellow()));
    }

    pub fn healthy(&self, detail: &str) {
        self.finish();
        self.print_line(format!(
            "{} {} {}",
            CHECK,
            style("No error spike detected. System healthy.").green(),
            style(detail).dim()
        ));
    }

    pub fn recorded(&self, incident: &Incident, path: &Path) {
        self.finish();
        let verdict = if incident.verification_result {
            style(incident.status_message.as_str()).green().bold()
        } else {
            style(incident.status_message.as_str()).yellow().bold()
        };
        self.print_line(format!("{} {}", DISK, verdict));
        self.print_line(format!(
            "    Artifact: {}",
            style(path.display()).cyan()
        ));
        for note in &incident.degradations {
            self.warn(note);
        }
    }

    pub fn aborted(&self, reason: AbortReason, detail: &str) {
        self.finish();
        self.print_line(format!(
            "{} {} {}",
            CROSS,
            style(format!("Episode aborted: {}", reason)).red().bold(),
            detail
        ));
    }

    /// Dump the transition history and the partially built incident for postmortem.
    pub fn show_partial(&self, episode: &Episode) {
        self.print_line(style("Transition history:").bold().to_string());
        for t in episode.history() {
            self.print_line(format!(
                "    {} {} -> {} {}",
                style(t.at.format("%H:%M:%S%.3f")).dim(),
                t.from,
                t.to,
                style(&t.note).dim()
            ));
        }
        if let Some(draft) = episode.draft() {
            let json = serde_json::to_string_pretty(draft)
                .unwrap_or_else(|err| format!("<unprintable draft: {}>", err));
            self.print_line(style("Partial incident:").bold().to_string());
            self.print_line(json);
        }
    }

    fn finish(&self) {
        self.stage_bar.finish_and_clear();
        self.pipeline_bar.finish_and_clear();
    }
}
