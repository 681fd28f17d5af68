use super::AbortHandle;
use super::state::{AbortReason, AgentState, Episode, IncidentDraft, Transition};
use crate::artifact::{ArtifactStore, Incident, UNKNOWN_CHANGE_REF, new_incident_id};
use crate::audit::{ActionStatus, AuditEntry, AuditTrail};
use crate::config::Config;
use crate::errors::{GovernanceViolation, OrchestratorError, PersistenceError, StageError};
use crate::signature::{Signature, SignatureEngine};
use crate::stage::{
    AnalysisReport, LocateReport, MonitorReport, RemediateReport, StageArgs, StageExecutor,
    StageFailure, StageName, StageReply, VerifyReport,
};
use crate::ui::AgentUI;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// The inputs an episode needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub log_source: String,
    pub threshold: u32,
    pub repro_command: String,
    pub target: String,
    /// Total artifact write attempts; never fewer than two
    pub persist_attempts: u32,
    pub persist_backoff: Duration,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            log_source: config.log_source.to_string_lossy().into_owned(),
            threshold: config.threshold,
            repro_command: config.repro_command.clone(),
            target: config.target.clone(),
            persist_attempts: config.persist_attempts,
            persist_backoff: config.persist_backoff,
        }
    }
}

/// Drives one incident from detection to a durable record.
pub struct IncidentOrchestrator<E: StageExecutor> {
    executor: E,
    settings: RunSettings,
    engine: SignatureEngine,
    trail: AuditTrail,
    store: ArtifactStore,
    ui: Option<Arc<AgentUI>>,
    abort: AbortHandle,
}

impl<E: StageExecutor> IncidentOrchestrator<E> {
    pub fn new(
        settings: RunSettings,
        trail: AuditTrail,
        store: ArtifactStore,
        executor: E,
    ) -> Self {
        Self {
            executor,
            settings,
            engine: SignatureEngine::new(),
            trail,
            store,
            ui: None,
            abort: AbortHandle::new(),
        }
    }

    pub fn from_config(config: &Config, executor: E) -> Self {
        Self::new(
            RunSettings::from_config(config),
            AuditTrail::new(&config.audit_file),
            ArtifactStore::new(&config.artifacts_dir),
            executor,
        )
    }

    pub fn with_ui(mut self, ui: Arc<AgentUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn trail(&self) -> &AuditTrail {
        &self.trail
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run a fresh episode until it reaches a terminal state.
    pub async fn run(&mut self) -> Result<Episode, OrchestratorError> {
        let mut episode = Episode::new();
        self.drive(&mut episode).await?;
        Ok(episode)
    }

    /// Step `episode` until it is finished. On error the episode is left in
    /// the state where the failure happened, for postmortem.
    pub async fn drive(&mut self, episode: &mut Episode) -> Result<(), OrchestratorError> {
        while !episode.is_finished() {
            self.step(episode).await?;
        }
        Ok(())
    }

    /// Perform the work of the current state and make exactly one transition.
    pub async fn step(&mut self, episode: &mut Episode) -> Result<AgentState, OrchestratorError> {
        if episode.is_finished() {
            return Err(OrchestratorError::AlreadyTerminal(episode.state()));
        }
        if self.abort.is_triggered() {
            // A remediation has already been issued: keep the record, skip verification
            if episode.state() == AgentState::Verifying {
                self.record_without_verification(episode).await?;
            } else {
                self.abort_episode(
                    episode,
                    AbortReason::OperatorAbort,
                    "operator abort requested before the next stage",
                );
            }
            return Ok(episode.state());
        }

        match episode.state() {
            AgentState::Idle => self.advance(episode, AgentState::Monitoring, "episode started"),
            AgentState::Monitoring => self.monitor(episode).await?,
            AgentState::Analyzing => self.analyze(episode).await?,
            AgentState::Locating => self.locate(episode).await?,
            AgentState::Remediating => self.remediate(episode).await?,
            AgentState::Verifying => self.verify_and_record(episode).await?,
            state @ (AgentState::Recorded | AgentState::Aborted) => {
                return Err(OrchestratorError::AlreadyTerminal(state));
            }
        }
        Ok(episode.state())
    }

    async fn monitor(&self, episode: &mut Episode) -> Result<(), OrchestratorError> {
        let mut args = StageArgs::new();
        args.insert("logSource".into(), self.settings.log_source.clone().into());
        args.insert("threshold".into(), self.settings.threshold.into());

        let reply: StageReply<MonitorReport> = self.call(StageName::Monitor, &args).await?;
        match reply {
            Ok(report) if report.spike_detected => {
                let incident_id = new_incident_id();
                info!(
                    incident_id = %incident_id,
                    error_count = report.error_count,
                    threshold = self.settings.threshold,
                    "error spike detected"
                );
                if let Some(ui) = &self.ui {
                    ui.spike(report.error_count, &incident_id);
                }
                let note = format!(
                    "{} errors (threshold {}), incident {}",
                    report.error_count, self.settings.threshold, incident_id
                );
                episode.set_draft(IncidentDraft::new(
                    incident_id,
                    report.error_count,
                    report.recent_errors,
                ));
                self.advance(episode, AgentState::Analyzing, note);
            }
            Ok(report) => {
                let note = match report.error {
                    Some(reason) => {
                        warn!("monitor could not scan the log: {}", reason);
                        format!("monitor reported: {}", reason)
                    }
                    None => format!(
                        "{} errors, below threshold {}",
                        report.error_count, self.settings.threshold
                    ),
                };
                self.finish_healthy(episode, note);
            }
            Err(failure) => {
                self.finish_healthy(episode, format!("monitor stage failed: {}", failure));
            }
        }
        Ok(())
    }

    async fn analyze(&mut self, episode: &mut Episode) -> Result<(), OrchestratorError> {
        let (incident_id, args) = {
            let draft = episode
                .draft()
                .ok_or(OrchestratorError::MissingIncident(AgentState::Analyzing))?;
            let mut args = StageArgs::new();
            args.insert("recentErrors".into(), draft.sample_errors.clone().into());
            args.insert(
                "errorCount".into(),
                i64::try_from(draft.error_count).unwrap_or(i64::MAX).into(),
            );
            (draft.incident_id.clone(), args)
        };

        let reply: StageReply<AnalysisReport> = self.call(StageName::Analyze, &args).await?;
        let report = match reply {
            Ok(report) if !report.root_cause_analysis.trim().is_empty() => report,
            Ok(_) => {
                self.abort_episode(
                    episode,
                    AbortReason::AnalysisFailed,
                    "analyze stage returned an empty hypothesis",
                );
                return Ok(());
            }
            Err(failure) => {
                self.abort_episode(
                    episode,
                    AbortReason::AnalysisFailed,
                    format!("analyze stage failed: {}", failure),
                );
                return Ok(());
            }
        };

        let signature = self.engine.bind(&incident_id, &report.root_cause_analysis);
        info!(
            incident_id = %incident_id,
            signature = %signature.short(),
            fix_action = %report.fix_action,
            "hypothesis bound to thought signature"
        );
        if let Some(ui) = &self.ui {
            ui.signature(signature.short());
        }

        let note = format!("{} recommended, signature {}", report.fix_action, signature.short());
        let draft = episode
            .draft_mut()
            .ok_or(OrchestratorError::MissingIncident(AgentState::Analyzing))?;
        draft.root_cause_analysis = Some(report.root_cause_analysis);
        draft.thought_signature = Some(signature);
        draft.fix_action = Some(report.fix_action);
        draft.reproduction_script = Some(report.reproduction_script);
        self.advance(episode, AgentState::Locating, note);
        Ok(())
    }

    async fn locate(&self, episode: &mut Episode) -> Result<(), OrchestratorError> {
        let mut args = StageArgs::new();
        args.insert("reproCommand".into(), self.repro_command(episode).into());

        let reply: StageReply<LocateReport> = self.call(StageName::Locate, &args).await?;
        let (change_ref, degradation) = match reply {
            Ok(report) if !report.bad_change_ref.trim().is_empty() => {
                (report.bad_change_ref.trim().to_string(), None)
            }
            Ok(_) => (
                UNKNOWN_CHANGE_REF.to_string(),
                Some(
                    "locate stage returned an empty change reference; bad_change_ref set to unknown"
                        .to_string(),
                ),
            ),
            Err(failure) => (
                UNKNOWN_CHANGE_REF.to_string(),
                Some(format!(
                    "locate stage failed: {}; bad_change_ref set to unknown",
                    failure
                )),
            ),
        };

        let draft = episode
            .draft_mut()
            .ok_or(OrchestratorError::MissingIncident(AgentState::Locating))?;
        draft.bad_change_ref = Some(change_ref.clone());
        if let Some(note) = degradation {
            warn!(incident_id = %draft.incident_id, "{}", note);
            if let Some(ui) = &self.ui {
                ui.warn(&note);
            }
            draft.degrade(note);
        }
        self.advance(
            episode,
            AgentState::Remediating,
            format!("offending change {}", change_ref),
        );
        Ok(())
    }

    async fn remediate(&self, episode: &mut Episode) -> Result<(), OrchestratorError> {
        let (incident_id, presented, analysis, action) = {
            let draft = episode
                .draft()
                .ok_or(OrchestratorError::MissingIncident(AgentState::Remediating))?;
            let action = draft
                .fix_action
                .ok_or(OrchestratorError::MissingIncident(AgentState::Remediating))?;
            (
                draft.incident_id.clone(),
                draft.thought_signature.clone().unwrap_or_default(),
                draft.root_cause_analysis.clone().unwrap_or_default(),
                action,
            )
        };
        let target = self.settings.target.clone();

        // Nothing mutating runs unless the presented signature matches the analysis
        if let Err(violation) = self.governance_check(&presented, &incident_id, &analysis) {
            error!(incident_id = %incident_id, "{}", violation);
            let entry = AuditEntry::new(action, &target, presented, ActionStatus::Failure)
                .with_incident(&incident_id)
                .with_message(violation.to_string());
            self.record_audit(episode, &entry);
            self.abort_episode(
                episode,
                AbortReason::GovernanceViolation,
                violation.to_string(),
            );
            return Ok(());
        }

        let mut args = StageArgs::new();
        args.insert("action".into(), action.as_str().into());
        args.insert("target".into(), target.clone().into());
        args.insert("signature".into(), presented.as_str().into());

        let reply: StageReply<RemediateReport> = self.call(StageName::Remediate, &args).await?;
        let (status, message) = match reply {
            Ok(report) => (report.status, report.message),
            Err(failure) => (ActionStatus::Failure, format!("remediate stage failed: {}", failure)),
        };
        info!(
            incident_id = %incident_id,
            action = %action,
            target = %target,
            status = %status,
            "remediation attempted"
        );

        let entry = AuditEntry::new(action, &target, presented, status)
            .with_incident(&incident_id)
            .with_message(message.clone());
        self.record_audit(episode, &entry);

        let draft = episode
            .draft_mut()
            .ok_or(OrchestratorError::MissingIncident(AgentState::Remediating))?;
        draft.remediation_status = Some(status);
        draft.remediation_message = Some(message);
        self.advance(
            episode,
            AgentState::Verifying,
            format!("{} on {}: {}", action, target, status),
        );
        Ok(())
    }

    async fn verify_and_record(&self, episode: &mut Episode) -> Result<(), OrchestratorError> {
        let remediated = episode
            .draft()
            .ok_or(OrchestratorError::MissingIncident(AgentState::Verifying))?
            .remediation_status
            == Some(ActionStatus::Success);

        let mut args = StageArgs::new();
        args.insert("reproCommand".into(), self.repro_command(episode).into());
        args.insert("target".into(), self.settings.target.clone().into());

        let reply: StageReply<VerifyReport> = self.call(StageName::Verify, &args).await?;
        let draft = episode
            .draft_mut()
            .ok_or(OrchestratorError::MissingIncident(AgentState::Verifying))?;
        let verified = match reply {
            Ok(report) => {
                if report.failure_reproduced {
                    info!(incident_id = %draft.incident_id, "failure still reproduces after remediation");
                }
                remediated && !report.failure_reproduced
            }
            Err(failure) => {
                let note = format!(
                    "verify stage failed: {}; verification_result set to false",
                    failure
                );
                warn!(incident_id = %draft.incident_id, "{}", note);
                draft.degrade(note);
                false
            }
        };
        draft.verification_result = Some(verified);
        self.record(episode).await
    }

    /// Operator abort after remediation: the issued action is still recorded, unverified.
    async fn record_without_verification(&self, episode: &mut Episode) -> Result<(), OrchestratorError> {
        let draft = episode
            .draft_mut()
            .ok_or(OrchestratorError::MissingIncident(AgentState::Verifying))?;
        let note = "operator abort requested after remediation; verification skipped".to_string();
        warn!(incident_id = %draft.incident_id, "{}", note);
        if let Some(ui) = &self.ui {
            ui.warn(&note);
        }
        draft.degrade(note);
        draft.verification_result = Some(false);
        self.record(episode).await
    }

    async fn record(&self, episode: &mut Episode) -> Result<(), OrchestratorError> {
        let incident = episode
            .draft()
            .and_then(IncidentDraft::finalize)
            .ok_or(OrchestratorError::MissingIncident(AgentState::Verifying))?;
        let path = self.persist(&incident).await?;

        if let Some(ui) = &self.ui {
            ui.recorded(&incident, &path);
        }
        info!(
            incident_id = %incident.incident_id,
            verification_result = incident.verification_result,
            artifact = %path.display(),
            "incident recorded"
        );
        let transition = episode.record(incident, path);
        self.announce(transition);
        Ok(())
    }

    /// The analysis's reproduction script, or the configured command when it gave none.
    fn repro_command(&self, episode: &Episode) -> String {
        episode
            .draft()
            .and_then(|draft| draft.reproduction_script.as_deref())
            .map(str::trim)
            .filter(|script| !script.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.settings.repro_command.clone())
    }

    /// Presented signature must match both the engine's binding for the
    /// incident and a fresh derivation from the stored analysis.
    fn governance_check(
        &self,
        presented: &Signature,
        incident_id: &str,
        analysis: &str,
    ) -> Result<(), GovernanceViolation> {
        self.engine.check(presented, incident_id)?;
        let derived = SignatureEngine::derive(analysis);
        if derived != *presented {
            return Err(GovernanceViolation {
                incident_id: incident_id.to_string(),
                presented: presented.to_string(),
                expected: derived.to_string(),
            });
        }
        Ok(())
    }

    /// Append to the audit trail. Failures and recoveries degrade the episode
    /// instead of ending it.
    fn record_audit(&self, episode: &mut Episode, entry: &AuditEntry) {
        let note = match self.trail.append(entry) {
            Ok(report) => {
                debug!(len = report.len, status = %entry.status, "audit trail updated");
                report
                    .recovered
                    .map(|recovery| format!("audit trail recovered: {}", recovery))
            }
            Err(err) => {
                error!("audit append failed: {}", err);
                Some(format!("audit append failed: {}", err))
            }
        };
        if let Some(note) = note {
            if let Some(ui) = &self.ui {
                ui.warn(&note);
            }
            if let Some(draft) = episode.draft_mut() {
                draft.degrade(note);
            }
        }
    }

    /// Save the artifact, retrying transient write failures with linear backoff.
    async fn persist(&self, incident: &Incident) -> Result<PathBuf, PersistenceError> {
        let attempts = self.settings.persist_attempts.max(2);
        let mut attempt = 1;
        loop {
            match self.store.save(incident) {
                Ok(path) => {
                    debug!(attempt, artifact = %path.display(), "artifact written");
                    return Ok(path);
                }
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) if attempt >= attempts => {
                    error!(attempts, "giving up on artifact: {}", err);
                    return Err(PersistenceError::Exhausted {
                        incident_id: incident.incident_id.clone(),
                        attempts,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    warn!(attempt, attempts, "artifact write failed, retrying: {}", err);
                    tokio::time::sleep(self.settings.persist_backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Invoke a stage and decode its response. Only contract violations are
    /// errors; every other failure is returned as a reply for the caller's
    /// fallback policy.
    async fn call<T: DeserializeOwned>(
        &self,
        stage: StageName,
        args: &StageArgs,
    ) -> Result<StageReply<T>, StageError> {
        if let Some(ui) = &self.ui {
            ui.start_stage(stage);
        }
        debug!(%stage, ?args, "invoking stage");
        let started = Instant::now();

        let reply = match self.executor.invoke(stage, args).await {
            Ok(outcome) => outcome.decode::<T>(),
            Err(err) if err.is_contract_violation() => {
                error!(%stage, "{}", err);
                if let Some(ui) = &self.ui {
                    ui.finish_stage(stage, false, &err.to_string());
                }
                return Err(err);
            }
            Err(err) => Err(StageFailure::Invocation(err.to_string())),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let detail = match &reply {
            Ok(_) => {
                info!(%stage, elapsed_ms, "stage succeeded");
                String::new()
            }
            Err(failure) => {
                warn!(%stage, elapsed_ms, "stage failed: {}", failure);
                failure.to_string()
            }
        };
        if let Some(ui) = &self.ui {
            ui.finish_stage(stage, reply.is_ok(), &detail);
        }
        Ok(reply)
    }

    fn advance(&self, episode: &mut Episode, to: AgentState, note: impl Into<String>) {
        let transition = episode.transition(to, note);
        self.announce(transition);
    }

    fn finish_healthy(&self, episode: &mut Episode, note: String) {
        info!("no error spike: {}", note);
        if let Some(ui) = &self.ui {
            ui.healthy(&note);
        }
        self.advance(episode, AgentState::Idle, note);
    }

    fn abort_episode(&self, episode: &mut Episode, reason: AbortReason, detail: impl Into<String>) {
        let detail = detail.into();
        error!(reason = %reason, "episode aborted: {}", detail);
        if let Some(ui) = &self.ui {
            ui.aborted(reason, &detail);
        }
        let transition = episode.abort(reason, detail);
        self.announce(transition);
    }

    fn announce(&self, transition: &Transition) {
        info!(from = %transition.from, to = %transition.to, "{}", transition.note);
        if let Some(ui) = &self.ui {
            ui.transition(transition);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageOutcome;
    use crate::stage::testing::ScriptedExecutor;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    const ANALYSIS: &str =
        "Root Cause: Database connection failure due to missing retry logic in db.py.";

    fn settings() -> RunSettings {
        RunSettings {
            log_source: "data/mock_production.log".to_string(),
            threshold: 5,
            repro_command: "python test_repro.py".to_string(),
            target: "deployment/main-app".to_string(),
            persist_attempts: 3,
            persist_backoff: Duration::from_millis(1),
        }
    }

    fn orchestrator(dir: &TempDir, executor: ScriptedExecutor) -> IncidentOrchestrator<ScriptedExecutor> {
        IncidentOrchestrator::new(
            settings(),
            AuditTrail::new(dir.path().join("audit_trail.json")),
            ArtifactStore::new(dir.path().join("artifacts")),
            executor,
        )
    }

    fn spike() -> Value {
        json!({
            "spike_detected": true,
            "error_count": 7,
            "recent_errors": ["ERROR ConnectionRefusedError: database:5432"]
        })
    }

    fn analysis() -> Value {
        json!({
            "root_cause_analysis": ANALYSIS,
            "fix_action": "REVERT",
            "reproduction_script": "import sys; sys.exit(0)"
        })
    }

    fn remediated() -> Value {
        json!({"status": "SUCCESS", "message": "REVERT applied to deployment/main-app"})
    }

    fn through_analysis() -> ScriptedExecutor {
        ScriptedExecutor::new()
            .json(StageName::Monitor, spike())
            .json(StageName::Analyze, analysis())
    }

    fn happy_path() -> ScriptedExecutor {
        through_analysis()
            .json(StageName::Locate, json!({"bad_change_ref": "a1b2c3d4"}))
            .json(StageName::Remediate, remediated())
            .json(StageName::Verify, json!({"failure_reproduced": false}))
    }

    async fn step_until(
        orch: &mut IncidentOrchestrator<ScriptedExecutor>,
        episode: &mut Episode,
        state: AgentState,
    ) {
        while episode.state() != state {
            assert!(!episode.is_finished(), "episode ended before reaching {}", state);
            orch.step(episode).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_no_spike_finishes_idle_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let executor = ScriptedExecutor::new().json(
            StageName::Monitor,
            json!({"spike_detected": false, "error_count": 2, "recent_errors": []}),
        );
        let mut orch = orchestrator(&dir, executor);

        let episode = orch.run().await.unwrap();

        assert!(episode.is_healthy());
        assert_eq!(episode.state(), AgentState::Idle);
        assert!(episode.draft().is_none());
        assert!(orch.store().list().unwrap().is_empty());
        assert!(orch.trail().read_all().unwrap().is_empty());
        assert_eq!(orch.executor().calls().len(), 1);
    }

    #[tokio::test]
    async fn test_monitor_failure_is_treated_as_healthy() {
        let dir = TempDir::new().unwrap();
        let executor = ScriptedExecutor::new().on(
            StageName::Monitor,
            Ok(StageOutcome::MalformedOutput {
                raw: "Traceback (most recent call last)".to_string(),
            }),
        );
        let mut orch = orchestrator(&dir, executor);

        let episode = orch.run().await.unwrap();
        assert!(episode.is_healthy());
        assert!(!orch.executor().called(StageName::Analyze));
    }

    #[tokio::test]
    async fn test_full_pipeline_records_verified_incident() {
        let dir = TempDir::new().unwrap();
        let mut orch = orchestrator(&dir, happy_path());

        let episode = orch.run().await.unwrap();

        assert_eq!(episode.state(), AgentState::Recorded);
        let incident = episode.incident().unwrap();
        assert!(incident.verification_result);
        assert_eq!(incident.bad_change_ref, "a1b2c3d4");
        assert_eq!(incident.error_count, 7);
        assert_eq!(incident.thought_signature, SignatureEngine::derive(ANALYSIS));
        assert!(incident.degradations.is_empty());

        let entries = orch.trail().read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, ActionStatus::Success);
        assert_eq!(entries[0].thought_signature, incident.thought_signature);
        assert_eq!(entries[0].incident_id.as_deref(), Some(incident.incident_id.as_str()));

        let stored = orch.store().load(&incident.incident_id).unwrap();
        assert_eq!(&stored, incident);
        assert_eq!(
            episode.artifact_path().unwrap(),
            orch.store().path_for(&incident.incident_id).unwrap()
        );

        let visited: Vec<AgentState> = episode.history().iter().map(|t| t.to).collect();
        assert_eq!(
            visited,
            vec![
                AgentState::Monitoring,
                AgentState::Analyzing,
                AgentState::Locating,
                AgentState::Remediating,
                AgentState::Verifying,
                AgentState::Recorded,
            ]
        );
    }

    #[tokio::test]
    async fn test_remediate_receives_derived_signature() {
        let dir = TempDir::new().unwrap();
        let mut orch = orchestrator(&dir, happy_path());
        orch.run().await.unwrap();

        let calls = orch.executor().calls();
        let (_, args) = calls
            .iter()
            .find(|(stage, _)| *stage == StageName::Remediate)
            .unwrap();
        let expected = SignatureEngine::derive(ANALYSIS);
        assert_eq!(args["signature"].as_str(), Some(expected.as_str()));
        assert_eq!(args["action"].as_str(), Some("REVERT"));
        assert_eq!(args["target"].as_str(), Some("deployment/main-app"));
    }

    #[tokio::test]
    async fn test_locate_timeout_degrades_to_unknown() {
        let dir = TempDir::new().unwrap();
        let executor = through_analysis()
            .on(
                StageName::Locate,
                Err(StageError::Timeout {
                    stage: StageName::Locate,
                    secs: 60,
                }),
            )
            .json(StageName::Remediate, remediated())
            .json(StageName::Verify, json!({"failure_reproduced": false}));
        let mut orch = orchestrator(&dir, executor);

        let episode = orch.run().await.unwrap();

        assert_eq!(episode.state(), AgentState::Recorded);
        let incident = episode.incident().unwrap();
        assert_eq!(incident.bad_change_ref, UNKNOWN_CHANGE_REF);
        assert!(!incident.location_known());
        assert_eq!(incident.degradations.len(), 1);
        assert!(incident.degradations[0].contains("timed out"));
        assert!(orch.executor().called(StageName::Remediate));
    }

    #[tokio::test]
    async fn test_locate_malformed_output_degrades_to_unknown() {
        let dir = TempDir::new().unwrap();
        let executor = through_analysis()
            .on(
                StageName::Locate,
                Ok(StageOutcome::MalformedOutput {
                    raw: "a1b2c3d4".to_string(),
                }),
            )
            .json(StageName::Remediate, remediated())
            .json(StageName::Verify, json!({"failure_reproduced": false}));
        let mut orch = orchestrator(&dir, executor);

        let episode = orch.run().await.unwrap();
        assert_eq!(episode.incident().unwrap().bad_change_ref, UNKNOWN_CHANGE_REF);
    }

    #[tokio::test]
    async fn test_tampered_signature_aborts_before_remediation() {
        let dir = TempDir::new().unwrap();
        let mut orch = orchestrator(&dir, happy_path());
        let mut episode = Episode::new();

        step_until(&mut orch, &mut episode, AgentState::Remediating).await;
        let forged = Signature::new("0".repeat(64));
        episode.draft_mut().unwrap().thought_signature = Some(forged.clone());
        orch.step(&mut episode).await.unwrap();

        assert_eq!(episode.state(), AgentState::Aborted);
        assert_eq!(episode.abort_reason(), Some(AbortReason::GovernanceViolation));
        assert!(!orch.executor().called(StageName::Remediate));
        assert!(orch.store().list().unwrap().is_empty());

        let entries = orch.trail().read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, ActionStatus::Failure);
        assert_eq!(entries[0].thought_signature, forged);
        assert!(entries.iter().all(|e| e.status != ActionStatus::Success));
    }

    #[tokio::test]
    async fn test_tampered_analysis_aborts_before_remediation() {
        let dir = TempDir::new().unwrap();
        let mut orch = orchestrator(&dir, happy_path());
        let mut episode = Episode::new();

        step_until(&mut orch, &mut episode, AgentState::Remediating).await;
        episode.draft_mut().unwrap().root_cause_analysis =
            Some("Root Cause: nothing to see here.".to_string());
        orch.step(&mut episode).await.unwrap();

        assert_eq!(episode.abort_reason(), Some(AbortReason::GovernanceViolation));
        assert!(!orch.executor().called(StageName::Remediate));
        assert!(
            orch.trail()
                .read_all()
                .unwrap()
                .iter()
                .all(|e| e.status == ActionStatus::Failure)
        );
    }

    #[tokio::test]
    async fn test_analysis_failure_aborts() {
        let dir = TempDir::new().unwrap();
        let executor = ScriptedExecutor::new()
            .json(StageName::Monitor, spike())
            .on(
                StageName::Analyze,
                Ok(StageOutcome::NonZeroExit {
                    code: 1,
                    stderr: "no recognised failure pattern".to_string(),
                }),
            );
        let mut orch = orchestrator(&dir, executor);

        let episode = orch.run().await.unwrap();

        assert_eq!(episode.state(), AgentState::Aborted);
        assert_eq!(episode.abort_reason(), Some(AbortReason::AnalysisFailed));
        assert!(episode.abort_detail().unwrap().contains("no recognised failure pattern"));
        assert!(!orch.executor().called(StageName::Locate));
        assert!(orch.trail().read_all().unwrap().is_empty());
        assert!(orch.store().list().unwrap().is_empty());
        // Evidence is kept for postmortem
        assert_eq!(episode.draft().unwrap().error_count, 7);
    }

    #[tokio::test]
    async fn test_analysis_without_fix_action_aborts() {
        let dir = TempDir::new().unwrap();
        let executor = ScriptedExecutor::new()
            .json(StageName::Monitor, spike())
            .json(StageName::Analyze, json!({"root_cause_analysis": ANALYSIS}));
        let mut orch = orchestrator(&dir, executor);

        let episode = orch.run().await.unwrap();
        assert_eq!(episode.abort_reason(), Some(AbortReason::AnalysisFailed));
    }

    #[tokio::test]
    async fn test_failed_remediation_is_audited_and_unverified() {
        let dir = TempDir::new().unwrap();
        let executor = through_analysis()
            .json(StageName::Locate, json!({"bad_change_ref": "a1b2c3d4"}))
            .json(
                StageName::Remediate,
                json!({"status": "FAILURE", "message": "deployment not found"}),
            )
            .json(StageName::Verify, json!({"failure_reproduced": false}));
        let mut orch = orchestrator(&dir, executor);

        let episode = orch.run().await.unwrap();

        assert_eq!(episode.state(), AgentState::Recorded);
        let incident = episode.incident().unwrap();
        assert!(!incident.verification_result);
        assert_eq!(incident.remediation_message.as_deref(), Some("deployment not found"));

        let entries = orch.trail().read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, ActionStatus::Failure);
    }

    #[tokio::test]
    async fn test_remediate_crash_is_audited_as_failure() {
        let dir = TempDir::new().unwrap();
        let executor = through_analysis()
            .json(StageName::Locate, json!({"bad_change_ref": "a1b2c3d4"}))
            .on(
                StageName::Remediate,
                Ok(StageOutcome::NonZeroExit {
                    code: 2,
                    stderr: "kubectl: connection refused".to_string(),
                }),
            )
            .json(StageName::Verify, json!({"failure_reproduced": false}));
        let mut orch = orchestrator(&dir, executor);

        let episode = orch.run().await.unwrap();

        let entries = orch.trail().read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, ActionStatus::Failure);
        assert!(entries[0].message.as_deref().unwrap().contains("kubectl"));
        assert!(!episode.incident().unwrap().verification_result);
    }

    #[tokio::test]
    async fn test_reproduced_failure_fails_verification() {
        let dir = TempDir::new().unwrap();
        let executor = through_analysis()
            .json(StageName::Locate, json!({"bad_change_ref": "a1b2c3d4"}))
            .json(StageName::Remediate, remediated())
            .json(StageName::Verify, json!({"failure_reproduced": true}));
        let mut orch = orchestrator(&dir, executor);

        let episode = orch.run().await.unwrap();
        let incident = episode.incident().unwrap();
        assert!(!incident.verification_result);
        assert!(incident.degradations.is_empty());
    }

    #[tokio::test]
    async fn test_verify_failure_is_recorded_as_degradation() {
        let dir = TempDir::new().unwrap();
        let executor = through_analysis()
            .json(StageName::Locate, json!({"bad_change_ref": "a1b2c3d4"}))
            .json(StageName::Remediate, remediated())
            .on(
                StageName::Verify,
                Err(StageError::Timeout {
                    stage: StageName::Verify,
                    secs: 60,
                }),
            );
        let mut orch = orchestrator(&dir, executor);

        let episode = orch.run().await.unwrap();
        let incident = episode.incident().unwrap();
        assert!(!incident.verification_result);
        assert!(incident.degradations[0].starts_with("verify stage"));
    }

    #[tokio::test]
    async fn test_operator_abort_stops_before_next_stage() {
        let dir = TempDir::new().unwrap();
        let mut orch = orchestrator(&dir, happy_path());
        let abort = orch.abort_handle();
        let mut episode = Episode::new();

        step_until(&mut orch, &mut episode, AgentState::Locating).await;
        abort.trigger();
        orch.step(&mut episode).await.unwrap();

        assert_eq!(episode.state(), AgentState::Aborted);
        assert_eq!(episode.abort_reason(), Some(AbortReason::OperatorAbort));
        assert!(!orch.executor().called(StageName::Locate));
        assert!(orch.trail().read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operator_abort_after_remediation_still_records() {
        let dir = TempDir::new().unwrap();
        let mut orch = orchestrator(&dir, happy_path());
        let abort = orch.abort_handle();
        let mut episode = Episode::new();

        step_until(&mut orch, &mut episode, AgentState::Verifying).await;
        abort.trigger();
        orch.step(&mut episode).await.unwrap();

        assert_eq!(episode.state(), AgentState::Recorded);
        assert!(episode.abort_reason().is_none());
        assert!(!orch.executor().called(StageName::Verify));

        let incident = episode.incident().unwrap();
        assert!(!incident.verification_result);
        assert!(incident.degradations[0].contains("operator abort"));
        assert!(orch.store().load(&incident.incident_id).is_some());
        assert_eq!(orch.trail().read_all().unwrap().len(), 1);
    }

    fn repro_arg(orch: &IncidentOrchestrator<ScriptedExecutor>, stage: StageName) -> String {
        let calls = orch.executor().calls();
        let (_, args) = calls.iter().find(|(s, _)| *s == stage).unwrap();
        args["reproCommand"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_analysis_reproduction_script_drives_locate_and_verify() {
        let dir = TempDir::new().unwrap();
        let executor = ScriptedExecutor::new()
            .json(StageName::Monitor, spike())
            .json(
                StageName::Analyze,
                json!({
                    "root_cause_analysis": ANALYSIS,
                    "fix_action": "REVERT",
                    "reproduction_script": "nc -z database 5432"
                }),
            )
            .json(StageName::Locate, json!({"bad_change_ref": "a1b2c3d4"}))
            .json(StageName::Remediate, remediated())
            .json(StageName::Verify, json!({"failure_reproduced": false}));
        let mut orch = orchestrator(&dir, executor);

        let episode = orch.run().await.unwrap();

        assert_eq!(repro_arg(&orch, StageName::Locate), "nc -z database 5432");
        assert_eq!(repro_arg(&orch, StageName::Verify), "nc -z database 5432");
        assert_eq!(
            episode.incident().unwrap().reproduction_script,
            "nc -z database 5432"
        );
    }

    #[tokio::test]
    async fn test_blank_reproduction_script_falls_back_to_configured_command() {
        let dir = TempDir::new().unwrap();
        let executor = ScriptedExecutor::new()
            .json(StageName::Monitor, spike())
            .json(
                StageName::Analyze,
                json!({"root_cause_analysis": ANALYSIS, "fix_action": "REVERT", "reproduction_script": "  "}),
            )
            .json(StageName::Locate, json!({"bad_change_ref": "a1b2c3d4"}))
            .json(StageName::Remediate, remediated())
            .json(StageName::Verify, json!({"failure_reproduced": false}));
        let mut orch = orchestrator(&dir, executor);

        orch.run().await.unwrap();

        assert_eq!(repro_arg(&orch, StageName::Locate), "python test_repro.py");
        assert_eq!(repro_arg(&orch, StageName::Verify), "python test_repro.py");
    }

    #[tokio::test]
    async fn test_persistence_failure_is_retried_then_fatal() {
        let dir = TempDir::new().unwrap();
        // A regular file where the artifact directory should be
        std::fs::write(dir.path().join("artifacts"), "not a directory").unwrap();
        let mut orch = orchestrator(&dir, happy_path());
        let mut episode = Episode::new();

        let err = orch.drive(&mut episode).await.unwrap_err();

        match err {
            OrchestratorError::Persistence(PersistenceError::Exhausted { attempts, .. }) => {
                assert_eq!(attempts, 3)
            }
            other => panic!("expected exhausted persistence, got {other:?}"),
        }
        assert_eq!(episode.state(), AgentState::Verifying);
        assert!(!episode.is_finished());
        assert!(episode.incident().is_none());
        assert_eq!(episode.draft().unwrap().verification_result, Some(true));
        // The governed action itself was still audited
        assert_eq!(orch.trail().read_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_trail_is_reported_on_incident() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("audit_trail.json"), "{{{").unwrap();
        let mut orch = orchestrator(&dir, happy_path());

        let episode = orch.run().await.unwrap();

        let incident = episode.incident().unwrap();
        assert!(
            incident
                .degradations
                .iter()
                .any(|d| d.starts_with("audit trail recovered"))
        );
        assert_eq!(orch.trail().read_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_contract_violation_is_fatal() {
        let dir = TempDir::new().unwrap();
        let executor = through_analysis().on(
            StageName::Locate,
            Err(StageError::ContractViolation {
                stage: StageName::Locate,
                reason: "missing required argument `reproCommand`".to_string(),
            }),
        );
        let mut orch = orchestrator(&dir, executor);

        let err = orch.run().await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Stage(StageError::ContractViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_repeated_runs_share_signature_not_incident_id() {
        let dir = TempDir::new().unwrap();
        let first = orchestrator(&dir, happy_path()).run().await.unwrap();
        let second = orchestrator(&dir, happy_path()).run().await.unwrap();

        let (a, b) = (first.incident().unwrap(), second.incident().unwrap());
        assert_ne!(a.incident_id, b.incident_id);
        assert_eq!(a.thought_signature, b.thought_signature);

        let store = ArtifactStore::new(dir.path().join("artifacts"));
        assert_eq!(store.list().unwrap().len(), 2);
        assert_eq!(
            AuditTrail::new(dir.path().join("audit_trail.json"))
                .read_all()
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_step_after_terminal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut orch = orchestrator(&dir, happy_path());
        let mut episode = orch.run().await.unwrap();

        let err = orch.step(&mut episode).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::AlreadyTerminal(AgentState::Recorded)
        ));
    }
}
