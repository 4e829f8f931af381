// Wipe Orchestrator - Drives one wipe session from configuration to certificate
//
// The workflow owns the session context and advances through a fixed state
// machine. Long-running work (health analysis, overwriting) is delegated to the
// health evaluator and wipe executor; the record store is the only place state
// is persisted.

use crate::cancel::CancelFlag;
use crate::crypto::CertificateIssuer;
use crate::executor::{OverwriteOutcome, OverwriteRequest, WipeExecutor};
use crate::health::{GateDecision, HealthEvaluator, HealthReport};
use crate::progress::{ProgressTracker, ProgressUpdate};
use crate::store::RecordStore;
use crate::{
    Certificate, NewWipeSession, Operation, Platform, SessionPatch, SessionStatus, WipeMethod,
    WipeSession, WipeType, WorkflowError, WorkflowResult,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Configuring,
    AlgorithmSelection,
    HealthChecking,
    ReadyToWipe,
    Wiping,
    Aborted,
    Completed,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Aborted | WorkflowState::Completed)
    }

    /// Screen number shown to the user (1 configure .. 5 wipe)
    pub fn step_indicator(&self) -> u8 {
        match self {
            WorkflowState::Configuring => 1,
            WorkflowState::AlgorithmSelection => 2,
            WorkflowState::HealthChecking | WorkflowState::ReadyToWipe => 3,
            WorkflowState::Aborted => 4,
            WorkflowState::Wiping | WorkflowState::Completed => 5,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowState::Configuring => "configuring",
            WorkflowState::AlgorithmSelection => "algorithm_selection",
            WorkflowState::HealthChecking => "health_checking",
            WorkflowState::ReadyToWipe => "ready_to_wipe",
            WorkflowState::Wiping => "wiping",
            WorkflowState::Aborted => "aborted",
            WorkflowState::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Raw user input for the configuration step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionForm {
    pub session_name: String,
    pub wipe_type: String,
    pub target_path: String,
    pub platform: String,
    pub organization: Option<String>,
}

impl SessionForm {
    /// Check the four required fields and parse the enumerated ones
    pub fn validate(&self) -> WorkflowResult<NewWipeSession> {
        fn required(field: &'static str, value: &str) -> WorkflowResult<String> {
            let value = value.trim();
            if value.is_empty() {
                return Err(WorkflowError::MissingField(field));
            }
            Ok(value.to_string())
        }

        let session_name = required("session_name", &self.session_name)?;
        let wipe_type_raw = required("wipe_type", &self.wipe_type)?;
        let target_path = required("target_path", &self.target_path)?;
        let platform_raw = required("platform", &self.platform)?;

        let wipe_type: WipeType = wipe_type_raw.parse().map_err(|_| WorkflowError::InvalidField {
            field: "wipe_type",
            value: wipe_type_raw.clone(),
        })?;
        let platform: Platform = platform_raw.parse().map_err(|_| WorkflowError::InvalidField {
            field: "platform",
            value: platform_raw.clone(),
        })?;

        let organization = self
            .organization
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from);

        Ok(NewWipeSession {
            session_name,
            wipe_type,
            target_path,
            platform,
            organization,
        })
    }
}

/// One user's pass through configure, algorithm choice, health gate, wipe
/// and certification.
///
/// Operations that are not allowed in the current state fail with
/// [`WorkflowError::InvalidTransition`] and leave the workflow untouched.
/// Capability failures and stalls are recorded (see [`last_error`] and
/// [`stalled`]) and leave the workflow in its current state so the step can
/// be retried.
///
/// [`last_error`]: WipeWorkflow::last_error
/// [`stalled`]: WipeWorkflow::stalled
pub struct WipeWorkflow {
    store: Arc<dyn RecordStore>,
    evaluator: Arc<HealthEvaluator>,
    executor: Arc<WipeExecutor>,
    issuer: Arc<CertificateIssuer>,

    state: WorkflowState,
    form: Option<SessionForm>,
    session: Option<WipeSession>,
    health_report: Option<HealthReport>,
    certificate: Option<Certificate>,
    /// Wipe finished but the session has not been completed yet
    wipe_outcome: Option<OverwriteOutcome>,
    last_error: Option<String>,
    stalled: Option<Operation>,

    abandon: CancelFlag,
    progress: Arc<watch::Sender<ProgressUpdate>>,
}

impl WipeWorkflow {
    pub fn new(
        store: Arc<dyn RecordStore>,
        evaluator: Arc<HealthEvaluator>,
        executor: Arc<WipeExecutor>,
        issuer: Arc<CertificateIssuer>,
    ) -> Self {
        let (progress, _) = watch::channel(ProgressUpdate::default());
        Self {
            store,
            evaluator,
            executor,
            issuer,
            state: WorkflowState::Configuring,
            form: None,
            session: None,
            health_report: None,
            certificate: None,
            wipe_outcome: None,
            last_error: None,
            stalled: None,
            abandon: CancelFlag::new(),
            progress: Arc::new(progress),
        }
    }

    // ==================== ACCESSORS ====================

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn form(&self) -> Option<&SessionForm> {
        self.form.as_ref()
    }

    pub fn session(&self) -> Option<&WipeSession> {
        self.session.as_ref()
    }

    pub fn health_report(&self) -> Option<&HealthReport> {
        self.health_report.as_ref()
    }

    pub fn certificate(&self) -> Option<&Certificate> {
        self.certificate.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Operation that was abandoned for lack of progress, if any
    pub fn stalled(&self) -> Option<Operation> {
        self.stalled
    }

    /// Flag that abandons the workflow when cancelled. Safe to trigger from
    /// another task while a health check or wipe is running.
    pub fn cancel_handle(&self) -> CancelFlag {
        self.abandon.clone()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressUpdate> {
        self.progress.subscribe()
    }

    // ==================== TRANSITIONS ====================

    /// Validate the form and create (or, after [`back`](Self::back), update)
    /// the pending session record
    pub fn configure(&mut self, form: SessionForm) -> WorkflowResult<&WipeSession> {
        self.require_state("configure", &[WorkflowState::Configuring])?;

        let new_session = form.validate().map_err(|e| self.record_error(e))?;

        let existing_id = self.session.as_ref().map(|s| s.id.clone());
        let session = match existing_id {
            Some(existing_id) => self.store.update_session(
                &existing_id,
                SessionPatch {
                    session_name: Some(new_session.session_name),
                    wipe_type: Some(new_session.wipe_type),
                    target_path: Some(new_session.target_path),
                    platform: Some(new_session.platform),
                    organization: Some(new_session.organization),
                    ..Default::default()
                },
            ),
            None => self.store.create_session(new_session),
        }
        .map_err(|e| self.record_error(e.into()))?;

        tracing::info!(
            session_id = %session.id,
            state = %WorkflowState::AlgorithmSelection,
            "Session configured"
        );

        self.form = Some(form);
        self.last_error = None;
        self.state = WorkflowState::AlgorithmSelection;
        Ok(self.session.insert(session))
    }

    /// Return to the configuration step, keeping the form
    pub fn back(&mut self) -> WorkflowResult<()> {
        self.require_state("back", &[WorkflowState::AlgorithmSelection])?;
        self.state = WorkflowState::Configuring;
        Ok(())
    }

    pub fn select_algorithm(&mut self, method: &str) -> WorkflowResult<WipeMethod> {
        self.require_state("select_algorithm", &[WorkflowState::AlgorithmSelection])?;

        let raw = method.trim();
        if raw.is_empty() {
            return Err(self.record_error(WorkflowError::MissingField("wipe_method")));
        }
        let wipe_method: WipeMethod = raw.parse().map_err(|_| {
            self.record_error(WorkflowError::InvalidField {
                field: "wipe_method",
                value: raw.to_string(),
            })
        })?;

        let session_id = self.session_id()?;
        let session = self
            .store
            .update_session(
                &session_id,
                SessionPatch {
                    wipe_method: Some(wipe_method),
                    status: Some(SessionStatus::HealthCheck),
                    ..Default::default()
                },
            )
            .map_err(|e| self.record_error(e.into()))?;

        tracing::info!(session_id = %session.id, method = %wipe_method, "Algorithm selected");

        self.session = Some(session);
        self.last_error = None;
        self.state = WorkflowState::HealthChecking;
        Ok(wipe_method)
    }

    /// Run the health evaluator and apply the gate
    pub async fn run_health_check(&mut self) -> WorkflowResult<GateDecision> {
        self.require_state("run_health_check", &[WorkflowState::HealthChecking])?;

        let (session_id, platform) = match &self.session {
            Some(s) => (s.id.clone(), s.platform),
            None => return Err(self.record_error(WorkflowError::MissingField("session"))),
        };

        self.stalled = None;
        let tracker = ProgressTracker::start(Arc::clone(&self.progress), Operation::HealthCheck);
        let evaluator = Arc::clone(&self.evaluator);

        let result = evaluator
            .evaluate(&session_id, platform, &tracker, &self.abandon)
            .await;
        let report = match result {
            Ok(report) => report,
            Err(e) => return Err(self.handle_run_failure(&session_id, e)),
        };

        let decision = report.gate();
        let patch = SessionPatch {
            health_score: Some(report.health_score),
            health_details: Some(report.details()),
            status: (decision == GateDecision::Abort).then_some(SessionStatus::Aborted),
            ..Default::default()
        };
        let session = self
            .store
            .update_session(&session_id, patch)
            .map_err(|e| self.record_error(e.into()))?;

        self.session = Some(session);
        self.health_report = Some(report);
        self.last_error = None;
        self.state = match decision {
            GateDecision::Proceed => WorkflowState::ReadyToWipe,
            GateDecision::Abort => {
                tracing::warn!(
                    session_id = %session_id,
                    health_score = self.health_report.as_ref().map(|r| r.health_score),
                    "Health gate failed, aborting session"
                );
                WorkflowState::Aborted
            }
        };
        tracing::info!(session_id = %session_id, state = %self.state, "Health check applied");

        Ok(decision)
    }

    /// Wipe the target and issue its certificate.
    ///
    /// The certificate and the session's completion are written together, so
    /// a failure here leaves no certificate behind. Also accepted in
    /// [`WorkflowState::Wiping`] to retry after a failure. A retry does not
    /// repeat a wipe that already finished.
    pub async fn confirm_wipe(&mut self) -> WorkflowResult<Certificate> {
        self.require_state(
            "confirm_wipe",
            &[WorkflowState::ReadyToWipe, WorkflowState::Wiping],
        )?;

        let session = match &self.session {
            Some(s) => s.clone(),
            None => return Err(self.record_error(WorkflowError::MissingField("session"))),
        };
        let wipe_method = session
            .wipe_method
            .ok_or(WorkflowError::MissingField("wipe_method"))
            .map_err(|e| self.record_error(e))?;

        if self.state == WorkflowState::ReadyToWipe {
            let updated = self
                .store
                .update_session(&session.id, SessionPatch::status(SessionStatus::Wiping))
                .map_err(|e| self.record_error(e.into()))?;
            self.session = Some(updated);
            self.state = WorkflowState::Wiping;
            tracing::info!(session_id = %session.id, state = %self.state, "Wipe confirmed");
        }

        let outcome = match self.wipe_outcome {
            Some(outcome) => outcome,
            None => {
                self.stalled = None;
                let request = OverwriteRequest {
                    target_path: session.target_path.clone(),
                    wipe_type: session.wipe_type,
                    wipe_method,
                };
                let tracker = ProgressTracker::start(Arc::clone(&self.progress), Operation::Wipe);
                let executor = Arc::clone(&self.executor);

                let result = executor
                    .execute(&session.id, &request, &tracker, &self.abandon)
                    .await;
                match result {
                    Ok(outcome) => *self.wipe_outcome.insert(outcome),
                    Err(e) => return Err(self.handle_run_failure(&session.id, e)),
                }
            }
        };

        let completion = SessionPatch {
            size_gb: Some(outcome.size_gb),
            duration_minutes: Some(outcome.duration_minutes),
            ..Default::default()
        };
        let (completed, certificate) = self
            .issuer
            .issue(self.store.as_ref(), &session, completion)
            .map_err(|e| self.record_error(e))?;

        tracing::info!(
            session_id = %completed.id,
            certificate_id = %certificate.certificate_id,
            state = %WorkflowState::Completed,
            "Wipe session completed"
        );

        self.session = Some(completed);
        self.certificate = Some(certificate.clone());
        self.wipe_outcome = None;
        self.last_error = None;
        self.state = WorkflowState::Completed;
        Ok(certificate)
    }

    /// Abandon the session from any non-terminal state. Any running
    /// capability is told to stop.
    pub fn abandon(&mut self) -> WorkflowResult<()> {
        if self.state.is_terminal() {
            return Err(WorkflowError::InvalidTransition {
                operation: "abandon",
                state: self.state,
            });
        }

        self.abandon.cancel();
        if let Some(session_id) = self.session.as_ref().map(|s| s.id.clone()) {
            self.mark_aborted(&session_id);
        }
        tracing::info!(state = %WorkflowState::Aborted, "Workflow abandoned");
        self.state = WorkflowState::Aborted;
        Ok(())
    }

    /// Start over with a cleared form. The previous session record is kept.
    pub fn restart(&mut self) -> WorkflowResult<()> {
        self.require_state(
            "restart",
            &[WorkflowState::Aborted, WorkflowState::Completed],
        )?;

        self.form = None;
        self.session = None;
        self.health_report = None;
        self.certificate = None;
        self.wipe_outcome = None;
        self.last_error = None;
        self.stalled = None;
        self.abandon = CancelFlag::new();
        self.progress.send_modify(|p| {
            p.operation = None;
            p.percent = 0;
            p.beat = 0;
        });
        self.state = WorkflowState::Configuring;
        Ok(())
    }

    // ==================== HELPERS ====================

    fn require_state(
        &self,
        operation: &'static str,
        allowed: &[WorkflowState],
    ) -> WorkflowResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(WorkflowError::InvalidTransition {
                operation,
                state: self.state,
            })
        }
    }

    fn session_id(&mut self) -> WorkflowResult<String> {
        match &self.session {
            Some(s) => Ok(s.id.clone()),
            None => Err(self.record_error(WorkflowError::MissingField("session"))),
        }
    }

    fn record_error(&mut self, err: WorkflowError) -> WorkflowError {
        self.last_error = Some(err.to_string());
        err
    }

    /// Shared handling for a health check or wipe that did not finish
    fn handle_run_failure(&mut self, session_id: &str, err: WorkflowError) -> WorkflowError {
        match &err {
            WorkflowError::Cancelled(operation) => {
                tracing::warn!(session_id, %operation, "Operation cancelled, aborting session");
                self.mark_aborted(session_id);
                self.state = WorkflowState::Aborted;
            }
            WorkflowError::Stalled { operation, .. } => {
                tracing::warn!(session_id, %operation, state = %self.state, "Operation stalled");
                self.stalled = Some(*operation);
            }
            other => {
                tracing::error!(
                    session_id,
                    error = %other,
                    state = %self.state,
                    "Operation failed"
                );
            }
        }
        self.record_error(err)
    }

    fn mark_aborted(&mut self, session_id: &str) {
        match self
            .store
            .update_session(session_id, SessionPatch::status(SessionStatus::Aborted))
        {
            Ok(session) => self.session = Some(session),
            Err(e) => {
                tracing::error!(session_id, error = %e, "Failed to mark session aborted");
                self.last_error = Some(e.to_string());
            }
        }
    }
}

impl Drop for WipeWorkflow {
    fn drop(&mut self) {
        // Stop any capability still running on our behalf
        self.abandon.cancel();
    }
}
