//! Server-side persistence of step completion.
//!
//! The profile is updated first and the local machine only changes once the server has
//! accepted the new facts, so a failed call never leaves the two out of step.

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use crate::errors::ErrorClass;
use crate::ports::{ProfileGateway, TransportError};
use crate::workflow::engine::{EvidenceSnapshot, WorkflowError, WorkflowStateMachine};
use crate::workflow::steps::StepKind;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("profile update rejected: {0}")]
    Rejected(String),
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Workflow(error) => error.class(),
            Self::Transport(_) | Self::Rejected(_) => ErrorClass::Transport,
        }
    }
}

pub struct ProgressRecorder {
    gateway: Arc<dyn ProfileGateway>,
    audit_sink: Arc<dyn AuditSink>,
    audit_context: AuditContext,
}

impl ProgressRecorder {
    pub fn new(gateway: Arc<dyn ProfileGateway>) -> Self {
        Self {
            gateway,
            audit_sink: Arc::new(NoopAuditSink),
            audit_context: AuditContext::anonymous("workflow", "progress-recorder"),
        }
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>, context: AuditContext) -> Self {
        self.audit_sink = sink;
        self.audit_context = context;
        self
    }

    /// Persists and then applies completion of a single step. Returns `false` without a
    /// server call when the step was already completed.
    pub async fn complete_step(
        &self,
        machine: &mut WorkflowStateMachine,
        kind: StepKind,
    ) -> Result<bool, SyncError> {
        if machine.step(kind)?.is_completed() {
            return Ok(false);
        }

        let mut completed = machine.completed_steps();
        completed.push(kind);
        self.persist(json!({ "completed_steps": completed }), &[kind]).await?;

        machine.mark_completed(kind)?;
        Ok(true)
    }

    /// Persists every step `evidence` newly confirms, then reconciles the machine.
    pub async fn reconcile(
        &self,
        machine: &mut WorkflowStateMachine,
        evidence: &EvidenceSnapshot,
    ) -> Result<Vec<StepKind>, SyncError> {
        let confirmed = machine.confirmed_by(evidence);
        if confirmed.is_empty() {
            return Ok(confirmed);
        }

        let mut completed = machine.completed_steps();
        completed.extend(confirmed.iter().copied());
        let mut payload = json!({ "completed_steps": completed });
        if evidence.phone_verified {
            payload["phone_verified"] = Value::Bool(true);
        }
        self.persist(payload, &confirmed).await?;

        Ok(machine.reconcile(evidence))
    }

    async fn persist(&self, payload: Value, steps: &[StepKind]) -> Result<(), SyncError> {
        let rendered = steps.iter().map(|kind| kind.as_str()).collect::<Vec<_>>().join(",");

        let result = match self.gateway.update_profile(payload).await {
            Ok(envelope) => envelope.into_result().map(|_| ()).map_err(SyncError::Rejected),
            Err(error) => Err(SyncError::Transport(error)),
        };

        match &result {
            Ok(()) => {
                info!(
                    event_name = "kyc.workflow.progress_persisted",
                    correlation_id = %self.audit_context.correlation_id,
                    steps = %rendered,
                    "step completion persisted"
                );
                self.audit_sink.emit(AuditEvent::steps_completed(
                    &self.audit_context,
                    steps,
                    AuditOutcome::Success,
                ));
            }
            Err(error) => {
                warn!(
                    event_name = "kyc.workflow.progress_persist_failed",
                    correlation_id = %self.audit_context.correlation_id,
                    steps = %rendered,
                    error = %error,
                    "step completion was not persisted"
                );
                let outcome = match error {
                    SyncError::Rejected(_) => AuditOutcome::Rejected,
                    _ => AuditOutcome::Failed,
                };
                self.audit_sink.emit(
                    AuditEvent::steps_completed(&self.audit_context, steps, outcome)
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}
