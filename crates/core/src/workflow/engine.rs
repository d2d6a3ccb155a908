use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::documents::slot::SlotId;
use crate::documents::tracker::DocumentRequirementTracker;
use crate::errors::ErrorClass;
use crate::workflow::steps::{
    StepDefinition, StepEvidence, StepKind, StepStatus, VerificationStep,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("step `{0}` is not part of this workflow")]
    UnknownStep(StepKind),
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),
}

impl WorkflowError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Programmer
    }
}

/// Completion facts gathered from the document tracker and the OTP manager.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSnapshot {
    pub phone_verified: bool,
    pub satisfied_slots: BTreeSet<SlotId>,
}

impl EvidenceSnapshot {
    pub fn collect(tracker: &DocumentRequirementTracker, phone_verified: bool) -> Self {
        Self { phone_verified, satisfied_slots: tracker.satisfied_slots() }
    }

    fn confirms(&self, evidence: &StepEvidence) -> bool {
        match evidence {
            StepEvidence::Manual => false,
            StepEvidence::PhoneVerified => self.phone_verified,
            StepEvidence::DocumentSlots(slots) => {
                !slots.is_empty() && slots.iter().all(|slot| self.satisfied_slots.contains(slot))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub kind: StepKind,
    pub title: String,
    pub status: StepStatus,
    pub clickable: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub steps: Vec<StepSnapshot>,
    pub current_step: Option<StepKind>,
    pub completed_count: usize,
    pub total_count: usize,
    pub progress_percent: f64,
}

/// Ordered verification steps and their completion state. Everything is derived from the
/// step list on each query; nothing is cached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowStateMachine {
    steps: Vec<VerificationStep>,
}

impl WorkflowStateMachine {
    pub fn initialize(definitions: Vec<StepDefinition>) -> Result<Self, WorkflowError> {
        if definitions.is_empty() {
            return Err(WorkflowError::InvalidDefinition("workflow has no steps".to_string()));
        }

        let mut seen = HashSet::new();
        for definition in &definitions {
            if !seen.insert(definition.kind) {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "step `{}` is declared twice",
                    definition.kind
                )));
            }
        }
        for definition in &definitions {
            let Some(requires) = &definition.requires else { continue };
            if let Some(missing) = requires.iter().find(|kind| !seen.contains(*kind)) {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "step `{}` depends on `{missing}` which is not declared",
                    definition.kind
                )));
            }
            if requires.contains(&definition.kind) {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "step `{}` depends on itself",
                    definition.kind
                )));
            }
        }

        let mut previous: Option<StepKind> = None;
        let steps = definitions
            .into_iter()
            .enumerate()
            .map(|(position, definition)| {
                let required_prior_steps = definition
                    .requires
                    .unwrap_or_else(|| previous.into_iter().collect::<BTreeSet<_>>());
                previous = Some(definition.kind);
                VerificationStep {
                    kind: definition.kind,
                    title: definition.title,
                    position,
                    required_prior_steps,
                    always_clickable: definition.always_clickable,
                    evidence: definition.evidence,
                    status: StepStatus::Pending,
                }
            })
            .collect();

        Ok(Self { steps })
    }

    pub fn standard_kyc() -> Result<Self, WorkflowError> {
        Self::initialize(StepDefinition::standard_kyc())
    }

    pub fn steps(&self) -> &[VerificationStep] {
        &self.steps
    }

    pub fn step(&self, kind: StepKind) -> Result<&VerificationStep, WorkflowError> {
        self.steps.iter().find(|step| step.kind == kind).ok_or(WorkflowError::UnknownStep(kind))
    }

    /// Marks `kind` completed. Returns `false` when it already was.
    pub fn mark_completed(&mut self, kind: StepKind) -> Result<bool, WorkflowError> {
        let step = self.step_mut(kind)?;
        if step.is_completed() {
            return Ok(false);
        }
        step.status = StepStatus::Completed;
        debug!(event_name = "kyc.workflow.step_completed", step = %kind);
        Ok(true)
    }

    pub fn is_clickable(&self, kind: StepKind) -> Result<bool, WorkflowError> {
        let step = self.step(kind)?;
        Ok(step.is_completed()
            || step.position == 0
            || step.always_clickable
            || step.required_prior_steps.iter().all(|prior| self.is_step_completed(*prior)))
    }

    /// Sets or clears the always-clickable flag of a step.
    pub fn set_override(
        &mut self,
        kind: StepKind,
        always_clickable: bool,
    ) -> Result<(), WorkflowError> {
        self.step_mut(kind)?.always_clickable = always_clickable;
        Ok(())
    }

    pub fn completed_count(&self) -> usize {
        self.steps.iter().filter(|step| step.is_completed()).count()
    }

    pub fn total_count(&self) -> usize {
        self.steps.len()
    }

    pub fn progress_percent(&self) -> f64 {
        let total = self.total_count();
        if total == 0 {
            return 0.0;
        }
        let percent = self.completed_count() as f64 / total as f64 * 100.0;
        percent.clamp(0.0, 100.0)
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(VerificationStep::is_completed)
    }

    pub fn next_incomplete_step(&self) -> Option<StepKind> {
        self.steps.iter().find(|step| !step.is_completed()).map(|step| step.kind)
    }

    pub fn current_step(&self) -> Option<StepKind> {
        self.next_incomplete_step()
    }

    pub fn completed_steps(&self) -> Vec<StepKind> {
        self.steps.iter().filter(|step| step.is_completed()).map(|step| step.kind).collect()
    }

    /// Steps whose evidence is confirmed by `evidence` but are not yet completed.
    pub fn confirmed_by(&self, evidence: &EvidenceSnapshot) -> Vec<StepKind> {
        self.steps
            .iter()
            .filter(|step| !step.is_completed() && evidence.confirms(&step.evidence))
            .map(|step| step.kind)
            .collect()
    }

    /// Completes every step whose evidence is confirmed and returns the newly completed ones.
    pub fn reconcile(&mut self, evidence: &EvidenceSnapshot) -> Vec<StepKind> {
        let confirmed = self.confirmed_by(evidence);
        for step in self.steps.iter_mut().filter(|step| confirmed.contains(&step.kind)) {
            step.status = StepStatus::Completed;
        }
        if !confirmed.is_empty() {
            debug!(
                event_name = "kyc.workflow.reconciled",
                completed = ?confirmed,
                progress_percent = self.progress_percent(),
            );
        }
        confirmed
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        let steps = self
            .steps
            .iter()
            .map(|step| StepSnapshot {
                kind: step.kind,
                title: step.title.clone(),
                status: step.status,
                clickable: self.is_clickable(step.kind).unwrap_or(false),
            })
            .collect();
        WorkflowSnapshot {
            steps,
            current_step: self.current_step(),
            completed_count: self.completed_count(),
            total_count: self.total_count(),
            progress_percent: self.progress_percent(),
        }
    }

    fn is_step_completed(&self, kind: StepKind) -> bool {
        self.steps.iter().any(|step| step.kind == kind && step.is_completed())
    }

    fn step_mut(&mut self, kind: StepKind) -> Result<&mut VerificationStep, WorkflowError> {
        self.steps
            .iter_mut()
            .find(|step| step.kind == kind)
            .ok_or(WorkflowError::UnknownStep(kind))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{EvidenceSnapshot, WorkflowError, WorkflowStateMachine};
    use crate::documents::slot::SlotId;
    use crate::errors::ErrorClass;
    use crate::workflow::steps::{StepDefinition, StepEvidence, StepKind, StepStatus};

    fn linear() -> WorkflowStateMachine {
        WorkflowStateMachine::initialize(vec![
            StepDefinition::new(StepKind::PersonalData, "Personal data"),
            StepDefinition::new(StepKind::PhoneVerification, "Phone"),
            StepDefinition::new(StepKind::Documents, "Documents"),
            StepDefinition::new(StepKind::Review, "Review"),
        ])
        .expect("valid definition")
    }

    #[test]
    fn initialized_steps_are_pending_in_declared_order() {
        let machine = WorkflowStateMachine::standard_kyc().expect("standard workflow");

        let kinds: Vec<_> = machine.steps().iter().map(|step| step.kind).collect();
        assert_eq!(kinds[0], StepKind::PersonalData);
        assert_eq!(kinds.last(), Some(&StepKind::Review));
        assert!(machine.steps().iter().all(|step| step.status == StepStatus::Pending));
        assert!(machine.steps().iter().enumerate().all(|(index, step)| step.position == index));
        assert_eq!(machine.current_step(), Some(StepKind::PersonalData));
    }

    #[test]
    fn default_dependency_is_the_preceding_step() {
        let machine = linear();

        let phone = machine.step(StepKind::PhoneVerification).expect("step");
        assert_eq!(phone.required_prior_steps, BTreeSet::from([StepKind::PersonalData]));
        let first = machine.step(StepKind::PersonalData).expect("step");
        assert!(first.required_prior_steps.is_empty());
    }

    #[test]
    fn clickability_follows_completed_dependencies() {
        let mut machine = linear();

        assert!(machine.is_clickable(StepKind::PersonalData).expect("first step"));
        assert!(!machine.is_clickable(StepKind::PhoneVerification).expect("known step"));

        machine.mark_completed(StepKind::PersonalData).expect("complete");
        assert!(machine.is_clickable(StepKind::PhoneVerification).expect("known step"));
        assert!(!machine.is_clickable(StepKind::Documents).expect("known step"));
    }

    #[test]
    fn override_flag_makes_step_clickable_and_can_be_toggled() {
        let mut machine = linear();
        assert!(!machine.is_clickable(StepKind::Documents).expect("known step"));

        machine.set_override(StepKind::Documents, true).expect("override");
        assert!(machine.is_clickable(StepKind::Documents).expect("known step"));

        machine.set_override(StepKind::Documents, false).expect("override");
        assert!(!machine.is_clickable(StepKind::Documents).expect("known step"));
    }

    #[test]
    fn completed_step_stays_clickable() {
        let mut machine = linear();
        machine.mark_completed(StepKind::Review).expect("complete out of order");

        assert!(machine.is_clickable(StepKind::Review).expect("known step"));
        assert_eq!(machine.mark_completed(StepKind::Review), Ok(false));
    }

    #[test]
    fn progress_stays_within_bounds_and_hits_100_only_when_done() {
        let mut machine = WorkflowStateMachine::standard_kyc().expect("standard workflow");
        assert_eq!(machine.progress_percent(), 0.0);

        let kinds: Vec<_> = machine.steps().iter().map(|step| step.kind).collect();
        for (index, kind) in kinds.iter().enumerate() {
            machine.mark_completed(*kind).expect("complete");
            let progress = machine.progress_percent();
            assert!((0.0..=100.0).contains(&progress));
            assert_eq!(progress == 100.0, index + 1 == kinds.len());
        }
        assert!(machine.is_complete());
        assert_eq!(machine.next_incomplete_step(), None);
    }

    #[test]
    fn unknown_step_is_rejected_as_programmer_error() {
        let mut machine = linear();

        let error = machine.mark_completed(StepKind::Selfie).expect_err("not declared");
        assert_eq!(error, WorkflowError::UnknownStep(StepKind::Selfie));
        assert_eq!(error.class(), ErrorClass::Programmer);
        assert!(machine.is_clickable(StepKind::Selfie).is_err());
    }

    #[test]
    fn invalid_definitions_are_rejected() {
        assert!(matches!(
            WorkflowStateMachine::initialize(Vec::new()),
            Err(WorkflowError::InvalidDefinition(_))
        ));
        assert!(matches!(
            WorkflowStateMachine::initialize(vec![
                StepDefinition::new(StepKind::Selfie, "Selfie"),
                StepDefinition::new(StepKind::Selfie, "Selfie again"),
            ]),
            Err(WorkflowError::InvalidDefinition(_))
        ));
        assert!(matches!(
            WorkflowStateMachine::initialize(vec![
                StepDefinition::new(StepKind::Review, "Review").requires([StepKind::Selfie])
            ]),
            Err(WorkflowError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn reconcile_completes_steps_with_confirmed_evidence() {
        let mut machine = WorkflowStateMachine::standard_kyc().expect("standard workflow");
        let evidence = EvidenceSnapshot {
            phone_verified: true,
            satisfied_slots: BTreeSet::from([SlotId::new("identity_document")]),
        };

        let completed = machine.reconcile(&evidence);

        assert_eq!(completed, vec![StepKind::PhoneVerification, StepKind::IdentityDocument]);
        assert!(machine.reconcile(&evidence).is_empty());
        assert_eq!(machine.current_step(), Some(StepKind::PersonalData));
    }

    #[test]
    fn manual_and_empty_evidence_never_reconcile() {
        let mut machine = WorkflowStateMachine::initialize(vec![
            StepDefinition::new(StepKind::PersonalData, "Personal data"),
            StepDefinition::new(StepKind::Documents, "Documents")
                .with_evidence(StepEvidence::DocumentSlots(Vec::new())),
        ])
        .expect("valid definition");

        let evidence = EvidenceSnapshot { phone_verified: true, satisfied_slots: BTreeSet::new() };
        assert!(machine.reconcile(&evidence).is_empty());
    }

    #[test]
    fn snapshot_reports_clickability_per_step() {
        let mut machine = WorkflowStateMachine::standard_kyc().expect("standard workflow");
        machine.mark_completed(StepKind::PersonalData).expect("complete");

        let snapshot = machine.snapshot();
        let clickable: Vec<_> =
            snapshot.steps.iter().filter(|step| step.clickable).map(|step| step.kind).collect();

        assert_eq!(
            clickable,
            vec![StepKind::PersonalData, StepKind::PhoneVerification, StepKind::Documents]
        );
        assert_eq!(snapshot.completed_count, 1);
        assert_eq!(snapshot.current_step, Some(StepKind::PhoneVerification));
    }
}
