use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::documents::slot::SlotId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    PersonalData,
    PhoneVerification,
    IdentityDocument,
    Selfie,
    Documents,
    Review,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PersonalData => "personal_data",
            Self::PhoneVerification => "phone_verification",
            Self::IdentityDocument => "identity_document",
            Self::Selfie => "selfie",
            Self::Documents => "documents",
            Self::Review => "review",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Completed,
}

/// What confirms that a step is done.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepEvidence {
    /// Completed only by an explicit `mark_completed`.
    Manual,
    PhoneVerified,
    /// Every listed slot must be satisfied.
    DocumentSlots(Vec<SlotId>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub kind: StepKind,
    pub title: String,
    /// Steps that must be completed first. `None` means the immediately preceding step.
    pub requires: Option<BTreeSet<StepKind>>,
    pub always_clickable: bool,
    pub evidence: StepEvidence,
}

impl StepDefinition {
    pub fn new(kind: StepKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            requires: None,
            always_clickable: false,
            evidence: StepEvidence::Manual,
        }
    }

    pub fn requires<I>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = StepKind>,
    {
        self.requires = Some(steps.into_iter().collect());
        self
    }

    pub fn always_clickable(mut self) -> Self {
        self.always_clickable = true;
        self
    }

    pub fn with_evidence(mut self, evidence: StepEvidence) -> Self {
        self.evidence = evidence;
        self
    }

    /// The business verification sequence. The documents step can be opened at any time
    /// so statements may be gathered while earlier steps are still pending.
    pub fn standard_kyc() -> Vec<Self> {
        vec![
            Self::new(StepKind::PersonalData, "Personal data"),
            Self::new(StepKind::PhoneVerification, "Phone verification")
                .with_evidence(StepEvidence::PhoneVerified),
            Self::new(StepKind::IdentityDocument, "Identity document")
                .with_evidence(StepEvidence::DocumentSlots(vec![SlotId::new("identity_document")])),
            Self::new(StepKind::Selfie, "Selfie")
                .with_evidence(StepEvidence::DocumentSlots(vec![SlotId::new("selfie")])),
            Self::new(StepKind::Documents, "Company documents")
                .always_clickable()
                .with_evidence(StepEvidence::DocumentSlots(vec![
                    SlotId::new("company_registration"),
                    SlotId::new("proof_of_address"),
                    SlotId::new("bank_statements"),
                ])),
            Self::new(StepKind::Review, "Review").requires([
                StepKind::PersonalData,
                StepKind::PhoneVerification,
                StepKind::IdentityDocument,
                StepKind::Selfie,
                StepKind::Documents,
            ]),
        ]
    }
}

/// A step as tracked during a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationStep {
    pub kind: StepKind,
    pub title: String,
    pub position: usize,
    pub required_prior_steps: BTreeSet<StepKind>,
    pub always_clickable: bool,
    pub evidence: StepEvidence,
    pub status: StepStatus,
}

impl VerificationStep {
    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::{StepDefinition, StepEvidence, StepKind};

    #[test]
    fn standard_sequence_keeps_documents_always_clickable() {
        let steps = StepDefinition::standard_kyc();

        let clickable: Vec<_> =
            steps.iter().filter(|step| step.always_clickable).map(|step| step.kind).collect();
        assert_eq!(clickable, vec![StepKind::Documents]);
        assert_eq!(steps.first().map(|step| step.kind), Some(StepKind::PersonalData));
        assert_eq!(steps[1].evidence, StepEvidence::PhoneVerified);
    }

    #[test]
    fn step_kinds_render_as_snake_case() {
        assert_eq!(StepKind::PhoneVerification.to_string(), "phone_verification");
        assert_eq!(
            serde_json::to_string(&StepKind::IdentityDocument).expect("serialize"),
            "\"identity_document\""
        );
    }
}
