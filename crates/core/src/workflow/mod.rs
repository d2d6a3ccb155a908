pub mod engine;
pub mod steps;
pub mod sync;

pub use engine::{
    EvidenceSnapshot, StepSnapshot, WorkflowError, WorkflowSnapshot, WorkflowStateMachine,
};
pub use steps::{StepDefinition, StepEvidence, StepKind, StepStatus, VerificationStep};
pub use sync::{ProgressRecorder, SyncError};
