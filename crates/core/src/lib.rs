//! Verification and credit-application workflow engine.
//!
//! The engine sequences KYC steps, tracks document requirements, runs one-time-code
//! challenges and computes loan eligibility. Everything outside it (HTTP, storage,
//! rendering) is reached through the traits in [`ports`].

pub mod application;
pub mod audit;
pub mod clock;
pub mod config;
pub mod documents;
pub mod eligibility;
pub mod errors;
pub mod otp;
pub mod ports;
pub mod session;
pub mod workflow;

pub use application::{ApplicationFormController, CreditApplication, FormError};
pub use audit::{
    AuditAction, AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink,
    InMemoryAuditSink, NoopAuditSink,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError, LoadOptions};
pub use documents::{
    DocumentError, DocumentRequirementTracker, SlotDefinition, SlotId, UploadHandle, UploadTask,
};
pub use eligibility::{EligibilityCalculator, EligibilityError, EligibilityInput, EligibilityResult};
pub use errors::{EngineError, ErrorClass, InterfaceError};
pub use otp::{Channel, OtpChallenge, OtpChallengeManager, OtpError, OtpSettings, OtpStatus};
pub use session::{SessionStore, UserProfile};
pub use workflow::{
    EvidenceSnapshot, ProgressRecorder, StepDefinition, StepKind, WorkflowError,
    WorkflowStateMachine,
};
