use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::form::FormError;
use crate::documents::tracker::DocumentError;
use crate::eligibility::EligibilityError;
use crate::otp::manager::OtpError;
use crate::ports::{StorageError, TransportError};
use crate::session::SessionError;
use crate::workflow::engine::WorkflowError;
use crate::workflow::sync::SyncError;

/// How a rejected operation must be handled by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bad local input; shown inline next to the offending field.
    Validation,
    /// Resend-too-soon or a rejected code; the user is re-prompted.
    Challenge,
    /// A collaborator failed or timed out; state is unchanged and the call may be retried.
    Transport,
    /// A caller bug such as an unknown step. The current operation aborts.
    Programmer,
}

impl ErrorClass {
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Self::Programmer)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Challenge => "challenge",
            Self::Transport => "transport",
            Self::Programmer => "programmer",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Otp(#[from] OtpError),
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    Eligibility(#[from] EligibilityError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Workflow(error) => error.class(),
            Self::Document(error) => error.class(),
            Self::Otp(error) => error.class(),
            Self::Form(error) => error.class(),
            Self::Eligibility(error) => error.class(),
            Self::Sync(error) => error.class(),
            Self::Session(error) => error.class(),
            Self::Transport(error) => error.class(),
            Self::Storage(_) => ErrorClass::Transport,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.class().is_recoverable()
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let message = self.to_string();
        match self.class() {
            ErrorClass::Validation | ErrorClass::Challenge => {
                InterfaceError::Inline { message, correlation_id }
            }
            ErrorClass::Transport => InterfaceError::Retryable { message, correlation_id },
            ErrorClass::Programmer => InterfaceError::Internal { message, correlation_id },
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("inline error: {message}")]
    Inline { message: String, correlation_id: String },
    #[error("retryable error: {message}")]
    Retryable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Inline { .. } => "Please review the highlighted information and try again.",
            Self::Retryable { .. } => "We could not reach the service. Please try again.",
            Self::Internal { .. } => "An unexpected error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Inline { correlation_id, .. }
            | Self::Retryable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}
