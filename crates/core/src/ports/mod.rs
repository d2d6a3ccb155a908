//! Contracts for the collaborators the engine calls into: code delivery, file upload,
//! profile persistence and local key-value storage. Implementations live outside the
//! engine; [`memory`] carries deterministic fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::documents::slot::DocumentType;
use crate::documents::tracker::UploadedFile;
use crate::errors::ErrorClass;
use crate::otp::challenge::Channel;
use crate::session::UserProfile;

pub mod memory;

pub use memory::{
    InMemoryDocumentUploader, InMemoryKeyValueStore, InMemoryOtpTransport, InMemoryProfileGateway,
    SentCode,
};

pub const TOKEN_KEY: &str = "token";
pub const USER_KEY: &str = "user";

/// `{success, message?, data?}` wrapper every collaborator call returns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok() -> Self {
        Self { success: true, message: None, data: None }
    }

    pub fn ok_with(data: T) -> Self {
        Self { success: true, message: None, data: Some(data) }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self { success: false, message: Some(message.into()), data: None }
    }

    /// Splits the envelope into its payload or the server-provided rejection message.
    pub fn into_result(self) -> Result<Option<T>, String> {
        if self.success {
            Ok(self.data)
        } else {
            Err(self.message.unwrap_or_else(|| "request rejected".to_string()))
        }
    }
}

/// Failure reaching a collaborator. Timeouts and hard failures are handled the same way.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed: {0}")]
    Failed(String),
    #[error("transport timed out")]
    TimedOut,
}

impl TransportError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Transport
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("stored value under `{key}` could not be decoded: {reason}")]
    Decode { key: String, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub stored_document_id: String,
    pub document_type: DocumentType,
}

#[async_trait]
pub trait OtpTransport: Send + Sync {
    async fn send_code(
        &self,
        phone_number: &str,
        channel: Channel,
    ) -> Result<Envelope<()>, TransportError>;

    async fn verify_code(
        &self,
        phone_number: &str,
        code: &str,
        channel: Channel,
    ) -> Result<Envelope<()>, TransportError>;
}

#[async_trait]
pub trait DocumentUploader: Send + Sync {
    /// Uploads the file bytes, publishing percentages on `progress` as they advance.
    async fn upload_file(
        &self,
        file: &UploadedFile,
        document_type: &DocumentType,
        progress: mpsc::Sender<u8>,
    ) -> Result<Envelope<StoredDocument>, TransportError>;
}

#[async_trait]
pub trait ProfileGateway: Send + Sync {
    async fn get_current_user(&self) -> Result<Envelope<UserProfile>, TransportError>;
    async fn update_profile(
        &self,
        data: serde_json::Value,
    ) -> Result<Envelope<()>, TransportError>;
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}
