use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::{mpsc, Mutex, RwLock};

use super::{
    DocumentUploader, Envelope, KeyValueStore, OtpTransport, ProfileGateway, StorageError,
    StoredDocument, TransportError,
};
use crate::documents::slot::DocumentType;
use crate::documents::tracker::UploadedFile;
use crate::otp::challenge::Channel;
use crate::session::UserProfile;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentCode {
    pub phone_number: String,
    pub channel: Channel,
}

#[derive(Default)]
struct OtpTransportState {
    sent: Vec<SentCode>,
    verifications: Vec<String>,
    send_failures: VecDeque<TransportError>,
    verify_failures: VecDeque<TransportError>,
}

/// Accepts exactly one code for every challenge it delivers.
pub struct InMemoryOtpTransport {
    accepted_code: String,
    state: Mutex<OtpTransportState>,
}

impl InMemoryOtpTransport {
    pub fn new(accepted_code: impl Into<String>) -> Self {
        Self {
            accepted_code: accepted_code.into(),
            state: Mutex::new(OtpTransportState::default()),
        }
    }

    pub async fn fail_next_send(&self, error: TransportError) {
        self.state.lock().await.send_failures.push_back(error);
    }

    pub async fn fail_next_verify(&self, error: TransportError) {
        self.state.lock().await.verify_failures.push_back(error);
    }

    pub async fn sent_codes(&self) -> Vec<SentCode> {
        self.state.lock().await.sent.clone()
    }

    pub async fn verify_attempts(&self) -> usize {
        self.state.lock().await.verifications.len()
    }
}

#[async_trait::async_trait]
impl OtpTransport for InMemoryOtpTransport {
    async fn send_code(
        &self,
        phone_number: &str,
        channel: Channel,
    ) -> Result<Envelope<()>, TransportError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.send_failures.pop_front() {
            return Err(error);
        }
        state.sent.push(SentCode { phone_number: phone_number.to_string(), channel });
        Ok(Envelope::ok())
    }

    async fn verify_code(
        &self,
        _phone_number: &str,
        code: &str,
        _channel: Channel,
    ) -> Result<Envelope<()>, TransportError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.verify_failures.pop_front() {
            return Err(error);
        }
        state.verifications.push(code.to_string());
        if code == self.accepted_code {
            Ok(Envelope::ok())
        } else {
            Ok(Envelope::rejected("invalid verification code"))
        }
    }
}

/// Emits a fixed sequence of progress ticks per upload, failing files by name on request.
pub struct InMemoryDocumentUploader {
    ticks: Vec<u8>,
    failing_files: RwLock<HashSet<String>>,
    uploaded: Mutex<Vec<String>>,
}

impl InMemoryDocumentUploader {
    pub fn new(ticks: Vec<u8>) -> Self {
        Self { ticks, failing_files: RwLock::default(), uploaded: Mutex::default() }
    }

    pub async fn fail_file(&self, name: impl Into<String>) {
        self.failing_files.write().await.insert(name.into());
    }

    pub async fn uploaded_files(&self) -> Vec<String> {
        self.uploaded.lock().await.clone()
    }
}

impl Default for InMemoryDocumentUploader {
    fn default() -> Self {
        Self::new(vec![25, 50, 75, 100])
    }
}

#[async_trait::async_trait]
impl DocumentUploader for InMemoryDocumentUploader {
    async fn upload_file(
        &self,
        file: &UploadedFile,
        document_type: &DocumentType,
        progress: mpsc::Sender<u8>,
    ) -> Result<Envelope<StoredDocument>, TransportError> {
        let fails = self.failing_files.read().await.contains(&file.name);
        for tick in &self.ticks {
            if fails && *tick >= 50 {
                return Err(interrupted(&file.name));
            }
            if progress.send(*tick).await.is_err() {
                return Err(TransportError::Failed("progress receiver dropped".to_string()));
            }
        }
        if fails {
            return Err(interrupted(&file.name));
        }

        let mut uploaded = self.uploaded.lock().await;
        uploaded.push(file.name.clone());
        Ok(Envelope::ok_with(StoredDocument {
            stored_document_id: format!("doc-{}", uploaded.len()),
            document_type: document_type.clone(),
        }))
    }
}

fn interrupted(name: &str) -> TransportError {
    TransportError::Failed(format!("upload of `{name}` interrupted"))
}

#[derive(Default)]
struct ProfileState {
    profile: Option<UserProfile>,
    updates: Vec<serde_json::Value>,
    failures: VecDeque<TransportError>,
    rejections: VecDeque<String>,
}

/// Holds a single profile and merges `update_profile` payloads into it key by key.
#[derive(Default)]
pub struct InMemoryProfileGateway {
    state: Mutex<ProfileState>,
}

impl InMemoryProfileGateway {
    pub fn with_profile(profile: UserProfile) -> Self {
        let state = ProfileState { profile: Some(profile), ..ProfileState::default() };
        Self { state: Mutex::new(state) }
    }

    pub async fn fail_next(&self, error: TransportError) {
        self.state.lock().await.failures.push_back(error);
    }

    pub async fn reject_next(&self, message: impl Into<String>) {
        self.state.lock().await.rejections.push_back(message.into());
    }

    pub async fn updates(&self) -> Vec<serde_json::Value> {
        self.state.lock().await.updates.clone()
    }

    pub async fn profile(&self) -> Option<UserProfile> {
        self.state.lock().await.profile.clone()
    }
}

#[async_trait::async_trait]
impl ProfileGateway for InMemoryProfileGateway {
    async fn get_current_user(&self) -> Result<Envelope<UserProfile>, TransportError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        Ok(match &state.profile {
            Some(profile) => Envelope::ok_with(profile.clone()),
            None => Envelope::rejected("not authenticated"),
        })
    }

    async fn update_profile(
        &self,
        data: serde_json::Value,
    ) -> Result<Envelope<()>, TransportError> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if let Some(message) = state.rejections.pop_front() {
            return Ok(Envelope::rejected(message));
        }

        if let Some(profile) = state.profile.take() {
            match profile.merged_with(&data) {
                Ok(merged) => state.profile = Some(merged),
                Err(reason) => {
                    state.profile = Some(profile);
                    return Ok(Envelope::rejected(reason));
                }
            }
        }
        state.updates.push(data);
        Ok(Envelope::ok())
    }
}

#[derive(Default)]
pub struct InMemoryKeyValueStore {
    values: RwLock<HashMap<String, String>>,
}

#[async_trait::async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.write().await.remove(key);
        Ok(())
    }
}
