use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::documents::slot::{extension_of, DocumentType, SlotDefinition, SlotId};
use crate::documents::upload::UploadEvent;
use crate::errors::ErrorClass;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub String);

impl FileId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// What the user picked on the device, before any validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSelection {
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

impl FileSelection {
    pub fn new(name: impl Into<String>, size_bytes: u64, mime_type: impl Into<String>) -> Self {
        Self { name: name.into(), size_bytes, mime_type: mime_type.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: FileId,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub slot_id: SlotId,
    pub document_type: DocumentType,
    pub named_slot: Option<String>,
    pub status: UploadStatus,
    pub upload_progress_percent: u8,
    pub failure_reason: Option<String>,
    pub stored_document_id: Option<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("unknown document slot `{0}`")]
    UnknownSlot(SlotId),
    #[error("document slot `{0}` is already registered")]
    DuplicateSlot(SlotId),
    #[error("file format `{extension}` is not accepted for this document (allowed: {allowed:?})")]
    UnsupportedFormat { extension: String, allowed: Vec<String> },
    #[error("file is {size_bytes} bytes, above the {max_bytes} byte limit")]
    FileTooLarge { size_bytes: u64, max_bytes: u64 },
    #[error("slot `{slot_id}` needs to know which file this is ({expected:?})")]
    NamedFileRequired { slot_id: SlotId, expected: Vec<String> },
    #[error("slot `{slot_id}` declares the file position `{name}` more than once")]
    RepeatedNamedFile { slot_id: SlotId, name: String },
    #[error("slot `{slot_id}` has no file position named `{name}`")]
    UnknownNamedFile { slot_id: SlotId, name: String },
    #[error("unknown file `{0}`")]
    UnknownFile(FileId),
    #[error("file `{0}` already finished uploading and can only be removed")]
    FileAlreadyFinalized(FileId),
    #[error("file `{0}` is not being uploaded")]
    UploadNotInProgress(FileId),
    #[error("upload progress must be within 0..=100, got {0}")]
    InvalidProgress(u8),
}

impl DocumentError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UnsupportedFormat { .. }
            | Self::FileTooLarge { .. }
            | Self::NamedFileRequired { .. }
            | Self::UnknownNamedFile { .. } => ErrorClass::Validation,
            Self::UnknownSlot(_)
            | Self::DuplicateSlot(_)
            | Self::RepeatedNamedFile { .. }
            | Self::UnknownFile(_)
            | Self::FileAlreadyFinalized(_)
            | Self::UploadNotInProgress(_)
            | Self::InvalidProgress(_) => ErrorClass::Programmer,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredProgress {
    pub satisfied_count: usize,
    pub total_required: usize,
}

impl RequiredProgress {
    pub fn is_complete(&self) -> bool {
        self.satisfied_count == self.total_required
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedFileStatus {
    pub name: String,
    pub status: Option<UploadStatus>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStatus {
    pub slot_id: SlotId,
    pub label: String,
    pub required: bool,
    pub satisfied: bool,
    pub required_count: usize,
    pub completed_count: usize,
    pub named_files: Vec<NamedFileStatus>,
}

/// Tracks staged and uploaded files per document slot. The upload transport drives
/// progress through the `advance`/`mark` hooks; the tracker never performs I/O.
#[derive(Clone, Debug, Default)]
pub struct DocumentRequirementTracker {
    slots: Vec<SlotDefinition>,
    files: Vec<UploadedFile>,
}

impl DocumentRequirementTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slots<I>(slots: I) -> Result<Self, DocumentError>
    where
        I: IntoIterator<Item = SlotDefinition>,
    {
        let mut tracker = Self::new();
        for slot in slots {
            tracker.register_slot(slot)?;
        }
        Ok(tracker)
    }

    pub fn register_slot(&mut self, definition: SlotDefinition) -> Result<(), DocumentError> {
        if self.slot(&definition.id).is_some() {
            return Err(DocumentError::DuplicateSlot(definition.id));
        }
        if let Some(name) = definition.repeated_named_file() {
            return Err(DocumentError::RepeatedNamedFile {
                slot_id: definition.id.clone(),
                name: name.to_string(),
            });
        }
        self.slots.push(definition);
        Ok(())
    }

    pub fn slot(&self, slot_id: &SlotId) -> Option<&SlotDefinition> {
        self.slots.iter().find(|slot| &slot.id == slot_id)
    }

    pub fn slots(&self) -> &[SlotDefinition] {
        &self.slots
    }

    pub fn file(&self, file_id: &FileId) -> Option<&UploadedFile> {
        self.files.iter().find(|file| &file.id == file_id)
    }

    pub fn files_for_slot(&self, slot_id: &SlotId) -> Vec<&UploadedFile> {
        self.files.iter().filter(|file| &file.slot_id == slot_id).collect()
    }

    /// Checks format and size against the slot, then stages the file as `Pending`.
    /// A file staged into an occupied named position replaces the previous one.
    pub fn validate_and_stage(
        &mut self,
        selection: FileSelection,
        slot_id: &SlotId,
        named_slot: Option<&str>,
    ) -> Result<UploadedFile, DocumentError> {
        let slot = self.slot(slot_id).ok_or_else(|| DocumentError::UnknownSlot(slot_id.clone()))?;

        let extension = extension_of(&selection.name).unwrap_or_default();
        if !slot.accepts_extension(&extension) {
            return Err(DocumentError::UnsupportedFormat {
                extension,
                allowed: slot.allowed_extensions.iter().cloned().collect(),
            });
        }

        if selection.size_bytes > slot.max_file_size_bytes {
            return Err(DocumentError::FileTooLarge {
                size_bytes: selection.size_bytes,
                max_bytes: slot.max_file_size_bytes,
            });
        }

        let named_slot = match (slot.is_multi_file(), named_slot) {
            (true, None) => {
                return Err(DocumentError::NamedFileRequired {
                    slot_id: slot_id.clone(),
                    expected: slot.named_files.clone(),
                });
            }
            (true, Some(name)) if !slot.has_named_file(name) => {
                return Err(DocumentError::UnknownNamedFile {
                    slot_id: slot_id.clone(),
                    name: name.to_string(),
                });
            }
            (false, Some(name)) => {
                return Err(DocumentError::UnknownNamedFile {
                    slot_id: slot_id.clone(),
                    name: name.to_string(),
                });
            }
            (true, Some(name)) => Some(name.to_string()),
            (false, None) => None,
        };

        let file = UploadedFile {
            id: FileId::generate(),
            name: selection.name,
            size_bytes: selection.size_bytes,
            mime_type: selection.mime_type,
            slot_id: slot_id.clone(),
            document_type: slot.document_type.clone(),
            named_slot,
            status: UploadStatus::Pending,
            upload_progress_percent: 0,
            failure_reason: None,
            stored_document_id: None,
        };

        if let Some(name) = &file.named_slot {
            let before = self.files.len();
            self.files.retain(|existing| {
                !(existing.slot_id == file.slot_id && existing.named_slot.as_ref() == Some(name))
            });
            if self.files.len() != before {
                debug!(
                    event_name = "kyc.documents.named_file_replaced",
                    slot_id = %file.slot_id,
                    named_slot = %name,
                    "previous file in named position replaced"
                );
            }
        }

        debug!(
            event_name = "kyc.documents.file_staged",
            slot_id = %file.slot_id,
            file_id = %file.id,
            size_bytes = file.size_bytes,
            "file staged for upload"
        );
        self.files.push(file.clone());
        Ok(file)
    }

    pub fn advance_upload_progress(
        &mut self,
        file_id: &FileId,
        percent: u8,
    ) -> Result<(), DocumentError> {
        if percent > 100 {
            return Err(DocumentError::InvalidProgress(percent));
        }

        let file = self.file_mut(file_id)?;
        match file.status {
            UploadStatus::Completed => {
                return Err(DocumentError::FileAlreadyFinalized(file_id.clone()))
            }
            UploadStatus::Failed => {
                file.failure_reason = None;
                file.upload_progress_percent = percent;
            }
            UploadStatus::Pending | UploadStatus::Uploading => {
                file.upload_progress_percent = file.upload_progress_percent.max(percent);
            }
        }
        file.status = UploadStatus::Uploading;
        Ok(())
    }

    /// Completing an already completed file is a no-op. Files that failed or were
    /// cancelled cannot be completed by a late transport response.
    pub fn mark_upload_complete(&mut self, file_id: &FileId) -> Result<(), DocumentError> {
        let file = self.file_mut(file_id)?;
        match file.status {
            UploadStatus::Completed => Ok(()),
            UploadStatus::Failed => Err(DocumentError::UploadNotInProgress(file_id.clone())),
            UploadStatus::Pending | UploadStatus::Uploading => {
                file.status = UploadStatus::Completed;
                file.upload_progress_percent = 100;
                file.failure_reason = None;
                info!(
                    event_name = "kyc.documents.upload_completed",
                    slot_id = %file.slot_id,
                    file_id = %file.id,
                    "document upload completed"
                );
                Ok(())
            }
        }
    }

    pub fn mark_upload_failed(
        &mut self,
        file_id: &FileId,
        reason: impl Into<String>,
    ) -> Result<(), DocumentError> {
        let reason = reason.into();
        let file = self.file_mut(file_id)?;
        if file.status == UploadStatus::Completed {
            return Err(DocumentError::FileAlreadyFinalized(file_id.clone()));
        }

        warn!(
            event_name = "kyc.documents.upload_failed",
            slot_id = %file.slot_id,
            file_id = %file.id,
            reason = %reason,
            "document upload failed"
        );
        file.status = UploadStatus::Failed;
        file.failure_reason = Some(reason);
        Ok(())
    }

    /// Stops tracking an in-flight upload. Idempotent: completed or already failed
    /// files are left untouched.
    pub fn cancel_upload(&mut self, file_id: &FileId) -> Result<(), DocumentError> {
        let file = self.file_mut(file_id)?;
        if !file.status.is_terminal() {
            file.status = UploadStatus::Failed;
            file.failure_reason = Some("cancelled".to_string());
        }
        Ok(())
    }

    pub fn apply_upload_event(
        &mut self,
        file_id: &FileId,
        event: UploadEvent,
    ) -> Result<(), DocumentError> {
        match event {
            UploadEvent::Progress(percent) => self.advance_upload_progress(file_id, percent),
            UploadEvent::Completed(stored) => {
                self.mark_upload_complete(file_id)?;
                let file = self.file_mut(file_id)?;
                file.stored_document_id = Some(stored.stored_document_id);
                Ok(())
            }
            UploadEvent::Failed(reason) => self.mark_upload_failed(file_id, reason),
        }
    }

    pub fn remove_file(&mut self, file_id: &FileId) -> Result<UploadedFile, DocumentError> {
        let index = self
            .files
            .iter()
            .position(|file| &file.id == file_id)
            .ok_or_else(|| DocumentError::UnknownFile(file_id.clone()))?;
        let removed = self.files.remove(index);
        debug!(
            event_name = "kyc.documents.file_removed",
            slot_id = %removed.slot_id,
            file_id = %removed.id,
            slot_satisfied = self.is_slot_satisfied(&removed.slot_id),
            "file removed from slot"
        );
        Ok(removed)
    }

    pub fn is_slot_satisfied(&self, slot_id: &SlotId) -> bool {
        let Some(slot) = self.slot(slot_id) else {
            return false;
        };

        if slot.is_multi_file() {
            slot.named_files.iter().all(|name| self.completed_named(slot_id, name))
        } else {
            self.files.iter().any(|file| {
                &file.slot_id == slot_id
                    && file.document_type == slot.document_type
                    && file.status == UploadStatus::Completed
            })
        }
    }

    pub fn slot_status(&self, slot_id: &SlotId) -> Option<SlotStatus> {
        let slot = self.slot(slot_id)?;
        let files = self.files_for_slot(slot_id);
        let named_files = slot
            .named_files
            .iter()
            .map(|name| NamedFileStatus {
                name: name.clone(),
                status: files
                    .iter()
                    .find(|file| file.named_slot.as_deref() == Some(name.as_str()))
                    .map(|file| file.status),
            })
            .collect();

        Some(SlotStatus {
            slot_id: slot.id.clone(),
            label: slot.label.clone(),
            required: slot.required,
            satisfied: self.is_slot_satisfied(slot_id),
            required_count: slot.required_count(),
            completed_count: files
                .iter()
                .filter(|file| file.status == UploadStatus::Completed)
                .count(),
            named_files,
        })
    }

    pub fn required_progress(&self) -> RequiredProgress {
        let required = self.slots.iter().filter(|slot| slot.required);
        let (satisfied_count, total_required) =
            required.fold((0, 0), |(satisfied, total), slot| {
                (satisfied + usize::from(self.is_slot_satisfied(&slot.id)), total + 1)
            });
        RequiredProgress { satisfied_count, total_required }
    }

    pub fn satisfied_slots(&self) -> BTreeSet<SlotId> {
        self.slots
            .iter()
            .filter(|slot| self.is_slot_satisfied(&slot.id))
            .map(|slot| slot.id.clone())
            .collect()
    }

    fn completed_named(&self, slot_id: &SlotId, name: &str) -> bool {
        self.files.iter().any(|file| {
            &file.slot_id == slot_id
                && file.named_slot.as_deref() == Some(name)
                && file.status == UploadStatus::Completed
        })
    }

    fn file_mut(&mut self, file_id: &FileId) -> Result<&mut UploadedFile, DocumentError> {
        self.files
            .iter_mut()
            .find(|file| &file.id == file_id)
            .ok_or_else(|| DocumentError::UnknownFile(file_id.clone()))
    }
}
