pub mod slot;
pub mod tracker;
pub mod upload;

pub use slot::{configured_kyc_slots, standard_kyc_slots, DocumentType, SlotDefinition, SlotId};
pub use tracker::{
    DocumentError, DocumentRequirementTracker, FileId, FileSelection, NamedFileStatus,
    RequiredProgress, SlotStatus, UploadStatus, UploadedFile,
};
pub use upload::{UploadEvent, UploadHandle, UploadTask};
