use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DocumentsConfig;

pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 4] = ["pdf", "jpg", "jpeg", "png"];

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub String);

impl SlotId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentType(pub String);

impl DocumentType {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

/// A document requirement. Ordinary slots need one completed file; slots with
/// `named_files` need one completed file in every named position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDefinition {
    pub id: SlotId,
    pub document_type: DocumentType,
    pub label: String,
    pub required: bool,
    pub max_file_size_bytes: u64,
    pub allowed_extensions: BTreeSet<String>,
    pub named_files: Vec<String>,
}

impl SlotDefinition {
    pub fn single(
        id: impl Into<String>,
        document_type: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            id: SlotId::new(id),
            document_type: DocumentType::new(document_type),
            label: label.into(),
            required: true,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            named_files: Vec::new(),
        }
    }

    /// Repeated names collapse into one position.
    pub fn named<I, S>(
        id: impl Into<String>,
        document_type: impl Into<String>,
        label: impl Into<String>,
        names: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut named_files: Vec<String> = Vec::new();
        for name in names.into_iter().map(Into::into) {
            if !named_files.contains(&name) {
                named_files.push(name);
            }
        }
        Self { named_files, ..Self::single(id, document_type, label) }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size_bytes = bytes;
        self
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions =
            extensions.into_iter().map(|ext| normalize_extension(ext.as_ref())).collect();
        self
    }

    /// Applies the configured defaults for size and formats.
    pub fn with_defaults(self, config: &DocumentsConfig) -> Self {
        self.with_max_file_size(config.default_max_file_size_bytes)
            .with_extensions(&config.default_allowed_extensions)
    }

    /// Three consecutive monthly statements, uploaded as `file1`..`file3`.
    pub fn bank_statements() -> Self {
        Self::named(
            "bank_statements",
            "bank_statement",
            "Bank statements (last 3 months)",
            ["file1", "file2", "file3"],
        )
        .with_extensions(["pdf"])
    }

    pub fn required_count(&self) -> usize {
        self.named_files.len().max(1)
    }

    pub fn is_multi_file(&self) -> bool {
        !self.named_files.is_empty()
    }

    pub fn has_named_file(&self, name: &str) -> bool {
        self.named_files.iter().any(|named| named == name)
    }

    /// First named position that appears more than once.
    pub fn repeated_named_file(&self) -> Option<&str> {
        self.named_files
            .iter()
            .enumerate()
            .find(|(index, name)| self.named_files[..*index].contains(name))
            .map(|(_, name)| name.as_str())
    }

    pub fn accepts_extension(&self, extension: &str) -> bool {
        self.allowed_extensions.contains(&normalize_extension(extension))
    }
}

/// Slots backing the standard business verification: identity, selfie, company papers
/// and bank statements.
pub fn standard_kyc_slots() -> Vec<SlotDefinition> {
    vec![
        SlotDefinition::single("identity_document", "identity_document", "Identity document"),
        SlotDefinition::single("selfie", "selfie", "Selfie holding the document")
            .with_extensions(["jpg", "jpeg", "png"]),
        SlotDefinition::single(
            "company_registration",
            "company_registration",
            "Company registration certificate",
        ),
        SlotDefinition::single("proof_of_address", "proof_of_address", "Proof of address"),
        SlotDefinition::bank_statements(),
        SlotDefinition::single("annual_revenue", "revenue_statement", "Annual revenue statement")
            .optional(),
    ]
}

/// The standard slots with configured limits. Slots that keep the stock format list take
/// the configured formats; slots with their own list only take the size limit.
pub fn configured_kyc_slots(config: &DocumentsConfig) -> Vec<SlotDefinition> {
    let stock: BTreeSet<String> =
        DEFAULT_ALLOWED_EXTENSIONS.iter().map(|ext| ext.to_string()).collect();
    standard_kyc_slots()
        .into_iter()
        .map(|slot| {
            if slot.allowed_extensions == stock {
                slot.with_defaults(config)
            } else {
                slot.with_max_file_size(config.default_max_file_size_bytes)
            }
        })
        .collect()
}

/// Lowercased suffix after the last `.` of a file name.
pub fn extension_of(file_name: &str) -> Option<String> {
    let (_, extension) = file_name.rsplit_once('.')?;
    let extension = extension.trim();
    if extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}
