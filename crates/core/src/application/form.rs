use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::audit::{AuditContext, AuditEvent, AuditSink, NoopAuditSink};
use crate::errors::ErrorClass;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Boolean,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Text(_) => FieldKind::Text,
            Self::Bool(_) => FieldKind::Boolean,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::Bool(_) => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Text(value) => Value::String(value.clone()),
            Self::Bool(value) => Value::Bool(*value),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    /// Name of the field this one must repeat. Such fields are validated but never submitted.
    pub confirms: Option<String>,
}

impl FieldDefinition {
    pub fn text(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::Text, required: true, confirms: None }
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::Boolean, required: true, confirms: None }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn confirming(mut self, field: impl Into<String>) -> Self {
        self.confirms = Some(field.into());
        self
    }

    pub fn is_confirmation_only(&self) -> bool {
        self.confirms.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormStep {
    pub title: String,
    pub fields: Vec<FieldDefinition>,
}

impl FormStep {
    pub fn new(title: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self { title: title.into(), fields }
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|field| field.required)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("form step {0} does not exist")]
    UnknownStep(usize),
    #[error("field `{field}` is not part of step {step}")]
    UnknownField { step: usize, field: String },
    #[error("field `{field}` expects a {expected:?} value")]
    KindMismatch { field: String, expected: FieldKind },
    #[error("field `{0}` is declared more than once")]
    DuplicateField(String),
    #[error("step {step} is missing required fields: {missing:?}")]
    IncompleteStep { step: usize, missing: Vec<String> },
    #[error("field `{field}` does not match `{confirms}`")]
    ConfirmationMismatch { field: String, confirms: String },
    #[error("cannot advance past the last step")]
    PastLastStep,
}

impl FormError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::IncompleteStep { .. } | Self::ConfirmationMismatch { .. } => {
                ErrorClass::Validation
            }
            Self::UnknownStep(_)
            | Self::UnknownField { .. }
            | Self::KindMismatch { .. }
            | Self::DuplicateField(_)
            | Self::PastLastStep => ErrorClass::Programmer,
        }
    }
}

/// Multi-step form state. Values survive moving back and forth between steps and are only
/// dropped by [`ApplicationFormController::reset`].
pub struct ApplicationFormController {
    steps: Vec<FormStep>,
    step_index: usize,
    values: BTreeMap<String, FieldValue>,
    audit_sink: Arc<dyn AuditSink>,
    audit_context: AuditContext,
}

impl ApplicationFormController {
    pub fn new(steps: Vec<FormStep>) -> Result<Self, FormError> {
        let mut names = HashSet::new();
        for field in steps.iter().flat_map(|step| step.fields.iter()) {
            if !names.insert(field.name.as_str()) {
                return Err(FormError::DuplicateField(field.name.clone()));
            }
        }
        for (index, step) in steps.iter().enumerate() {
            for target in step.fields.iter().filter_map(|field| field.confirms.as_deref()) {
                if !names.contains(target) {
                    return Err(FormError::UnknownField { step: index, field: target.to_string() });
                }
            }
        }

        Ok(Self {
            steps,
            step_index: 0,
            values: BTreeMap::new(),
            audit_sink: Arc::new(NoopAuditSink),
            audit_context: AuditContext::anonymous("application", "application-form"),
        })
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>, context: AuditContext) -> Self {
        self.audit_sink = sink;
        self.audit_context = context;
        self
    }

    pub fn steps(&self) -> &[FormStep] {
        &self.steps
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn is_last_step(&self) -> bool {
        self.step_index + 1 >= self.steps.len()
    }

    pub fn value(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn set_field(
        &mut self,
        step_index: usize,
        field_name: &str,
        value: impl Into<FieldValue>,
    ) -> Result<(), FormError> {
        let step = self.steps.get(step_index).ok_or(FormError::UnknownStep(step_index))?;
        let definition =
            step.fields.iter().find(|field| field.name == field_name).ok_or_else(|| {
                FormError::UnknownField { step: step_index, field: field_name.to_string() }
            })?;

        let value = value.into();
        if value.kind() != definition.kind {
            return Err(FormError::KindMismatch {
                field: field_name.to_string(),
                expected: definition.kind,
            });
        }
        self.values.insert(field_name.to_string(), value);
        Ok(())
    }

    pub fn can_advance(&self, step_index: usize) -> bool {
        self.validate_step(step_index).is_ok()
    }

    /// Required fields of `step_index` that are absent or blank. Boolean fields always count
    /// as present.
    pub fn missing_fields(&self, step_index: usize) -> Result<Vec<String>, FormError> {
        let step = self.steps.get(step_index).ok_or(FormError::UnknownStep(step_index))?;
        Ok(step
            .required_fields()
            .filter(|field| field.kind == FieldKind::Text)
            .filter(|field| match self.values.get(&field.name) {
                Some(FieldValue::Text(value)) => value.trim().is_empty(),
                _ => true,
            })
            .map(|field| field.name.clone())
            .collect())
    }

    pub fn advance(&mut self) -> Result<usize, FormError> {
        if self.is_last_step() {
            return Err(FormError::PastLastStep);
        }
        if let Err(error) = self.validate_step(self.step_index) {
            debug!(
                event_name = "kyc.application.advance_blocked",
                step = self.step_index,
                error = %error,
            );
            return Err(error);
        }
        self.step_index += 1;
        Ok(self.step_index)
    }

    pub fn retreat(&mut self) -> usize {
        self.step_index = self.step_index.saturating_sub(1);
        self.step_index
    }

    /// Validates every step and returns the submission payload. Confirmation-only fields
    /// are left out; unset boolean fields are submitted as `false`.
    pub fn finalize(&self) -> Result<Map<String, Value>, FormError> {
        for index in 0..self.steps.len() {
            self.validate_step(index)?;
        }

        let mut payload = Map::new();
        for field in self.steps.iter().flat_map(|step| step.fields.iter()) {
            if field.is_confirmation_only() {
                continue;
            }
            match (self.values.get(&field.name), field.kind) {
                (Some(value), _) => {
                    payload.insert(field.name.clone(), value.to_json());
                }
                (None, FieldKind::Boolean) => {
                    payload.insert(field.name.clone(), Value::Bool(false));
                }
                (None, FieldKind::Text) => {}
            }
        }

        info!(
            event_name = "kyc.application.finalized",
            correlation_id = %self.audit_context.correlation_id,
            fields = payload.len(),
            "application form finalized"
        );
        self.audit_sink.emit(AuditEvent::application_finalized(&self.audit_context, payload.len()));
        Ok(payload)
    }

    pub fn reset(&mut self) {
        self.step_index = 0;
        self.values.clear();
    }

    fn validate_step(&self, step_index: usize) -> Result<(), FormError> {
        let missing = self.missing_fields(step_index)?;
        if !missing.is_empty() {
            return Err(FormError::IncompleteStep { step: step_index, missing });
        }

        for field in &self.steps[step_index].fields {
            let Some(target) = field.confirms.as_deref() else { continue };
            let value = self.values.get(&field.name);
            let expected = self.values.get(target);
            if value.is_some() && value != expected {
                return Err(FormError::ConfirmationMismatch {
                    field: field.name.clone(),
                    confirms: target.to_string(),
                });
            }
        }
        Ok(())
    }
}
