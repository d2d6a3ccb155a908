//! Audit trail of verification milestones.
//!
//! Every event is one of a closed set of [`AuditAction`]s, so the category and
//! the dotted event type cannot drift apart. Each component builds its events
//! through its own constructor on [`AuditEvent`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::otp::Channel;
use crate::workflow::StepKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Workflow,
    Otp,
    Application,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    StepsCompleted,
    OtpCodeSent,
    OtpSendRejected,
    OtpVerified,
    OtpCodeRejected,
    ApplicationFinalized,
}

impl AuditAction {
    pub fn event_type(self) -> &'static str {
        match self {
            Self::StepsCompleted => "kyc.workflow.steps_completed",
            Self::OtpCodeSent => "kyc.otp.code_sent",
            Self::OtpSendRejected => "kyc.otp.send_rejected",
            Self::OtpVerified => "kyc.otp.verified",
            Self::OtpCodeRejected => "kyc.otp.code_rejected",
            Self::ApplicationFinalized => "kyc.application.finalized",
        }
    }

    pub fn category(self) -> AuditCategory {
        match self {
            Self::StepsCompleted => AuditCategory::Workflow,
            Self::OtpCodeSent
            | Self::OtpSendRejected
            | Self::OtpVerified
            | Self::OtpCodeRejected => AuditCategory::Otp,
            Self::ApplicationFinalized => AuditCategory::Application,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

/// Who is being verified and which request the events belong to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub user_id: Option<String>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        user_id: Option<String>,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self { user_id, correlation_id: correlation_id.into(), actor: actor.into() }
    }

    /// Context for a component running before any user is known.
    pub fn anonymous(correlation_id: impl Into<String>, actor: impl Into<String>) -> Self {
        Self::new(None, correlation_id, actor)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub user_id: Option<String>,
    pub correlation_id: String,
    pub action: AuditAction,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    fn record(context: &AuditContext, action: AuditAction, outcome: AuditOutcome) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            user_id: context.user_id.clone(),
            correlation_id: context.correlation_id.clone(),
            action,
            event_type: action.event_type().to_string(),
            category: action.category(),
            actor: context.actor.clone(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    /// Step completions pushed to the profile service, with the steps as a comma list.
    pub fn steps_completed(
        context: &AuditContext,
        steps: &[StepKind],
        outcome: AuditOutcome,
    ) -> Self {
        let rendered = steps.iter().map(|kind| kind.as_str()).collect::<Vec<_>>().join(",");
        Self::record(context, AuditAction::StepsCompleted, outcome).with_metadata("steps", rendered)
    }

    /// A send or verification of challenge `generation` over `channel`.
    pub fn otp(
        context: &AuditContext,
        action: AuditAction,
        outcome: AuditOutcome,
        channel: Channel,
        generation: u64,
    ) -> Self {
        debug_assert_eq!(action.category(), AuditCategory::Otp);
        Self::record(context, action, outcome)
            .with_metadata("channel", channel.to_string())
            .with_metadata("generation", generation.to_string())
    }

    pub fn application_finalized(context: &AuditContext, field_count: usize) -> Self {
        Self::record(context, AuditAction::ApplicationFinalized, AuditOutcome::Success)
            .with_metadata("fields", field_count.to_string())
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Stamps the event with an instant from the component's clock.
    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Drops every event. Used where no audit trail is wanted.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: AuditEvent) {}
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events().into_iter().map(|event| event.event_type).collect()
    }

    pub fn events_in(&self, category: AuditCategory) -> Vec<AuditEvent> {
        self.events().into_iter().filter(|event| event.category == category).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
