//! Scripted verification session against the in-memory collaborators.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use serde::Serialize;
use verifly_core::audit::{AuditContext, InMemoryAuditSink};
use verifly_core::clock::ManualClock;
use verifly_core::config::{AppConfig, LoadOptions};
use verifly_core::documents::{
    configured_kyc_slots, DocumentRequirementTracker, FileSelection, RequiredProgress, SlotId,
    UploadStatus, UploadTask,
};
use verifly_core::errors::EngineError;
use verifly_core::otp::{Channel, OtpChallengeManager, OtpError, OtpSettings, OtpStatus};
use verifly_core::ports::{
    InMemoryDocumentUploader, InMemoryKeyValueStore, InMemoryOtpTransport, InMemoryProfileGateway,
};
use verifly_core::session::{SessionStore, UserProfile};
use verifly_core::workflow::{
    EvidenceSnapshot, ProgressRecorder, StepKind, WorkflowSnapshot, WorkflowStateMachine,
};

use crate::commands::CommandResult;

const ACCEPTED_CODE: &str = "424242";
const FAILING_STATEMENT: &str = "statement-feb.pdf";

#[derive(Debug, Serialize)]
pub struct WalkthroughSummary {
    pub workflow: WorkflowSnapshot,
    pub documents: RequiredProgress,
    pub failed_uploads: Vec<String>,
    pub otp_status: OtpStatus,
    pub otp_channel: Option<Channel>,
    pub otp_rejected_attempts: u32,
    pub phone_verified: bool,
    pub audit_events: Vec<String>,
}

pub fn run(fail_upload: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return CommandResult::config_failure("walkthrough", error),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "walkthrough",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                1,
            );
        }
    };

    match runtime.block_on(walkthrough(&config, fail_upload)) {
        Ok(summary) => CommandResult::data("walkthrough", summary),
        Err(error) => {
            let class = error.class();
            let interface = error.into_interface("walkthrough");
            CommandResult::failure("walkthrough", class.as_str(), interface.to_string(), 1)
        }
    }
}

async fn walkthrough(
    config: &AppConfig,
    fail_upload: bool,
) -> Result<WalkthroughSummary, EngineError> {
    let audit = InMemoryAuditSink::default();
    let context = AuditContext::new(Some("u-demo".to_string()), "walkthrough", "verifly-cli");

    let profile = UserProfile {
        phone_number: Some("+55 11 98765-4321".to_string()),
        ..UserProfile::new("u-demo", "Ana Souza")
    };
    let gateway = Arc::new(InMemoryProfileGateway::with_profile(profile));
    let storage = InMemoryKeyValueStore::default();

    let mut session = SessionStore::new();
    session.set_token("demo-session-token");
    let phone_number = session
        .refresh_profile(gateway.as_ref())
        .await?
        .phone_number
        .clone()
        .unwrap_or_default();
    session.persist(&storage).await?;

    let mut machine = WorkflowStateMachine::standard_kyc()?;
    let recorder = ProgressRecorder::new(gateway.clone())
        .with_audit(Arc::new(audit.clone()), context.clone());
    recorder.complete_step(&mut machine, StepKind::PersonalData).await?;

    let start = Utc.timestamp_opt(1_767_225_600, 0).single().unwrap_or_default();
    let clock = ManualClock::new(start);
    let mut otp = OtpChallengeManager::new(
        Arc::new(InMemoryOtpTransport::new(ACCEPTED_CODE)),
        Arc::new(clock.clone()),
        OtpSettings::from(&config.otp),
    )
    .with_audit(Arc::new(audit.clone()), context.clone());

    otp.send(&phone_number, Channel::Sms).await?;
    let mut rejected_attempts = 0;
    match otp.verify("000000").await {
        Err(OtpError::InvalidCode { attempts, .. }) => rejected_attempts = attempts,
        Err(other) => return Err(other.into()),
        Ok(()) => {}
    }
    clock.advance(Duration::seconds(otp.seconds_until_resend() as i64));
    otp.tick();
    otp.resend(Some(Channel::WhatsApp)).await?;
    otp.verify(ACCEPTED_CODE).await?;

    let uploader = Arc::new(InMemoryDocumentUploader::default());
    if fail_upload {
        uploader.fail_file(FAILING_STATEMENT).await;
    }
    let mut tracker =
        DocumentRequirementTracker::with_slots(configured_kyc_slots(&config.documents))?;

    let selections = [
        ("identity_document", None, FileSelection::new("passport.jpg", 850_000, "image/jpeg")),
        ("selfie", None, FileSelection::new("selfie.png", 420_000, "image/png")),
        (
            "company_registration",
            None,
            FileSelection::new("registration.pdf", 120_000, "application/pdf"),
        ),
        ("proof_of_address", None, FileSelection::new("utility.pdf", 95_000, "application/pdf")),
        (
            "bank_statements",
            Some("file1"),
            FileSelection::new("statement-jan.pdf", 300_000, "application/pdf"),
        ),
        (
            "bank_statements",
            Some("file2"),
            FileSelection::new(FAILING_STATEMENT, 310_000, "application/pdf"),
        ),
        (
            "bank_statements",
            Some("file3"),
            FileSelection::new("statement-mar.pdf", 305_000, "application/pdf"),
        ),
    ];

    let mut handles = Vec::with_capacity(selections.len());
    for (slot, named, selection) in selections {
        let file = tracker.validate_and_stage(selection, &SlotId::new(slot), named)?;
        handles.push((file.name.clone(), UploadTask::spawn(uploader.clone(), file)));
    }

    let mut failed_uploads = Vec::new();
    for (name, handle) in handles {
        if handle.drive(&mut tracker).await? == UploadStatus::Failed {
            failed_uploads.push(name);
        }
    }

    let evidence = EvidenceSnapshot::collect(&tracker, otp.is_verified());
    recorder.reconcile(&mut machine, &evidence).await?;
    if machine.next_incomplete_step() == Some(StepKind::Review)
        && machine.is_clickable(StepKind::Review)?
    {
        recorder.complete_step(&mut machine, StepKind::Review).await?;
    }

    session.refresh_profile(gateway.as_ref()).await?;
    session.persist(&storage).await?;

    tracing::info!(
        event_name = "kyc.walkthrough.finished",
        correlation_id = %context.correlation_id,
        progress_percent = machine.progress_percent(),
        failed_uploads = failed_uploads.len(),
        "walkthrough finished"
    );

    Ok(WalkthroughSummary {
        workflow: machine.snapshot(),
        documents: tracker.required_progress(),
        failed_uploads,
        otp_status: otp.status(),
        otp_channel: otp.challenge().map(|challenge| challenge.channel),
        otp_rejected_attempts: rejected_attempts,
        phone_verified: session.profile().is_some_and(|profile| profile.phone_verified),
        audit_events: audit.event_types(),
    })
}
