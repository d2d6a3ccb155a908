use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audit::{AuditAction, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use crate::clock::Clock;
use crate::config::OtpConfig;
use crate::errors::ErrorClass;
use crate::otp::challenge::{seconds_remaining, Channel, OtpChallenge, OtpStatus};
use crate::ports::{OtpTransport, TransportError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OtpError {
    #[error("phone number has {digits} digits, at least {minimum} are required")]
    InvalidPhoneNumber { digits: usize, minimum: usize },
    #[error("verification code is empty")]
    EmptyCode,
    #[error("verification code was not accepted: {message}")]
    InvalidCode { attempts: u32, message: String },
    #[error("a new code can be requested in {seconds_remaining}s")]
    ResendNotYetAvailable { seconds_remaining: u64 },
    #[error("too many verification attempts ({attempts})")]
    TooManyAttempts { attempts: u32 },
    #[error("phone number is already verified")]
    AlreadyVerified,
    #[error("no verification code has been sent yet")]
    NoActiveChallenge,
    #[error("code delivery was refused: {0}")]
    SendRejected(String),
    #[error("verification was cancelled")]
    Cancelled,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl OtpError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidPhoneNumber { .. } | Self::EmptyCode => ErrorClass::Validation,
            Self::InvalidCode { .. }
            | Self::ResendNotYetAvailable { .. }
            | Self::TooManyAttempts { .. }
            | Self::AlreadyVerified => ErrorClass::Challenge,
            Self::SendRejected(_) | Self::Transport(_) => ErrorClass::Transport,
            Self::NoActiveChallenge | Self::Cancelled => ErrorClass::Programmer,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtpSettings {
    pub resend_window: Duration,
    pub min_phone_digits: usize,
    pub max_verify_attempts: Option<u32>,
    pub tick_interval: std::time::Duration,
}

impl Default for OtpSettings {
    fn default() -> Self {
        Self {
            resend_window: Duration::seconds(60),
            min_phone_digits: 10,
            max_verify_attempts: None,
            tick_interval: std::time::Duration::from_secs(1),
        }
    }
}

impl From<&OtpConfig> for OtpSettings {
    fn from(config: &OtpConfig) -> Self {
        Self {
            resend_window: Duration::seconds(config.resend_window_secs as i64),
            min_phone_digits: config.min_phone_digits,
            max_verify_attempts: config.max_verify_attempts,
            tick_interval: std::time::Duration::from_millis(config.countdown_tick_millis),
        }
    }
}

/// Tears a manager down from outside, typically when the owning screen goes away.
#[derive(Clone, Default)]
pub struct OtpCancelHandle {
    cancelled: Arc<AtomicBool>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl OtpCancelHandle {
    /// Stops the countdown and discards any verification still in flight. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.stop_ticker();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn replace_ticker(&self, next: Option<JoinHandle<()>>) {
        let mut slot = match self.ticker.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = next;
    }

    fn stop_ticker(&self) {
        self.replace_ticker(None);
    }

    fn ticker_running(&self) -> bool {
        let slot = match self.ticker.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// Issues, resends and verifies one-time codes for a single phone number at a time.
pub struct OtpChallengeManager {
    transport: Arc<dyn OtpTransport>,
    clock: Arc<dyn Clock>,
    settings: OtpSettings,
    challenge: Option<OtpChallenge>,
    sending: bool,
    generation: u64,
    last_error: Option<String>,
    cancel: OtpCancelHandle,
    audit_sink: Arc<dyn AuditSink>,
    audit_context: AuditContext,
}

impl OtpChallengeManager {
    pub fn new(
        transport: Arc<dyn OtpTransport>,
        clock: Arc<dyn Clock>,
        settings: OtpSettings,
    ) -> Self {
        Self {
            transport,
            clock,
            settings,
            challenge: None,
            sending: false,
            generation: 0,
            last_error: None,
            cancel: OtpCancelHandle::default(),
            audit_sink: Arc::new(NoopAuditSink),
            audit_context: AuditContext::anonymous("otp", "otp-manager"),
        }
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>, context: AuditContext) -> Self {
        self.audit_sink = sink;
        self.audit_context = context;
        self
    }

    pub fn status(&self) -> OtpStatus {
        if self.sending {
            return OtpStatus::Sending;
        }
        self.challenge.as_ref().map(|challenge| challenge.status).unwrap_or(OtpStatus::Idle)
    }

    pub fn challenge(&self) -> Option<&OtpChallenge> {
        self.challenge.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_verified(&self) -> bool {
        self.status() == OtpStatus::Verified
    }

    pub fn cancel_handle(&self) -> OtpCancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn countdown_active(&self) -> bool {
        self.cancel.ticker_running()
    }

    /// Sends a fresh code. The phone number is checked locally before any transport call.
    /// A successful send replaces the previous challenge and restarts the resend window.
    pub async fn send(
        &mut self,
        phone_number: &str,
        channel: Channel,
    ) -> Result<OtpChallenge, OtpError> {
        self.ensure_active()?;

        let phone_number = phone_number.trim();
        let digits = phone_number.chars().filter(char::is_ascii_digit).count();
        if digits < self.settings.min_phone_digits {
            return Err(OtpError::InvalidPhoneNumber {
                digits,
                minimum: self.settings.min_phone_digits,
            });
        }

        self.sending = true;
        let result = self.transport.send_code(phone_number, channel).await;
        self.sending = false;
        self.ensure_active()?;

        let envelope = match result {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(
                    event_name = "kyc.otp.send_failed",
                    channel = %channel,
                    error = %error,
                    "code delivery transport failed"
                );
                return Err(error.into());
            }
        };
        if let Err(message) = envelope.into_result() {
            self.emit(AuditAction::OtpSendRejected, AuditOutcome::Rejected, channel);
            return Err(OtpError::SendRejected(message));
        }

        self.cancel.stop_ticker();
        self.generation += 1;
        let challenge = OtpChallenge::issue(
            self.generation,
            phone_number,
            channel,
            self.clock.now(),
            self.settings.resend_window,
        );
        self.challenge = Some(challenge.clone());
        self.last_error = None;

        info!(
            event_name = "kyc.otp.code_sent",
            channel = %channel,
            generation = self.generation,
            resend_window_secs = self.settings.resend_window.num_seconds(),
            "verification code sent"
        );
        self.emit(AuditAction::OtpCodeSent, AuditOutcome::Success, channel);
        Ok(challenge)
    }

    /// Checks `code` with the provider. A rejected code keeps the challenge open and
    /// counts the attempt; a transport failure leaves the challenge untouched.
    pub async fn verify(&mut self, code: &str) -> Result<(), OtpError> {
        self.ensure_active()?;

        let max_attempts = self.settings.max_verify_attempts;
        let challenge = self.challenge.as_mut().ok_or(OtpError::NoActiveChallenge)?;
        match challenge.status {
            OtpStatus::Verified => return Ok(()),
            OtpStatus::Failed => {
                return Err(OtpError::TooManyAttempts { attempts: challenge.attempt_count })
            }
            _ => {}
        }

        let code = code.trim();
        if code.is_empty() {
            return Err(OtpError::EmptyCode);
        }

        if let Some(max) = max_attempts {
            if challenge.attempt_count >= max {
                challenge.status = OtpStatus::Failed;
                return Err(OtpError::TooManyAttempts { attempts: challenge.attempt_count });
            }
        }

        let generation = challenge.generation;
        let phone_number = challenge.phone_number.clone();
        let channel = challenge.channel;
        challenge.status = OtpStatus::Verifying;

        let result = self.transport.verify_code(&phone_number, code, channel).await;

        let Some(challenge) = self.challenge.as_mut().filter(|c| c.generation == generation)
        else {
            return Err(OtpError::Cancelled);
        };
        challenge.status = OtpStatus::AwaitingCode;
        if self.cancel.is_cancelled() {
            warn!(
                event_name = "kyc.otp.late_verification_discarded",
                generation,
                "verification response arrived after cancellation"
            );
            return Err(OtpError::Cancelled);
        }

        let envelope = result?;
        match envelope.into_result() {
            Ok(_) => {
                challenge.status = OtpStatus::Verified;
                self.last_error = None;
                info!(event_name = "kyc.otp.verified", channel = %channel, "phone number verified");
                self.emit(AuditAction::OtpVerified, AuditOutcome::Success, channel);
                self.cancel.stop_ticker();
                Ok(())
            }
            Err(message) => {
                challenge.attempt_count += 1;
                let attempts = challenge.attempt_count;
                if max_attempts.is_some_and(|max| attempts >= max) {
                    challenge.status = OtpStatus::Failed;
                }
                self.last_error = Some(message.clone());
                info!(
                    event_name = "kyc.otp.code_rejected",
                    channel = %channel,
                    attempts,
                    "verification code rejected"
                );
                self.emit(AuditAction::OtpCodeRejected, AuditOutcome::Rejected, channel);
                Err(OtpError::InvalidCode { attempts, message })
            }
        }
    }

    /// Sends a new code once the resend window has elapsed, optionally over another channel.
    pub async fn resend(&mut self, channel: Option<Channel>) -> Result<OtpChallenge, OtpError> {
        let challenge = self.challenge.as_ref().ok_or(OtpError::NoActiveChallenge)?;
        if challenge.status == OtpStatus::Verified {
            return Err(OtpError::AlreadyVerified);
        }

        let now = self.clock.now();
        if !challenge.resend_due(now) {
            return Err(OtpError::ResendNotYetAvailable {
                seconds_remaining: seconds_remaining(challenge.resend_available_at, now),
            });
        }

        let phone_number = challenge.phone_number.clone();
        let channel = channel.unwrap_or(challenge.channel);
        self.send(&phone_number, channel).await
    }

    /// Applies the countdown transition at the current instant and returns the seconds left.
    pub fn tick(&mut self) -> u64 {
        let now = self.clock.now();
        match self.challenge.take() {
            Some(challenge) => {
                let challenge = challenge.tick(now);
                let remaining = challenge.seconds_until_resend;
                self.challenge = Some(challenge);
                remaining
            }
            None => 0,
        }
    }

    pub fn seconds_until_resend(&self) -> u64 {
        let now = self.clock.now();
        self.challenge
            .as_ref()
            .map(|challenge| challenge.clone().tick(now).seconds_until_resend)
            .unwrap_or(0)
    }

    pub fn can_resend(&self) -> bool {
        let now = self.clock.now();
        self.challenge.as_ref().is_some_and(|challenge| {
            challenge.status != OtpStatus::Verified && challenge.resend_due(now)
        })
    }

    /// Spawns the countdown ticker for the current challenge. The receiver yields the
    /// remaining seconds each time they drop and closes after reaching zero. Any ticker
    /// from an earlier challenge is aborted first.
    pub fn start_countdown(&self) -> Option<mpsc::Receiver<u64>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let challenge = self.challenge.as_ref()?;
        let deadline = challenge.resend_available_at;
        let clock = self.clock.clone();
        let period = self.settings.tick_interval;
        let (tx, rx) = mpsc::channel(8);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            let mut last = u64::MAX;
            loop {
                interval.tick().await;
                let remaining = seconds_remaining(deadline, clock.now()).min(last);
                if remaining < last {
                    if tx.send(remaining).await.is_err() {
                        break;
                    }
                    last = remaining;
                }
                if remaining == 0 {
                    break;
                }
            }
        });

        self.cancel.replace_ticker(Some(task));
        Some(rx)
    }

    fn ensure_active(&self) -> Result<(), OtpError> {
        if self.cancel.is_cancelled() {
            return Err(OtpError::Cancelled);
        }
        Ok(())
    }

    fn emit(&self, action: AuditAction, outcome: AuditOutcome, channel: Channel) {
        self.audit_sink.emit(
            AuditEvent::otp(&self.audit_context, action, outcome, channel, self.generation)
                .at(self.clock.now()),
        );
    }
}

impl Drop for OtpChallengeManager {
    fn drop(&mut self) {
        self.cancel.stop_ticker();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::{Duration, TimeZone, Utc};

    use super::{OtpCancelHandle, OtpChallengeManager, OtpError, OtpSettings};
    use crate::audit::InMemoryAuditSink;
    use crate::clock::{Clock, ManualClock};
    use crate::errors::ErrorClass;
    use crate::otp::challenge::{Channel, OtpStatus};
    use crate::ports::{Envelope, InMemoryOtpTransport, OtpTransport, TransportError};

    const PHONE: &str = "+55 11 98765-4321";

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).single().expect("instant"))
    }

    fn manager(transport: Arc<InMemoryOtpTransport>, clock: &ManualClock) -> OtpChallengeManager {
        OtpChallengeManager::new(transport, Arc::new(clock.clone()), OtpSettings::default())
    }

    /// Cancels the manager while the verification request is in flight, then answers it.
    struct CancelDuringVerify {
        handle: Mutex<Option<OtpCancelHandle>>,
    }

    #[async_trait::async_trait]
    impl OtpTransport for CancelDuringVerify {
        async fn send_code(
            &self,
            _phone_number: &str,
            _channel: Channel,
        ) -> Result<Envelope<()>, TransportError> {
            Ok(Envelope::ok())
        }

        async fn verify_code(
            &self,
            _phone_number: &str,
            _code: &str,
            _channel: Channel,
        ) -> Result<Envelope<()>, TransportError> {
            if let Some(handle) = self.handle.lock().expect("handle lock").as_ref() {
                handle.cancel();
            }
            Ok(Envelope::ok())
        }
    }

    #[tokio::test]
    async fn short_phone_number_fails_before_transport() {
        let transport = Arc::new(InMemoryOtpTransport::new("123456"));
        let mut manager = manager(transport.clone(), &clock());

        let error = manager.send("119876543", Channel::Sms).await.expect_err("9 digits rejected");

        assert_eq!(error, OtpError::InvalidPhoneNumber { digits: 9, minimum: 10 });
        assert_eq!(error.class(), ErrorClass::Validation);
        assert!(transport.sent_codes().await.is_empty());
        assert_eq!(manager.status(), OtpStatus::Idle);
    }

    #[tokio::test]
    async fn send_arms_resend_window() {
        let transport = Arc::new(InMemoryOtpTransport::new("123456"));
        let clock = clock();
        let mut manager = manager(transport.clone(), &clock);

        let challenge = manager.send(PHONE, Channel::Sms).await.expect("code sent");

        assert_eq!(challenge.status, OtpStatus::AwaitingCode);
        assert_eq!(challenge.attempt_count, 0);
        assert_eq!(challenge.resend_available_at, clock.now() + Duration::seconds(60));
        assert_eq!(manager.seconds_until_resend(), 60);
        assert_eq!(transport.sent_codes().await.len(), 1);
    }

    #[tokio::test]
    async fn resend_is_gated_until_countdown_reaches_zero() {
        let transport = Arc::new(InMemoryOtpTransport::new("123456"));
        let clock = clock();
        let mut manager = manager(transport.clone(), &clock);
        manager.send(PHONE, Channel::Sms).await.expect("code sent");

        let mut previous = manager.tick();
        for _ in 0..59 {
            clock.advance(Duration::seconds(1));
            let remaining = manager.tick();
            assert!(remaining < previous, "countdown must strictly decrease");
            previous = remaining;

            let error = manager.resend(None).await.expect_err("resend still gated");
            assert_eq!(error, OtpError::ResendNotYetAvailable { seconds_remaining: remaining });
        }
        assert_eq!(previous, 1);
        assert!(!manager.challenge().expect("challenge").can_resend);

        clock.advance(Duration::seconds(1));
        assert_eq!(manager.tick(), 0);
        assert!(manager.challenge().expect("challenge").can_resend);
        assert_eq!(manager.tick(), 0);

        let reissued = manager.resend(None).await.expect("resend allowed at zero");
        assert_eq!(reissued.generation, 2);
        assert_eq!(manager.seconds_until_resend(), 60);
        assert!(matches!(
            manager.resend(None).await,
            Err(OtpError::ResendNotYetAvailable { seconds_remaining: 60 })
        ));
        assert_eq!(transport.sent_codes().await.len(), 2);
    }

    #[tokio::test]
    async fn switching_channel_on_resend_rearms_timer() {
        let transport = Arc::new(InMemoryOtpTransport::new("123456"));
        let clock = clock();
        let mut manager = manager(transport.clone(), &clock);
        manager.send(PHONE, Channel::Sms).await.expect("code sent");
        manager.verify("000000").await.expect_err("wrong code");

        clock.advance(Duration::seconds(75));
        let challenge = manager.resend(Some(Channel::WhatsApp)).await.expect("resend");

        assert_eq!(challenge.channel, Channel::WhatsApp);
        assert_eq!(challenge.attempt_count, 0);
        assert_eq!(manager.seconds_until_resend(), 60);
        let sent = transport.sent_codes().await;
        assert_eq!(sent.last().map(|code| code.channel), Some(Channel::WhatsApp));
    }

    #[tokio::test]
    async fn wrong_code_counts_attempt_and_keeps_waiting() {
        let transport = Arc::new(InMemoryOtpTransport::new("123456"));
        let mut manager = manager(transport, &clock());
        manager.send(PHONE, Channel::Sms).await.expect("code sent");

        let error = manager.verify("111111").await.expect_err("wrong code rejected");
        assert!(matches!(error, OtpError::InvalidCode { attempts: 1, .. }));
        assert_eq!(error.class(), ErrorClass::Challenge);
        assert_eq!(manager.status(), OtpStatus::AwaitingCode);
        assert_eq!(manager.last_error(), Some("invalid verification code"));

        manager.verify("123456").await.expect("right code accepted");
        assert_eq!(manager.status(), OtpStatus::Verified);
        assert!(manager.is_verified());
        assert!(manager.last_error().is_none());
    }

    #[tokio::test]
    async fn empty_code_is_rejected_locally() {
        let transport = Arc::new(InMemoryOtpTransport::new("123456"));
        let mut manager = manager(transport.clone(), &clock());
        manager.send(PHONE, Channel::Sms).await.expect("code sent");

        assert_eq!(manager.verify("   ").await, Err(OtpError::EmptyCode));
        assert_eq!(transport.verify_attempts().await, 0);
        assert_eq!(manager.challenge().map(|c| c.attempt_count), Some(0));
    }

    #[tokio::test]
    async fn transport_failures_leave_state_untouched() {
        let transport = Arc::new(InMemoryOtpTransport::new("123456"));
        let mut manager = manager(transport.clone(), &clock());

        transport.fail_next_send(TransportError::TimedOut).await;
        let error = manager.send(PHONE, Channel::Sms).await.expect_err("send times out");
        assert_eq!(error, OtpError::Transport(TransportError::TimedOut));
        assert!(error.class().is_recoverable());
        assert_eq!(manager.status(), OtpStatus::Idle);
        assert!(manager.challenge().is_none());

        manager.send(PHONE, Channel::Sms).await.expect("retry succeeds");
        transport.fail_next_verify(TransportError::Failed("502".to_string())).await;
        let before = manager.challenge().cloned();
        manager.verify("123456").await.expect_err("verify transport fails");

        assert_eq!(manager.challenge().cloned(), before);
    }

    #[tokio::test]
    async fn verify_without_challenge_is_rejected() {
        let transport = Arc::new(InMemoryOtpTransport::new("123456"));
        let mut manager = manager(transport, &clock());

        assert_eq!(manager.verify("123456").await, Err(OtpError::NoActiveChallenge));
        assert_eq!(manager.resend(None).await, Err(OtpError::NoActiveChallenge));
    }

    #[tokio::test]
    async fn configured_lockout_stops_verification() {
        let transport = Arc::new(InMemoryOtpTransport::new("123456"));
        let clock = clock();
        let mut manager = OtpChallengeManager::new(
            transport.clone(),
            Arc::new(clock.clone()),
            OtpSettings { max_verify_attempts: Some(2), ..OtpSettings::default() },
        );
        manager.send(PHONE, Channel::Sms).await.expect("code sent");

        manager.verify("000001").await.expect_err("first wrong code");
        manager.verify("000002").await.expect_err("second wrong code");
        assert_eq!(manager.status(), OtpStatus::Failed);
        assert_eq!(manager.verify("123456").await, Err(OtpError::TooManyAttempts { attempts: 2 }));
        assert_eq!(transport.verify_attempts().await, 2);

        clock.advance(Duration::seconds(60));
        manager.resend(None).await.expect("fresh challenge unlocks verification");
        manager.verify("123456").await.expect("verified after resend");
    }

    #[tokio::test]
    async fn late_verification_after_cancel_is_discarded() {
        let transport = Arc::new(CancelDuringVerify { handle: Mutex::new(None) });
        let mut manager =
            OtpChallengeManager::new(transport.clone(), Arc::new(clock()), OtpSettings::default());
        manager.send(PHONE, Channel::Sms).await.expect("code sent");
        *transport.handle.lock().expect("handle lock") = Some(manager.cancel_handle());

        let result = manager.verify("123456").await;

        assert_eq!(result, Err(OtpError::Cancelled));
        assert_ne!(manager.status(), OtpStatus::Verified);
        assert_eq!(manager.send(PHONE, Channel::Sms).await, Err(OtpError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_countdown_and_is_idempotent() {
        let transport = Arc::new(InMemoryOtpTransport::new("123456"));
        let mut manager = manager(transport, &clock());
        manager.send(PHONE, Channel::Sms).await.expect("code sent");

        let mut countdown = manager.start_countdown().expect("countdown starts");
        assert_eq!(countdown.recv().await, Some(60));
        assert!(manager.countdown_active());

        let handle = manager.cancel_handle();
        handle.cancel();
        handle.cancel();
        manager.cancel();

        while countdown.recv().await.is_some() {}
        assert!(!manager.countdown_active());
        assert!(manager.start_countdown().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn new_challenge_aborts_previous_countdown() {
        let transport = Arc::new(InMemoryOtpTransport::new("123456"));
        let clock = clock();
        let mut manager = manager(transport, &clock);
        manager.send(PHONE, Channel::Sms).await.expect("code sent");
        let mut first = manager.start_countdown().expect("countdown starts");
        assert_eq!(first.recv().await, Some(60));

        clock.advance(Duration::seconds(60));
        manager.resend(Some(Channel::WhatsApp)).await.expect("resend");

        while first.recv().await.is_some() {}
        assert!(!manager.countdown_active());

        let mut second = manager.start_countdown().expect("second countdown");
        assert_eq!(second.recv().await, Some(60));
        clock.advance(Duration::seconds(60));
        assert_eq!(second.recv().await, Some(0));
        assert_eq!(second.recv().await, None);
    }

    #[tokio::test]
    async fn audit_trail_records_send_and_verify() {
        let transport = Arc::new(InMemoryOtpTransport::new("123456"));
        let sink = InMemoryAuditSink::default();
        let mut manager = manager(transport, &clock()).with_audit(
            Arc::new(sink.clone()),
            crate::audit::AuditContext::new(Some("u-1".to_string()), "req-9", "otp-screen"),
        );

        manager.send(PHONE, Channel::WhatsApp).await.expect("code sent");
        manager.verify("123456").await.expect("verified");

        assert_eq!(sink.event_types(), vec!["kyc.otp.code_sent", "kyc.otp.verified"]);
        assert_eq!(sink.events()[0].metadata.get("channel").map(String::as_str), Some("whatsapp"));
    }
}
