use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    #[serde(rename = "whatsapp")]
    WhatsApp,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sms => f.write_str("sms"),
            Self::WhatsApp => f.write_str("whatsapp"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sms" => Ok(Self::Sms),
            "whatsapp" => Ok(Self::WhatsApp),
            other => Err(format!("unsupported channel `{other}` (expected sms|whatsapp)")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpStatus {
    Idle,
    Sending,
    AwaitingCode,
    Verifying,
    Verified,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpChallenge {
    /// Increases with every issued challenge; used to discard responses for stale ones.
    pub generation: u64,
    pub phone_number: String,
    pub channel: Channel,
    pub issued_at: DateTime<Utc>,
    pub resend_available_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub status: OtpStatus,
    pub seconds_until_resend: u64,
    pub can_resend: bool,
}

impl OtpChallenge {
    pub fn issue(
        generation: u64,
        phone_number: impl Into<String>,
        channel: Channel,
        issued_at: DateTime<Utc>,
        resend_window: Duration,
    ) -> Self {
        let resend_available_at = issued_at + resend_window;
        Self {
            generation,
            phone_number: phone_number.into(),
            channel,
            issued_at,
            resend_available_at,
            attempt_count: 0,
            status: OtpStatus::AwaitingCode,
            seconds_until_resend: seconds_remaining(resend_available_at, issued_at),
            can_resend: false,
        }
    }

    /// Advances the countdown to `now`. The remaining seconds never increase, even if
    /// the clock steps backwards, and `can_resend` flips once when they reach zero.
    pub fn tick(mut self, now: DateTime<Utc>) -> Self {
        let remaining = seconds_remaining(self.resend_available_at, now);
        self.seconds_until_resend = self.seconds_until_resend.min(remaining);
        if self.seconds_until_resend == 0 {
            self.can_resend = true;
        }
        self
    }

    pub fn resend_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.resend_available_at
    }
}

/// Whole seconds left until `deadline`, rounded up and floored at zero.
pub fn seconds_remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (deadline - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        ((millis + 999) / 1_000) as u64
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{seconds_remaining, Channel, OtpChallenge, OtpStatus};

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).single().expect("valid instant")
    }

    #[test]
    fn issued_challenge_waits_for_full_window() {
        let challenge =
            OtpChallenge::issue(1, "11987654321", Channel::Sms, start(), Duration::seconds(60));

        assert_eq!(challenge.status, OtpStatus::AwaitingCode);
        assert_eq!(challenge.seconds_until_resend, 60);
        assert_eq!(challenge.attempt_count, 0);
        assert!(!challenge.can_resend);
        assert_eq!(challenge.resend_available_at, start() + Duration::seconds(60));
    }

    #[test]
    fn tick_counts_down_and_flips_once_at_zero() {
        let mut challenge =
            OtpChallenge::issue(1, "11987654321", Channel::Sms, start(), Duration::seconds(3));
        let mut observed = Vec::new();
        for second in 1..=5 {
            challenge = challenge.tick(start() + Duration::seconds(second));
            observed.push((challenge.seconds_until_resend, challenge.can_resend));
        }

        assert_eq!(observed, vec![(2, false), (1, false), (0, true), (0, true), (0, true)]);
    }

    #[test]
    fn tick_ignores_clock_stepping_backwards() {
        let challenge =
            OtpChallenge::issue(1, "11987654321", Channel::Sms, start(), Duration::seconds(60))
                .tick(start() + Duration::seconds(30))
                .tick(start() + Duration::seconds(5));

        assert_eq!(challenge.seconds_until_resend, 30);
    }

    #[test]
    fn partial_seconds_round_up() {
        assert_eq!(seconds_remaining(start() + Duration::milliseconds(1_500), start()), 2);
        assert_eq!(seconds_remaining(start(), start() + Duration::seconds(1)), 0);
    }

    #[test]
    fn channel_parses_case_insensitively() {
        assert_eq!("WhatsApp".parse::<Channel>(), Ok(Channel::WhatsApp));
        assert!("telegram".parse::<Channel>().is_err());
    }
}
