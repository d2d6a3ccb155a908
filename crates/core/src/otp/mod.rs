pub mod challenge;
pub mod manager;

pub use challenge::{Channel, OtpChallenge, OtpStatus};
pub use manager::{OtpCancelHandle, OtpChallengeManager, OtpError, OtpSettings};
