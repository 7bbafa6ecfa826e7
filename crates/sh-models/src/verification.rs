//! Verification code model
//!
//! Table: channel_verification_codes (one row per channel at most)

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sh_core::traits::Id;

/// Number of digits in an email verification code
pub const CODE_LENGTH: usize = 6;

/// Single-use, time-limited, attempt-limited code proving ownership of an email channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationCode {
    pub channel_id: Id,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub attempt_count: i32,
    pub created_at: DateTime<Utc>,
}

impl VerificationCode {
    pub fn new(channel_id: Id, code: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            channel_id,
            code: code.into(),
            expires_at: now + ttl,
            attempt_count: 0,
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn attempts_exhausted(&self, max_attempts: i32) -> bool {
        self.attempt_count >= max_attempts
    }

    /// Time left before a resend is allowed, if any
    pub fn cooldown_remaining(&self, now: DateTime<Utc>, cooldown: Duration) -> Option<Duration> {
        let ready_at = self.created_at + cooldown;
        (now < ready_at).then(|| ready_at - now)
    }

    /// Compare without short-circuiting on the first differing byte
    pub fn matches(&self, submitted: &str) -> bool {
        let submitted = submitted.trim();
        if submitted.len() != self.code.len() {
            return false;
        }
        self.code
            .bytes()
            .zip(submitted.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let code = VerificationCode::new(1, "123456", now, Duration::minutes(15));
        assert!(!code.is_expired(now + Duration::minutes(14)));
        assert!(code.is_expired(now + Duration::minutes(15)));
    }

    #[test]
    fn test_matches() {
        let code = VerificationCode::new(1, "012345", Utc::now(), Duration::minutes(15));
        assert!(code.matches("012345"));
        assert!(code.matches(" 012345 "));
        assert!(!code.matches("012346"));
        assert!(!code.matches("12345"));
    }

    #[test]
    fn test_cooldown() {
        let now = Utc::now();
        let code = VerificationCode::new(1, "000000", now, Duration::minutes(15));
        let cooldown = Duration::seconds(60);

        assert_eq!(
            code.cooldown_remaining(now + Duration::seconds(20), cooldown),
            Some(Duration::seconds(40))
        );
        assert_eq!(code.cooldown_remaining(now + Duration::seconds(60), cooldown), None);
    }
}
