//! One-time codes for the 2FA step.
//!
//! Standard RFC 6238 TOTP: HMAC-SHA1, 30-second steps, 6 digits. The seed is
//! the base32 secret shown when the authenticator app was enrolled.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::clock::Clock;

pub const TOTP_DIGITS: usize = 6;
pub const TOTP_STEP_SECS: u64 = 30;

/// Generates codes from a decoded seed.
pub struct OtpGenerator {
    totp: TOTP,
}

impl OtpGenerator {
    /// Decode a base32 seed. Spaces, dashes, padding, and lowercase are tolerated.
    pub fn from_base32(seed: &SecretString) -> Result<Self> {
        let normalized: String = seed
            .expose_secret()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '=')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        if normalized.is_empty() {
            anyhow::bail!("2FA seed is empty");
        }

        let bytes = Secret::Encoded(normalized)
            .to_bytes()
            .map_err(|e| anyhow!("2FA seed is not valid base32: {e:?}"))?;
        Ok(Self::from_bytes(bytes))
    }

    /// Use raw secret bytes.
    ///
    /// Short secrets (M1 issues 80-bit seeds) are accepted even though RFC 4226
    /// recommends at least 128 bits.
    pub fn from_bytes(secret: Vec<u8>) -> Self {
        Self {
            totp: TOTP::new_unchecked(Algorithm::SHA1, TOTP_DIGITS, 1, TOTP_STEP_SECS, secret),
        }
    }

    /// The code valid at `at`.
    pub fn code_at(&self, at: DateTime<Utc>) -> String {
        self.totp.generate(at.timestamp().max(0) as u64)
    }

    pub fn current(&self, clock: &dyn Clock) -> String {
        self.code_at(clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;

    // RFC 6238 appendix B SHA1 secret, "12345678901234567890".
    const RFC_SECRET: &[u8] = b"12345678901234567890";
    const RFC_SECRET_BASE32: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_rfc6238_vectors_truncated_to_six_digits() {
        let otp = OtpGenerator::from_bytes(RFC_SECRET.to_vec());
        assert_eq!(otp.code_at(at(59)), "287082");
        assert_eq!(otp.code_at(at(1_111_111_109)), "081804");
        assert_eq!(otp.code_at(at(1_234_567_890)), "005924");
        assert_eq!(otp.code_at(at(2_000_000_000)), "279037");
    }

    #[test]
    fn test_base32_seed_matches_raw_bytes() -> Result<()> {
        let otp = OtpGenerator::from_base32(&SecretString::from(RFC_SECRET_BASE32.to_string()))?;
        assert_eq!(otp.code_at(at(59)), "287082");
        Ok(())
    }

    #[test]
    fn test_seed_normalization() -> Result<()> {
        let seed = SecretString::from("gezd gnbv gy3t qojq gezd-gnbv-gy3t-qojq".to_string());
        let otp = OtpGenerator::from_base32(&seed)?;
        assert_eq!(otp.code_at(at(1_111_111_109)), "081804");
        Ok(())
    }

    #[test]
    fn test_same_window_same_code() {
        let otp = OtpGenerator::from_bytes(RFC_SECRET.to_vec());
        assert_eq!(otp.code_at(at(30)), otp.code_at(at(59)));
        assert_ne!(otp.code_at(at(59)), otp.code_at(at(60)));
    }

    #[test]
    fn test_deterministic_for_fixed_clock() -> Result<()> {
        let clock = FixedClock::new(at(1_700_000_000));
        let seed = SecretString::from("JBSWY3DPEHPK3PXP".to_string());
        let first = OtpGenerator::from_base32(&seed)?.current(&clock);
        let second = OtpGenerator::from_base32(&seed)?.current(&clock);
        assert_eq!(first, second);
        assert_eq!(first.len(), TOTP_DIGITS);
        assert!(first.chars().all(|c| c.is_ascii_digit()));
        Ok(())
    }

    #[test]
    fn test_invalid_seed() {
        assert!(OtpGenerator::from_base32(&SecretString::from("not base32!".to_string())).is_err());
        assert!(OtpGenerator::from_base32(&SecretString::from("  ".to_string())).is_err());
    }
}
