//! Failure kinds that callers are expected to tell apart.
//!
//! Everything else in the crate travels as a plain `anyhow::Error`. These
//! variants are raised inside `anyhow` too; inspect them with
//! `err.downcast_ref::<M1Error>()`.

use std::time::Duration;

use crate::browser::WaitCondition;

#[derive(Debug, thiserror::Error)]
pub enum M1Error {
    /// A UI element did not reach the requested state within its bound.
    #[error("Timed out after {timeout:?} waiting for {selector} to become {condition}")]
    NavigationTimeout {
        selector: String,
        condition: WaitCondition,
        timeout: Duration,
    },

    /// The login flow never reached the authenticated landing page. Bad
    /// credentials, a rejected one-time code, and an unexpected UI all end here.
    #[error("Login did not reach {expected} (last URL: {last_url})")]
    AuthenticationFailed { expected: String, last_url: String },

    /// No authorized API request carrying an account id was observed after
    /// the post-login navigation.
    #[error(
        "No authorized API request with an account id was observed ({observed} requests captured)"
    )]
    TokenExtractionFailed { observed: usize },

    /// Transient page failures persisted past the retry budget.
    #[error("Activity request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The API rejected the bearer token.
    #[error("M1 API rejected the session (HTTP {status})")]
    Unauthorized { status: u16 },
}

impl M1Error {
    /// Returns true if `err` is (or wraps) an [`M1Error::Unauthorized`].
    pub fn is_unauthorized(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<M1Error>(),
            Some(M1Error::Unauthorized { .. })
        )
    }
}
