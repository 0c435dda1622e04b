//! GraphQL transport with bounded retry.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::AuthContext;
use crate::config::ApiConfig;
use crate::error::M1Error;

/// How transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Zero retries forever.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(api: &ApiConfig) -> Self {
        Self {
            max_attempts: api.max_attempts,
            base_delay: api.retry_delay,
            max_delay: api.max_retry_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ApiConfig::default())
    }
}

/// Posts GraphQL documents on behalf of an authenticated session.
#[derive(Clone)]
pub struct M1Client {
    http: Client,
    endpoint: String,
    retry: RetryPolicy,
}

/// Failure of a single attempt.
enum Attempt {
    Transient(String),
    Fatal(anyhow::Error),
}

impl M1Client {
    pub fn new(http: Client, api: &ApiConfig) -> Self {
        Self {
            http,
            endpoint: api.graphql_url.clone(),
            retry: RetryPolicy::from_config(api),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST `body` and return the decoded JSON response.
    ///
    /// Transport errors, non-success statuses, and empty bodies are retried.
    /// 401 and 403 fail immediately with [`M1Error::Unauthorized`].
    pub async fn post(&self, auth: &AuthContext, body: &Value) -> Result<Value> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt(auth, body).await {
                Ok(value) => return Ok(value),
                Err(Attempt::Fatal(err)) => return Err(err),
                Err(Attempt::Transient(last_error)) => {
                    if self.retry.exhausted(attempt) {
                        return Err(M1Error::RetriesExhausted {
                            attempts: attempt,
                            last_error,
                        }
                        .into());
                    }
                    let delay = self.retry.delay_for(attempt);
                    warn!(attempt, error = %last_error, ?delay, "Activity request failed; retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(&self, auth: &AuthContext, body: &Value) -> Result<Value, Attempt> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("authorization", &auth.bearer_token)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| Attempt::Transient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Attempt::Fatal(
                M1Error::Unauthorized {
                    status: status.as_u16(),
                }
                .into(),
            ));
        }

        let text = response
            .text()
            .await
            .map_err(|e| Attempt::Transient(format!("Failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(Attempt::Transient(format!(
                "API request failed ({status}): {}",
                truncate(&text, 200)
            )));
        }
        if text.trim().is_empty() {
            return Err(Attempt::Transient("Empty response body".to_string()));
        }

        let value: Value = serde_json::from_str(&text)
            .context("Failed to parse GraphQL response")
            .map_err(|e| Attempt::Transient(format!("{e:#}")))?;
        if is_empty_response(&value) {
            return Err(Attempt::Transient(format!("Empty response: {value}")));
        }

        debug!(status = %status, bytes = text.len(), "Activity response received");
        Ok(value)
    }
}

fn is_empty_response(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
