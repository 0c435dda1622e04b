//! Session cache for storing transient authentication state.
//!
//! Local-only storage for the harvested bearer token, account id, and browser
//! cookies, so a later run can skip the browser while the session is fresh.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::AuthContext;
use crate::browser::BrowserCookie;

/// Session captured from a successful browser login.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default)]
    pub account_id: Option<String>,

    /// Raw `authorization` header value.
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub cookies: Vec<BrowserCookie>,

    /// When the session was captured (Unix timestamp).
    #[serde(default)]
    pub captured_at: Option<i64>,
}

impl SessionData {
    pub fn capture(auth: &AuthContext, cookies: Vec<BrowserCookie>, at: DateTime<Utc>) -> Self {
        Self {
            account_id: Some(auth.account_id.clone()),
            token: Some(auth.bearer_token.clone()),
            cookies,
            captured_at: Some(at.timestamp()),
        }
    }

    /// The auth context, if both halves were saved.
    pub fn auth_context(&self) -> Option<AuthContext> {
        match (&self.account_id, &self.token) {
            (Some(account_id), Some(token)) if !account_id.is_empty() && !token.is_empty() => {
                Some(AuthContext::new(account_id.clone(), token.clone()))
            }
            _ => None,
        }
    }

    /// True if captured no more than `max_age` before `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match self.captured_at {
            Some(captured_at) => {
                let age = now.timestamp() - captured_at;
                age >= 0 && (age as u64) <= max_age.as_secs()
            }
            None => false,
        }
    }
}

/// Cache for session data, stored locally.
pub struct SessionCache {
    cache_dir: PathBuf,
}

impl SessionCache {
    /// Create a session cache at `cache_dir`, creating the directory.
    pub fn with_path(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create session cache dir: {cache_dir:?}"))?;
        Ok(Self { cache_dir })
    }

    /// Keys are usernames (usually email addresses); anything outside
    /// `[A-Za-z0-9._-]` becomes `_` in the file name.
    fn session_file(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.cache_dir.join(format!("{safe}.json"))
    }

    pub fn get(&self, key: &str) -> Result<Option<SessionData>> {
        let path = self.session_file(key);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read session file: {path:?}"))?;

        let session: SessionData = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session file: {path:?}"))?;

        Ok(Some(session))
    }

    pub fn set(&self, key: &str, session: &SessionData) -> Result<()> {
        let path = self.session_file(key);
        let content =
            serde_json::to_string_pretty(session).context("Failed to serialize session")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write session file: {path:?}"))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to restrict session file: {path:?}"))?;
        }

        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let path = self.session_file(key);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete session file: {path:?}"))?;
        }
        Ok(())
    }
}
