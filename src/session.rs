//! End-to-end fetch orchestration.
//!
//! [`M1Session`] ties the pieces together: credentials, the shared browser,
//! login, the cookie bridge, and the activity walk. It also owns the
//! process-lifetime state (the browser handle and the current API session)
//! and keeps saved sessions on disk so most runs never open a browser.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{
    effective_page_size, ActivityFetcher, ActivityFilters, ActivityNode, DateRange, M1Client,
};
use crate::auth::{AuthContext, Authenticator};
use crate::bridge::SessionBridge;
use crate::browser::{BrowserLauncher, BrowserManager};
use crate::clock::{Clock, SystemClock};
use crate::config::{ApiConfig, ResolvedConfig, SessionConfig};
use crate::credentials::{CredentialStore, Credentials, SessionCache, SessionData};
use crate::error::M1Error;
use crate::pipe::FetchToggles;
use crate::totp::OtpGenerator;

/// An authenticated API session.
#[derive(Clone)]
struct ActiveSession {
    auth: AuthContext,
    client: M1Client,
}

pub struct M1Session {
    api: ApiConfig,
    session_config: SessionConfig,
    store: Box<dyn CredentialStore>,
    browser: BrowserManager,
    authenticator: Authenticator,
    bridge: SessionBridge,
    sessions: Option<SessionCache>,
    clock: Arc<dyn Clock>,
    active: Mutex<Option<ActiveSession>>,
}

impl M1Session {
    pub fn new(
        config: &ResolvedConfig,
        store: Box<dyn CredentialStore>,
        launcher: Box<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            api: config.api.clone(),
            session_config: config.session.clone(),
            store,
            browser: BrowserManager::new(launcher),
            authenticator: Authenticator::new(config.login.clone()),
            bridge: SessionBridge::new(&config.browser, &config.api),
            sessions: None,
            clock: Arc::new(SystemClock),
            active: Mutex::new(None),
        }
    }

    /// Build a session that drives a real Chrome and honors `[session]`.
    #[cfg(feature = "browser")]
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        let store = config.credentials.build(&config.data_dir);
        let launcher = crate::browser::chromium::ChromiumLauncher::new(config.browser.clone());
        let session = Self::new(config, store, Box::new(launcher));

        if !config.session.persist {
            return Ok(session);
        }
        let cache = SessionCache::with_path(config.session_cache_dir()?)?;
        Ok(session.with_session_cache(cache))
    }

    pub fn with_session_cache(mut self, cache: SessionCache) -> Self {
        self.sessions = Some(cache);
        self
    }

    /// Use `clock` for OTP codes and session ages.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.authenticator = self.authenticator.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    /// Validate and store credentials.
    pub async fn setup(&self, credentials: &Credentials) -> Result<()> {
        if credentials.username.trim().is_empty() {
            anyhow::bail!("Username is empty");
        }
        OtpGenerator::from_base32(&credentials.otp_seed)
            .context("The 2FA seed must be the base32 secret from your authenticator enrollment")?;
        credentials.save(self.store.as_ref()).await?;
        info!(username = %credentials.username, "Saved M1 credentials");
        Ok(())
    }

    pub async fn credentials(&self) -> Result<Credentials> {
        Credentials::load(self.store.as_ref())
            .await?
            .context("No M1 credentials found; run `m1sync setup` first")
    }

    /// Make sure an API session exists and return its auth context.
    pub async fn login(&self) -> Result<AuthContext> {
        let credentials = self.credentials().await?;
        Ok(self.connect(&credentials).await?.auth)
    }

    /// Fetch every activity entry matching `toggles` within `range`.
    ///
    /// `chunksize` is the page size; missing or non-positive means the
    /// configured default. A rejected session is replaced by a fresh login
    /// once, and the walk restarts from the first page.
    pub async fn fetch(
        &self,
        toggles: &FetchToggles,
        range: DateRange,
        chunksize: Option<i64>,
    ) -> Result<Vec<ActivityNode>> {
        let filters = toggles.to_filters(range);
        if filters.categories.is_empty() {
            info!("Every activity category is disabled; nothing to fetch");
            return Ok(Vec::new());
        }
        let page_size = match chunksize {
            Some(_) => effective_page_size(chunksize),
            None => self.api.page_size,
        };

        let credentials = self.credentials().await?;
        let session = self.connect(&credentials).await?;

        match self.walk(&session, &filters, page_size).await {
            Err(e) if M1Error::is_unauthorized(&e) => {
                warn!(error = %e, "M1 session rejected; logging in again");
                self.forget(&credentials.username).await;
                let session = self.connect(&credentials).await?;
                self.walk(&session, &filters, page_size).await
            }
            result => result,
        }
    }

    /// Drop the saved and in-memory session.
    pub async fn logout(&self) -> Result<()> {
        *self.active.lock().await = None;
        self.authenticator.invalidate().await;

        let Some(cache) = &self.sessions else {
            return Ok(());
        };
        match Credentials::load(self.store.as_ref()).await? {
            Some(credentials) => {
                cache.delete(&credentials.username)?;
                info!(username = %credentials.username, "Removed saved session");
            }
            None => debug!("No credentials stored; no saved session to remove"),
        }
        Ok(())
    }

    /// Close the browser if one was started.
    pub async fn shutdown(&self) {
        self.browser.shutdown().await;
    }

    async fn walk(
        &self,
        session: &ActiveSession,
        filters: &ActivityFilters,
        page_size: u32,
    ) -> Result<Vec<ActivityNode>> {
        ActivityFetcher::new(session.client.clone(), page_size)
            .fetch_activities(&session.auth, filters)
            .await
    }

    async fn connect(&self, credentials: &Credentials) -> Result<ActiveSession> {
        let mut active = self.active.lock().await;
        if let Some(session) = active.as_ref() {
            return Ok(session.clone());
        }

        let session = match self.restore(&credentials.username).await? {
            Some(session) => session,
            None => self.browser_login(credentials).await?,
        };
        *active = Some(session.clone());
        Ok(session)
    }

    /// Load a saved session that is still within `max_age`.
    async fn restore(&self, username: &str) -> Result<Option<ActiveSession>> {
        let Some(cache) = &self.sessions else {
            return Ok(None);
        };
        let saved = match cache.get(username) {
            Ok(saved) => saved,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable saved session");
                None
            }
        };
        let Some(saved) = saved else {
            return Ok(None);
        };
        if !saved.is_fresh(self.clock.now(), self.session_config.max_age) {
            debug!("Saved session is stale");
            return Ok(None);
        }
        let Some(auth) = saved.auth_context() else {
            return Ok(None);
        };

        let http = self.bridge.client_from_cookies(&saved.cookies)?;
        info!(account_id = %auth.account_id, "Restored saved M1 session");
        self.authenticator.seed(auth.clone()).await;
        Ok(Some(ActiveSession {
            auth,
            client: M1Client::new(http, &self.api),
        }))
    }

    async fn browser_login(&self, credentials: &Credentials) -> Result<ActiveSession> {
        let driver = self.browser.acquire().await?;
        let auth = self
            .authenticator
            .login(credentials, driver.as_ref())
            .await?;

        let bridged = self.bridge.bridge(driver.as_ref()).await?;

        if let Some(cache) = &self.sessions {
            let saved = SessionData::capture(&auth, bridged.cookies, self.clock.now());
            if let Err(e) = cache.set(&credentials.username, &saved) {
                warn!(error = %e, "Failed to save session");
            }
        }

        Ok(ActiveSession {
            auth,
            client: M1Client::new(bridged.client, &self.api),
        })
    }

    /// Forget every trace of the current session so the next connect logs in
    /// from scratch in a fresh browser.
    async fn forget(&self, username: &str) {
        *self.active.lock().await = None;
        self.authenticator.invalidate().await;
        if let Some(cache) = &self.sessions {
            if let Err(e) = cache.delete(username) {
                warn!(error = %e, "Failed to delete saved session");
            }
        }
        self.browser.shutdown().await;
    }
}
