//! Dashboard login and token harvesting.
//!
//! The flow: fill the login form, answer the 2FA prompt with a TOTP code,
//! wait for the authenticated landing URL, then click through to the
//! account's activity view so the page fires an authorized API call. The
//! bearer token and account id are scraped from that call.

mod token_source;

pub use token_source::{AuthTokenSource, GraphqlAccountTokenSource};

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::browser::{wait_for_url, BrowserDriver, WaitCondition};
use crate::clock::{Clock, SystemClock};
use crate::config::LoginConfig;
use crate::credentials::Credentials;
use crate::error::M1Error;
use crate::totp::OtpGenerator;

/// Credentials for the GraphQL API, harvested from a logged-in browser.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub account_id: String,
    /// Sent verbatim as the `authorization` header.
    pub bearer_token: String,
}

impl AuthContext {
    pub fn new(account_id: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            bearer_token: bearer_token.into(),
        }
    }

    /// Enough of the token to tell sessions apart in logs.
    pub fn token_preview(&self) -> String {
        let preview: String = self.bearer_token.chars().take(12).collect();
        format!("{preview}...")
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("account_id", &self.account_id)
            .field("bearer_token", &self.token_preview())
            .finish()
    }
}

/// Drives the login UI and caches the resulting [`AuthContext`].
///
/// Once a login succeeds, later calls return the cached context without
/// touching the browser until [`Authenticator::invalidate`] is called.
pub struct Authenticator {
    config: LoginConfig,
    token_source: Box<dyn AuthTokenSource>,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<AuthContext>>,
}

impl Authenticator {
    pub fn new(config: LoginConfig) -> Self {
        Self {
            config,
            token_source: Box::new(GraphqlAccountTokenSource::default()),
            clock: Arc::new(SystemClock),
            cached: Mutex::new(None),
        }
    }

    pub fn with_token_source(mut self, token_source: Box<dyn AuthTokenSource>) -> Self {
        self.token_source = token_source;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn cached(&self) -> Option<AuthContext> {
        self.cached.lock().await.clone()
    }

    /// Adopt a context obtained elsewhere (e.g. a saved session).
    pub async fn seed(&self, auth: AuthContext) {
        *self.cached.lock().await = Some(auth);
    }

    /// Forget the cached context so the next [`Authenticator::login`] runs the UI flow.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    /// Log in through `driver`, or return the cached context.
    pub async fn login(
        &self,
        creds: &Credentials,
        driver: &dyn BrowserDriver,
    ) -> Result<AuthContext> {
        // Held for the whole flow so a concurrent caller waits for this login.
        let mut cached = self.cached.lock().await;
        if let Some(auth) = cached.as_ref() {
            debug!(account_id = %auth.account_id, "Using cached auth context");
            return Ok(auth.clone());
        }

        let auth = self.run_flow(creds, driver).await?;
        info!(
            account_id = %auth.account_id,
            token = %auth.token_preview(),
            "Captured M1 session"
        );
        *cached = Some(auth.clone());
        Ok(auth)
    }

    async fn run_flow(&self, creds: &Credentials, driver: &dyn BrowserDriver) -> Result<AuthContext> {
        let otp = OtpGenerator::from_base32(&creds.otp_seed)?;
        let selectors = &self.config.selectors;

        driver.clear_requests_log().await;

        info!(url = %self.config.url, "Opening login page");
        driver.navigate(&self.config.url).await?;
        driver
            .wait_for(
                &selectors.username,
                WaitCondition::Visible,
                self.config.element_timeout,
            )
            .await?;

        driver
            .type_text(&selectors.username, &creds.username)
            .await?;
        driver
            .type_text(&selectors.password, creds.password.expose_secret())
            .await?;
        driver.click(&selectors.submit).await?;

        // From here on a wrong password, a rejected code, and a changed page
        // all look the same.
        self.submit_otp(driver, &otp)
            .await
            .map_err(|e| self.authentication_failed(e))?;

        match wait_for_url(
            driver,
            &self.config.landing_url,
            self.config.landing_timeout,
            self.config.poll_interval,
        )
        .await?
        {
            Ok(url) => debug!(%url, "Reached landing page"),
            Err(last_url) => {
                return Err(M1Error::AuthenticationFailed {
                    expected: self.config.landing_url.clone(),
                    last_url: last_url.unwrap_or_default(),
                }
                .into());
            }
        }

        self.trigger_account_request(driver).await?;
        self.capture(driver).await
    }

    async fn submit_otp(&self, driver: &dyn BrowserDriver, otp: &OtpGenerator) -> Result<()> {
        let selectors = &self.config.selectors;
        driver
            .wait_for(
                &selectors.otp_input,
                WaitCondition::Visible,
                self.config.element_timeout,
            )
            .await?;

        let code = otp.current(self.clock.as_ref());
        driver.type_text(&selectors.otp_input, &code).await?;
        driver
            .wait_for(
                &selectors.otp_submit,
                WaitCondition::Clickable,
                self.config.element_timeout,
            )
            .await?;
        driver.click(&selectors.otp_submit).await?;
        Ok(())
    }

    fn authentication_failed(&self, cause: anyhow::Error) -> anyhow::Error {
        match cause.downcast_ref::<M1Error>() {
            Some(M1Error::NavigationTimeout { selector, .. }) => M1Error::AuthenticationFailed {
                expected: self.config.landing_url.clone(),
                last_url: format!("(2FA step: {selector} never appeared)"),
            }
            .into(),
            _ => cause,
        }
    }

    /// Click through to a view that makes the page call the API for the account.
    async fn trigger_account_request(&self, driver: &dyn BrowserDriver) -> Result<()> {
        for selector in &self.config.selectors.navigation {
            debug!(%selector, "Navigating");
            driver
                .wait_for(selector, WaitCondition::Clickable, self.config.element_timeout)
                .await?;
            driver
                .click(selector)
                .await
                .with_context(|| format!("Post-login navigation failed at {selector}"))?;
        }
        Ok(())
    }

    async fn capture(&self, driver: &dyn BrowserDriver) -> Result<AuthContext> {
        let deadline = Instant::now() + self.config.capture_timeout;
        loop {
            let requests = driver.requests_log().await;
            if let Some(auth) = self.token_source.extract(&requests) {
                return Ok(auth);
            }

            if Instant::now() >= deadline {
                return Err(M1Error::TokenExtractionFailed {
                    observed: requests.len(),
                }
                .into());
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
