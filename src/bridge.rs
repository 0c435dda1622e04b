//! Moves an authenticated browser session into a plain HTTP client.
//!
//! After login, API calls go straight through `reqwest`. The browser's cookies
//! are copied into a cookie jar so those calls look like they came from the
//! same session.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::cookie::Jar;
use reqwest::{Client, Url};
use tracing::{debug, warn};

use crate::browser::{BrowserCookie, BrowserDriver};
use crate::config::{ApiConfig, BrowserSettings};

pub struct SessionBridge {
    user_agent: String,
    timeout: Duration,
}

/// An HTTP client carrying a browser session, with the cookies it was built
/// from so they can be saved.
pub struct BridgedSession {
    pub client: Client,
    pub cookies: Vec<BrowserCookie>,
    pub jar: Arc<Jar>,
}

impl SessionBridge {
    pub fn new(browser: &BrowserSettings, api: &ApiConfig) -> Self {
        Self {
            user_agent: browser.user_agent.clone(),
            timeout: api.request_timeout,
        }
    }

    /// Read the browser's current cookies and build a client around them.
    pub async fn bridge(&self, driver: &dyn BrowserDriver) -> Result<BridgedSession> {
        let cookies = driver
            .cookies()
            .await
            .context("Failed to read browser cookies")?;
        debug!(count = cookies.len(), "Copying browser cookies");

        let jar = Arc::new(cookie_jar(&cookies));
        let client = self.client_with_jar(jar.clone())?;
        Ok(BridgedSession {
            client,
            cookies,
            jar,
        })
    }

    /// Build a client from already-captured cookies (e.g. a saved session).
    pub fn client_from_cookies(&self, cookies: &[BrowserCookie]) -> Result<Client> {
        self.client_with_jar(Arc::new(cookie_jar(cookies)))
    }

    fn client_with_jar(&self, jar: Arc<Jar>) -> Result<Client> {
        Client::builder()
            .cookie_provider(jar)
            .user_agent(&self.user_agent)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .timeout(self.timeout)
            .build()
            .context("Failed to create HTTP client")
    }
}

/// Load browser cookies into a `reqwest` jar, keeping their domain scoping.
pub fn cookie_jar(cookies: &[BrowserCookie]) -> Jar {
    let jar = Jar::default();
    for cookie in cookies {
        match cookie_origin(cookie) {
            Some(url) => jar.add_cookie_str(&set_cookie_line(cookie), &url),
            None => warn!(name = %cookie.name, domain = %cookie.domain, "Skipping cookie with unusable domain"),
        }
    }
    jar
}

/// A URL the cookie could have been set from.
fn cookie_origin(cookie: &BrowserCookie) -> Option<Url> {
    let host = cookie.domain.trim_start_matches('.');
    if host.is_empty() {
        return None;
    }
    let path = if cookie.path.starts_with('/') {
        cookie.path.as_str()
    } else {
        "/"
    };
    Url::parse(&format!("https://{host}{path}")).ok()
}

/// Render the cookie as a `Set-Cookie` value. Only browser cookies with a
/// leading-dot domain were domain cookies; the rest stay host-only.
fn set_cookie_line(cookie: &BrowserCookie) -> String {
    let mut line = format!("{}={}; Path={}", cookie.name, cookie.value, cookie.path);
    if cookie.domain.starts_with('.') {
        line.push_str(&format!("; Domain={}", cookie.domain.trim_start_matches('.')));
    }
    if cookie.secure {
        line.push_str("; Secure");
    }
    if cookie.http_only {
        line.push_str("; HttpOnly");
    }
    line
}
