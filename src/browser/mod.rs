//! Browser session management.
//!
//! The login flow only needs a handful of primitives from a browser: load a
//! page, wait for an element, click, type, read the current URL, and inspect
//! the outgoing API requests the page made. [`BrowserDriver`] captures exactly
//! that surface so the authenticator can be exercised without Chrome.
//!
//! [`BrowserManager`] owns the single long-lived driver for a process and
//! hands out the same instance on every [`BrowserManager::acquire`].

#[cfg(feature = "browser")]
pub mod chromium;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How an element on the page is located.
///
/// Selectors are configuration data. In config files they are plain strings:
/// an explicit `xpath:` or `css:` prefix wins, otherwise a leading `/` or `(`
/// means XPath and anything else is a CSS selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Selector {
    Css(String),
    XPath(String),
}

impl Selector {
    pub fn css(expr: impl Into<String>) -> Self {
        Self::Css(expr.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }

    /// The raw selector expression without its kind.
    pub fn expression(&self) -> &str {
        match self {
            Selector::Css(expr) | Selector::XPath(expr) => expr,
        }
    }
}

impl FromStr for Selector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let selector = if let Some(expr) = s.strip_prefix("xpath:") {
            Selector::XPath(expr.trim().to_string())
        } else if let Some(expr) = s.strip_prefix("css:") {
            Selector::Css(expr.trim().to_string())
        } else if s.starts_with('/') || s.starts_with('(') {
            Selector::XPath(s.to_string())
        } else {
            Selector::Css(s.to_string())
        };

        if selector.expression().is_empty() {
            anyhow::bail!("Selector must not be empty");
        }
        Ok(selector)
    }
}

impl TryFrom<String> for Selector {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Selector> for String {
    fn from(selector: Selector) -> Self {
        selector.to_string()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(expr) => write!(f, "css:{expr}"),
            Selector::XPath(expr) => write!(f, "xpath:{expr}"),
        }
    }
}

/// Element state a wait can block on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    /// Rendered with a non-empty box and not hidden.
    Visible,
    /// Visible and not disabled.
    Clickable,
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitCondition::Visible => f.write_str("visible"),
            WaitCondition::Clickable => f.write_str("clickable"),
        }
    }
}

/// An outgoing request observed by the browser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedRequest {
    pub url: String,
    pub method: String,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl CapturedRequest {
    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// A cookie copied out of the browser context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

/// Primitives the login flow needs from a browser.
///
/// Element operations wait implicitly (for a short, driver-configured bound)
/// for the element to exist. None of them retry on failure; a timed out
/// [`BrowserDriver::wait_for`] surfaces as
/// [`M1Error::NavigationTimeout`](crate::error::M1Error::NavigationTimeout).
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Load `url` in the current tab.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Block until the element matching `selector` satisfies `condition`.
    async fn wait_for(
        &self,
        selector: &Selector,
        condition: WaitCondition,
        timeout: Duration,
    ) -> Result<()>;

    async fn click(&self, selector: &Selector) -> Result<()>;

    async fn type_text(&self, selector: &Selector, text: &str) -> Result<()>;

    async fn current_url(&self) -> Result<Option<String>>;

    /// Requests observed so far, in the order they were issued.
    async fn requests_log(&self) -> Vec<CapturedRequest>;

    async fn clear_requests_log(&self);

    /// Cookies visible to the current page.
    async fn cookies(&self) -> Result<Vec<BrowserCookie>>;

    async fn shutdown(&self) -> Result<()>;
}

/// Poll the driver until its URL starts with `prefix`.
///
/// Returns the matching URL, or `None` with the last URL seen on timeout.
pub async fn wait_for_url(
    driver: &dyn BrowserDriver,
    prefix: &str,
    timeout: Duration,
    poll: Duration,
) -> Result<std::result::Result<String, Option<String>>> {
    let deadline = Instant::now() + timeout;
    let mut last = None;

    loop {
        last = driver.current_url().await?.or(last);
        if let Some(url) = last.as_deref() {
            if url.starts_with(prefix) {
                return Ok(Ok(url.to_string()));
            }
        }

        if Instant::now() >= deadline {
            return Ok(Err(last));
        }
        tokio::time::sleep(poll).await;
    }
}

/// Something that can start a fresh browser.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BrowserDriver>>;
}

/// Owns the process-wide browser and creates it on first use.
pub struct BrowserManager {
    launcher: Box<dyn BrowserLauncher>,
    handle: Mutex<Option<Arc<dyn BrowserDriver>>>,
}

impl BrowserManager {
    pub fn new(launcher: Box<dyn BrowserLauncher>) -> Self {
        Self {
            launcher,
            handle: Mutex::new(None),
        }
    }

    /// Return the running browser, launching one if none exists yet.
    pub async fn acquire(&self) -> Result<Arc<dyn BrowserDriver>> {
        let mut handle = self.handle.lock().await;
        if let Some(driver) = handle.as_ref() {
            debug!("Reusing running browser");
            return Ok(driver.clone());
        }

        info!("Launching browser");
        let driver = self.launcher.launch().await?;
        *handle = Some(driver.clone());
        Ok(driver)
    }

    pub async fn is_running(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Close the browser if one is running. Failures are logged and dropped.
    pub async fn shutdown(&self) {
        let driver = self.handle.lock().await.take();
        if let Some(driver) = driver {
            if let Err(e) = driver.shutdown().await {
                warn!(error = %e, "Browser shutdown failed");
            }
        }
    }
}
