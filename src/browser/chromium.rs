//! Chrome DevTools Protocol driver.
//!
//! Launches Chrome/Chromium through chromiumoxide with the anti-automation
//! flags the M1 dashboard tolerates, and pauses every request matching the
//! configured URL pattern through the Fetch domain so its headers and body
//! can be recorded before it continues.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, EventRequestPaused, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network;
use chromiumoxide::element::Element;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{
    BrowserCookie, BrowserDriver, BrowserLauncher, CapturedRequest, Selector, WaitCondition,
};
use crate::config::BrowserSettings;
use crate::error::M1Error;

const ELEMENT_POLL: Duration = Duration::from_millis(100);

/// Bit 1: element has a rendered box and is not hidden. Bit 2: not disabled.
const ELEMENT_STATE_JS: &str = "function() {
    const rect = this.getBoundingClientRect();
    const style = window.getComputedStyle(this);
    const visible = rect.width > 0 && rect.height > 0
        && style.visibility !== 'hidden' && style.display !== 'none';
    return (visible ? 1 : 0) | (this.disabled ? 0 : 2);
}";

/// Launches a Chrome instance configured from [`BrowserSettings`].
pub struct ChromiumLauncher {
    settings: BrowserSettings,
}

impl ChromiumLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserDriver>> {
        Ok(Arc::new(ChromiumDriver::launch(&self.settings).await?))
    }
}

/// A single Chrome tab with request capture enabled.
pub struct ChromiumDriver {
    browser: Mutex<Browser>,
    page: Page,
    requests: Arc<StdMutex<Vec<CapturedRequest>>>,
    implicit_wait: Duration,
    handler_task: JoinHandle<()>,
    intercept_task: JoinHandle<()>,
}

impl ChromiumDriver {
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        let chrome_path = match &settings.chrome_path {
            Some(path) => path.display().to_string(),
            None => find_chrome().context(
                "Chrome/Chromium not found. Install Chrome or set [browser].chrome_path.",
            )?,
        };

        let (width, height) = settings.window_size;
        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(width, height)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg(format!("--user-agent={}", settings.user_agent));
        if !settings.headless {
            builder = builder.with_head().viewport(None);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to configure browser: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;
        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open browser tab")?;

        let requests = Arc::new(StdMutex::new(Vec::new()));
        let intercept_task =
            start_request_capture(&page, &settings.intercept_pattern, requests.clone()).await?;

        Ok(Self {
            browser: Mutex::new(browser),
            page,
            requests,
            implicit_wait: settings.implicit_wait,
            handler_task,
            intercept_task,
        })
    }

    async fn find(&self, selector: &Selector) -> Result<Element> {
        let found = match selector {
            Selector::Css(css) => self.page.find_element(css.as_str()).await,
            Selector::XPath(xpath) => self.page.find_xpath(xpath.as_str()).await,
        };
        Ok(found?)
    }

    /// Find an element, polling up to the implicit wait.
    async fn find_with_implicit_wait(&self, selector: &Selector) -> Result<Element> {
        let deadline = Instant::now() + self.implicit_wait;
        loop {
            match self.find(selector).await {
                Ok(element) => return Ok(element),
                Err(e) if Instant::now() >= deadline => {
                    return Err(e).with_context(|| format!("Element not found: {selector}"));
                }
                Err(_) => tokio::time::sleep(ELEMENT_POLL).await,
            }
        }
    }

    async fn satisfies(&self, element: &Element, condition: WaitCondition) -> Result<bool> {
        let returns = element.call_js_fn(ELEMENT_STATE_JS, false).await?;
        let bits = returns
            .result
            .value
            .as_ref()
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let visible = bits & 1 != 0;
        let enabled = bits & 2 != 0;
        Ok(match condition {
            WaitCondition::Visible => visible,
            WaitCondition::Clickable => visible && enabled,
        })
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        debug!(url, "Navigating");
        self.page
            .goto(url)
            .await
            .with_context(|| format!("Failed to navigate to {url}"))?;
        Ok(())
    }

    async fn wait_for(
        &self,
        selector: &Selector,
        condition: WaitCondition,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(element) = self.find(selector).await {
                if self.satisfies(&element, condition).await.unwrap_or(false) {
                    return Ok(());
                }
            }

            if Instant::now() >= deadline {
                return Err(M1Error::NavigationTimeout {
                    selector: selector.to_string(),
                    condition,
                    timeout,
                }
                .into());
            }
            tokio::time::sleep(ELEMENT_POLL).await;
        }
    }

    async fn click(&self, selector: &Selector) -> Result<()> {
        let element = self.find_with_implicit_wait(selector).await?;
        element
            .click()
            .await
            .with_context(|| format!("Failed to click {selector}"))?;
        Ok(())
    }

    async fn type_text(&self, selector: &Selector, text: &str) -> Result<()> {
        let element = self.find_with_implicit_wait(selector).await?;
        element
            .click()
            .await
            .with_context(|| format!("Failed to focus {selector}"))?
            .type_str(text)
            .await
            .with_context(|| format!("Failed to type into {selector}"))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<Option<String>> {
        Ok(self.page.url().await?)
    }

    async fn requests_log(&self) -> Vec<CapturedRequest> {
        self.requests
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    async fn clear_requests_log(&self) {
        if let Ok(mut log) = self.requests.lock() {
            log.clear();
        }
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .context("Failed to read browser cookies")?;

        Ok(cookies
            .into_iter()
            .map(|c| BrowserCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect())
    }

    async fn shutdown(&self) -> Result<()> {
        self.intercept_task.abort();
        let result = self.browser.lock().await.close().await;
        self.handler_task.abort();
        result.context("Failed to close browser")?;
        Ok(())
    }
}

/// Pause requests matching `pattern`, record them, and let them continue.
async fn start_request_capture(
    page: &Page,
    pattern: &str,
    log: Arc<StdMutex<Vec<CapturedRequest>>>,
) -> Result<JoinHandle<()>> {
    let patterns = vec![RequestPattern {
        url_pattern: Some(pattern.to_string()),
        resource_type: None,
        request_stage: Some(RequestStage::Request),
    }];

    page.execute(fetch::EnableParams {
        patterns: Some(patterns),
        handle_auth_requests: None,
    })
    .await
    .context("Failed to enable request interception")?;

    let mut request_events = page.event_listener::<EventRequestPaused>().await?;
    let page = page.clone();

    Ok(tokio::spawn(async move {
        while let Some(event) = request_events.next().await {
            let mut captured = capture(&event);
            if captured.body.is_none() && event.request.has_post_data == Some(true) {
                captured.body = fetch_post_data(&page, &event).await;
            }
            trace!(url = %captured.url, method = %captured.method, "Captured request");
            if let Ok(mut log) = log.lock() {
                log.push(captured);
            }

            let _ = page
                .execute(fetch::ContinueRequestParams {
                    request_id: event.request_id.clone(),
                    url: None,
                    method: None,
                    post_data: None,
                    headers: None,
                    intercept_response: None,
                })
                .await;
        }
    }))
}

fn capture(event: &EventRequestPaused) -> CapturedRequest {
    let mut headers = HashMap::new();
    if let Some(obj) = event.request.headers.inner().as_object() {
        for (name, value) in obj {
            if let Some(value) = value.as_str() {
                headers.insert(name.to_ascii_lowercase(), value.to_string());
            }
        }
    }

    CapturedRequest {
        url: event.request.url.clone(),
        method: event.request.method.clone(),
        headers,
        body: inline_post_data(&event.request),
    }
}

/// Concatenate the request's base64 body entries.
fn inline_post_data(request: &network::Request) -> Option<String> {
    let entries = request.post_data_entries.as_ref()?;
    let mut bytes = Vec::new();
    for entry in entries {
        let Some(chunk) = &entry.bytes else {
            continue;
        };
        let encoded: &str = chunk.as_ref();
        match STANDARD.decode(encoded) {
            Ok(decoded) => bytes.extend(decoded),
            Err(e) => {
                debug!(url = %request.url, error = %e, "Undecodable request body entry");
                return None;
            }
        }
    }
    if bytes.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Chrome leaves large bodies out of the paused event; ask for them.
async fn fetch_post_data(page: &Page, event: &EventRequestPaused) -> Option<String> {
    let request_id = event
        .network_id
        .clone()
        .unwrap_or_else(|| network::RequestId::new(event.request_id.inner().clone()));
    match page
        .execute(network::GetRequestPostDataParams::new(request_id))
        .await
    {
        Ok(response) => Some(response.result.post_data),
        Err(e) => {
            debug!(url = %event.request.url, error = %e, "Request body unavailable");
            None
        }
    }
}

/// Find Chrome/Chromium executable.
fn find_chrome() -> Option<String> {
    for binary in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(output) = std::process::Command::new("which").arg(binary).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(path);
                }
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/run/current-system/sw/bin/google-chrome",
        "/run/current-system/sw/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    candidates
        .into_iter()
        .find(|candidate| std::path::Path::new(candidate).exists())
        .map(str::to_string)
}
