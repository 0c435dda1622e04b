#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use wiremock::{Match, Request};

use m1sync::browser::{
    BrowserCookie, BrowserDriver, BrowserLauncher, CapturedRequest, Selector, WaitCondition,
};
use m1sync::config::{Config, LoginConfig, ResolvedConfig};
use m1sync::credentials::{CredentialStore, Credentials, MemoryCredentialStore};
use m1sync::error::M1Error;

pub const USERNAME: &str = "investor@example.com";
pub const PASSWORD: &str = "hunter2";
pub const OTP_SEED: &str = "JBSWY3DPEHPK3PXP";
pub const ACCOUNT_ID: &str = "acct-1";

/// Login settings with timeouts short enough for tests.
pub fn fast_login_config() -> LoginConfig {
    LoginConfig {
        element_timeout: Duration::from_millis(200),
        landing_timeout: Duration::from_millis(300),
        capture_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(10),
        ..LoginConfig::default()
    }
}

/// Config pointing the API at `graphql_url` with fast retries and no saved sessions.
pub fn test_config(data_dir: &Path, graphql_url: &str) -> ResolvedConfig {
    let mut config = ResolvedConfig::from_config(Config::default(), data_dir);
    config.login = fast_login_config();
    config.api.graphql_url = graphql_url.to_string();
    config.api.max_attempts = 3;
    config.api.retry_delay = Duration::from_millis(10);
    config.api.max_retry_delay = Duration::from_millis(50);
    config.api.request_timeout = Duration::from_secs(5);
    config.session.persist = false;
    config
}

pub fn credentials() -> Credentials {
    Credentials::new(USERNAME, PASSWORD, OTP_SEED)
}

pub async fn store_with_credentials() -> Result<Box<dyn CredentialStore>> {
    let store = MemoryCredentialStore::new();
    credentials().save(&store).await?;
    Ok(Box::new(store))
}

pub fn trade_node(id: &str) -> Value {
    json!({
        "__typename": "InvestActivityTradeEntry",
        "id": id,
        "title": format!("Trade {id}"),
        "date": "2024-03-01T14:30:00Z",
        "description": null,
        "activityType": "BUY",
        "amount": -100.0,
        "quantity": 0.5,
        "price": 200.0,
        "security": { "symbol": "VTI", "name": "Vanguard Total Stock Market ETF", "cusip": null }
    })
}

pub fn activity_page(nodes: Vec<Value>, has_next: bool, end_cursor: Option<&str>) -> Value {
    let edges: Vec<Value> = nodes.into_iter().map(|node| json!({ "node": node })).collect();
    json!({
        "data": { "node": { "investActivity": { "activity": {
            "pageInfo": { "hasNextPage": has_next, "endCursor": end_cursor },
            "edges": edges
        }}}}
    })
}

/// Matches GraphQL requests by their `after` variable.
pub struct AfterCursor(pub Option<&'static str>);

impl Match for AfterCursor {
    fn matches(&self, request: &Request) -> bool {
        let Ok(body) = request.body_json::<Value>() else {
            return false;
        };
        match self.0 {
            Some(cursor) => body["variables"]["after"] == cursor,
            None => body["variables"]["after"].is_null(),
        }
    }
}

pub fn request_bodies(requests: &[Request]) -> Vec<Value> {
    requests
        .iter()
        .filter_map(|r| r.body_json::<Value>().ok())
        .collect()
}

#[derive(Debug, Default, Clone)]
pub struct BrowserState {
    pub url: Option<String>,
    pub requests: Vec<CapturedRequest>,
    pub navigations: Vec<String>,
    pub typed: Vec<(Selector, String)>,
    pub clicks: Vec<Selector>,
    /// Times the 2FA form was submitted.
    pub logins: usize,
    pub launches: usize,
    pub shutdowns: usize,
}

/// A browser that plays the dashboard's part of the login flow.
///
/// Submitting the 2FA form lands on the dashboard; clicking the last
/// navigation selector makes the "page" issue an authorized API request.
pub struct ScriptedBrowser {
    login: LoginConfig,
    tokens: Mutex<VecDeque<String>>,
    lands: bool,
    emits_token: bool,
    missing: Vec<Selector>,
    cookies: Vec<BrowserCookie>,
    state: Mutex<BrowserState>,
}

impl ScriptedBrowser {
    pub fn new(login: &LoginConfig) -> Self {
        Self {
            login: login.clone(),
            tokens: Mutex::new(VecDeque::from(vec!["Bearer token-1".to_string()])),
            lands: true,
            emits_token: true,
            missing: Vec::new(),
            cookies: vec![BrowserCookie {
                name: "m1_session".to_string(),
                value: "cookie-value".to_string(),
                domain: ".m1.com".to_string(),
                path: "/".to_string(),
                secure: true,
                http_only: true,
            }],
            state: Mutex::new(BrowserState::default()),
        }
    }

    /// Tokens handed out by successive logins; the last one repeats.
    pub fn with_tokens(self, tokens: &[&str]) -> Self {
        *self.tokens.lock().unwrap() = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn never_lands(mut self) -> Self {
        self.lands = false;
        self
    }

    pub fn without_token(mut self) -> Self {
        self.emits_token = false;
        self
    }

    pub fn missing(mut self, selector: Selector) -> Self {
        self.missing.push(selector);
        self
    }

    pub fn state(&self) -> BrowserState {
        self.state.lock().unwrap().clone()
    }

    pub fn typed_into(&self, selector: &Selector) -> Option<String> {
        self.state()
            .typed
            .iter()
            .rev()
            .find(|(s, _)| s == selector)
            .map(|(_, text)| text.clone())
    }

    fn next_token(&self) -> String {
        let mut tokens = self.tokens.lock().unwrap();
        if tokens.len() > 1 {
            tokens.pop_front().unwrap()
        } else {
            tokens.front().cloned().unwrap_or_default()
        }
    }

    fn api_request(&self, token: Option<String>) -> CapturedRequest {
        let mut request = CapturedRequest {
            url: "https://lens.m1.com/graphql".to_string(),
            method: "POST".to_string(),
            body: Some(
                json!({
                    "operationName": "AccountActivity",
                    "variables": { "accountId": ACCOUNT_ID, "first": 10 }
                })
                .to_string(),
            ),
            ..Default::default()
        };
        if let Some(token) = token {
            request.headers.insert("authorization".to_string(), token);
        }
        request
    }
}

#[async_trait]
impl BrowserDriver for ScriptedBrowser {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.url = Some(url.to_string());
        state.navigations.push(url.to_string());
        // Anonymous bootstrap call; carries an account id but no token.
        state.requests.push(self.api_request(None));
        Ok(())
    }

    async fn wait_for(
        &self,
        selector: &Selector,
        condition: WaitCondition,
        timeout: Duration,
    ) -> Result<()> {
        if self.missing.contains(selector) {
            return Err(M1Error::NavigationTimeout {
                selector: selector.to_string(),
                condition,
                timeout,
            }
            .into());
        }
        Ok(())
    }

    async fn click(&self, selector: &Selector) -> Result<()> {
        let token = (self.emits_token && self.login.selectors.navigation.last() == Some(selector))
            .then(|| self.next_token());

        let mut state = self.state.lock().unwrap();
        state.clicks.push(selector.clone());
        if *selector == self.login.selectors.otp_submit {
            state.logins += 1;
            if self.lands {
                state.url = Some(format!("{}home", self.login.landing_url));
            }
        }
        if let Some(token) = token {
            let request = self.api_request(Some(token));
            state.requests.push(request);
        }
        Ok(())
    }

    async fn type_text(&self, selector: &Selector, text: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .typed
            .push((selector.clone(), text.to_string()));
        Ok(())
    }

    async fn current_url(&self) -> Result<Option<String>> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn requests_log(&self) -> Vec<CapturedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    async fn clear_requests_log(&self) {
        self.state.lock().unwrap().requests.clear();
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        Ok(self.cookies.clone())
    }

    async fn shutdown(&self) -> Result<()> {
        self.state.lock().unwrap().shutdowns += 1;
        Ok(())
    }
}

/// Hands out the same scripted browser on every launch.
pub struct ScriptedLauncher {
    browser: Arc<ScriptedBrowser>,
}

impl ScriptedLauncher {
    pub fn new(browser: Arc<ScriptedBrowser>) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserDriver>> {
        self.browser.state.lock().unwrap().launches += 1;
        let driver: Arc<dyn BrowserDriver> = self.browser.clone();
        Ok(driver)
    }
}
