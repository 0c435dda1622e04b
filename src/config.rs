use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::browser::Selector;
use crate::credentials::CredentialConfig;
use crate::duration::deserialize_duration;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

fn xpath(expr: &str) -> Selector {
    Selector::xpath(expr)
}

/// Browser launch settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Run without a visible window.
    pub headless: bool,

    /// Explicit Chrome/Chromium executable. Auto-detected when unset.
    pub chrome_path: Option<PathBuf>,

    /// User agent presented to the dashboard.
    pub user_agent: String,

    /// How long element operations wait for the element to exist.
    #[serde(deserialize_with = "deserialize_duration")]
    pub implicit_wait: Duration,

    /// Fetch-domain URL pattern for requests to record (e.g. `*lens.m1.com*`).
    pub intercept_pattern: String,

    pub window_size: (u32, u32),
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            implicit_wait: Duration::from_millis(500),
            intercept_pattern: "*lens.m1.com*".to_string(),
            window_size: (1920, 1080),
        }
    }
}

/// Where the login flow aims. These track the dashboard's markup and are
/// expected to need updating when the site changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoginSelectors {
    pub username: Selector,
    pub password: Selector,
    pub submit: Selector,
    pub otp_input: Selector,
    pub otp_submit: Selector,

    /// Clicked in order after landing. The last click must make the page
    /// issue an authorized API call for the account.
    pub navigation: Vec<Selector>,
}

impl Default for LoginSelectors {
    fn default() -> Self {
        Self {
            username: xpath("/html/body/div[2]/div/div/div[2]/div[2]/div[1]/div/form/div[2]/div/div[1]/div/input"),
            password: xpath("/html/body/div[2]/div/div/div[2]/div[2]/div[1]/div/form/div[2]/div/div[2]/div/input"),
            submit: xpath("/html/body/div[2]/div/div/div[2]/div[2]/div[1]/div/form/div[4]/div/button"),
            otp_input: xpath("/html/body/div[2]/div/div/div[2]/div[2]/div/div/form/div/div/input"),
            otp_submit: xpath("/html/body/div[2]/div/div/div[2]/div[2]/div/div/form/button"),
            navigation: vec![
                xpath("//a[contains(@href, '/d/invest')]"),
                xpath("(//a[contains(@href, '/d/invest/portfolio/')])[1]"),
                xpath("//a[contains(@href, '/d/invest/activity')]"),
            ],
        }
    }
}

/// Login flow settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub url: String,

    /// Prefix of the URL that marks a completed login.
    pub landing_url: String,

    /// Bound for each element wait.
    #[serde(deserialize_with = "deserialize_duration")]
    pub element_timeout: Duration,

    /// Bound for reaching `landing_url` after the one-time code is submitted.
    #[serde(deserialize_with = "deserialize_duration")]
    pub landing_timeout: Duration,

    /// Bound for the authorized API call to show up after navigation.
    #[serde(deserialize_with = "deserialize_duration")]
    pub capture_timeout: Duration,

    #[serde(deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,

    pub selectors: LoginSelectors,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            url: "https://dashboard.m1.com/login".to_string(),
            landing_url: "https://dashboard.m1.com/d/".to_string(),
            element_timeout: Duration::from_secs(5),
            landing_timeout: Duration::from_secs(30),
            capture_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(250),
            selectors: LoginSelectors::default(),
        }
    }
}

/// GraphQL API settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub graphql_url: String,

    /// Page size used when the caller does not pass one.
    pub page_size: u32,

    /// Attempts per page before giving up. `0` retries forever.
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each further attempt.
    #[serde(deserialize_with = "deserialize_duration")]
    pub retry_delay: Duration,

    #[serde(deserialize_with = "deserialize_duration")]
    pub max_retry_delay: Duration,

    #[serde(deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            graphql_url: "https://lens.m1.com/graphql".to_string(),
            page_size: crate::api::DEFAULT_PAGE_SIZE,
            max_attempts: 5,
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Cross-process session reuse.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Save the token and cookies after login and reuse them in later runs.
    pub persist: bool,

    /// Defaults to `<cache dir>/m1sync/sessions`.
    pub cache_dir: Option<PathBuf>,

    /// Saved sessions older than this are ignored.
    #[serde(deserialize_with = "deserialize_duration")]
    pub max_age: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persist: true,
            cache_dir: None,
            max_age: Duration::from_secs(12 * 60 * 60),
        }
    }
}

/// Application configuration as written in `m1sync.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory for credentials and other local state. If relative, resolved
    /// from the config file location. Defaults to the config file's directory.
    pub data_dir: Option<PathBuf>,

    pub credentials: CredentialConfig,
    pub browser: BrowserSettings,
    pub login: LoginConfig,
    pub api: ApiConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Resolve the data directory path against the config file's directory.
    pub fn resolve_data_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.data_dir {
            Some(data_dir) if data_dir.is_absolute() => data_dir.clone(),
            Some(data_dir) => config_dir.join(data_dir),
            None => config_dir.to_path_buf(),
        }
    }
}

/// Loaded configuration with resolved paths.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub data_dir: PathBuf,
    pub credentials: CredentialConfig,
    pub browser: BrowserSettings,
    pub login: LoginConfig,
    pub api: ApiConfig,
    pub session: SessionConfig,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./m1sync.toml` if it exists in the current directory
/// 2. `<config dir>/m1sync/m1sync.toml`
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("m1sync.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("m1sync").join("m1sync.toml");
    }

    local_config
}

impl ResolvedConfig {
    /// Resolve `config` as if it had been read from a file in `config_dir`.
    pub fn from_config(config: Config, config_dir: &Path) -> Self {
        let data_dir = config.resolve_data_dir(config_dir);
        Self {
            data_dir,
            credentials: config.credentials,
            browser: config.browser,
            login: config.login,
            api: config.api,
            session: config.session,
        }
    }

    /// Load and resolve config from a file path.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        Ok(Self::from_config(Config::load(&config_path)?, config_dir))
    }

    /// Load config, falling back to defaults if the file doesn't exist.
    ///
    /// Without a file, the directory the file would live in becomes the data
    /// directory.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            return Self::load(config_path);
        }

        let config_path = if config_path.is_relative() {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(config_path)
        } else {
            config_path.to_path_buf()
        };

        let config_dir = config_path
            .parent()
            .context("Config path has no parent directory")?;

        Ok(Self::from_config(Config::default(), config_dir))
    }

    /// Directory for saved sessions.
    pub fn session_cache_dir(&self) -> Result<PathBuf> {
        match &self.session.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::cache_dir()
                .context("Could not find cache directory")?
                .join("m1sync")
                .join("sessions")),
        }
    }
}
