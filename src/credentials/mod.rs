//! Credential storage abstraction.
//!
//! The login flow needs three secrets: the dashboard username, the password,
//! and the base32 seed of the account's authenticator app. They are read
//! through a [`CredentialStore`], so where they live is a configuration
//! choice:
//!
//! ```toml
//! [credentials]
//! backend = "file"
//! path = "credentials.toml"
//! ```

mod config;
mod env;
mod file;
mod memory;
mod session;

pub use config::CredentialConfig;
pub use env::EnvCredentialStore;
pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;
pub use session::{SessionCache, SessionData};

use anyhow::Result;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";
pub const OTP_SEED_KEY: &str = "otp";

/// A key-value store for credentials.
///
/// The interface is intentionally simple - just get/set by key name.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Retrieve a credential by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<SecretString>>;

    /// Store a credential.
    ///
    /// Returns `Err` if the backend doesn't support writes.
    async fn set(&self, key: &str, value: SecretString) -> Result<()>;

    /// Check if this store supports writes.
    fn supports_write(&self) -> bool {
        true
    }
}

/// Everything the login flow needs to get past the login and 2FA screens.
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
    /// Base32 TOTP seed.
    pub otp_seed: SecretString,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        otp_seed: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
            otp_seed: SecretString::from(otp_seed.into()),
        }
    }

    /// Read credentials from `store`.
    ///
    /// Returns `Ok(None)` unless all three values are present.
    pub async fn load(store: &dyn CredentialStore) -> Result<Option<Self>> {
        let username = store.get(USERNAME_KEY).await?;
        let password = store.get(PASSWORD_KEY).await?;
        let otp_seed = store.get(OTP_SEED_KEY).await?;

        match (username, password, otp_seed) {
            (Some(username), Some(password), Some(otp_seed)) => Ok(Some(Self {
                username: username.expose_secret().to_string(),
                password,
                otp_seed,
            })),
            (username, password, otp_seed) => {
                debug!(
                    has_username = username.is_some(),
                    has_password = password.is_some(),
                    has_otp_seed = otp_seed.is_some(),
                    "Stored credentials are incomplete"
                );
                Ok(None)
            }
        }
    }

    /// Write all three values to `store`.
    pub async fn save(&self, store: &dyn CredentialStore) -> Result<()> {
        if !store.supports_write() {
            anyhow::bail!("The configured credential backend is read-only");
        }

        store
            .set(USERNAME_KEY, SecretString::from(self.username.clone()))
            .await?;
        store
            .set(
                PASSWORD_KEY,
                SecretString::from(self.password.expose_secret().to_string()),
            )
            .await?;
        store
            .set(
                OTP_SEED_KEY,
                SecretString::from(self.otp_seed.expose_secret().to_string()),
            )
            .await?;
        Ok(())
    }
}
