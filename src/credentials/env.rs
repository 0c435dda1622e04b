//! Environment-variable credential backend.

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;

use super::CredentialStore;

/// Reads `<PREFIX>_<KEY>` from the process environment. Read-only.
pub struct EnvCredentialStore {
    prefix: String,
}

impl EnvCredentialStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var_name(&self, key: &str) -> String {
        format!("{}_{}", self.prefix, key.to_ascii_uppercase())
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<SecretString>> {
        Ok(std::env::var(self.var_name(key))
            .ok()
            .filter(|v| !v.is_empty())
            .map(SecretString::from))
    }

    async fn set(&self, key: &str, _value: SecretString) -> Result<()> {
        anyhow::bail!(
            "Cannot store {key}: environment credentials are read-only (set {} instead)",
            self.var_name(key)
        )
    }

    fn supports_write(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[tokio::test]
    async fn test_reads_prefixed_variable() -> Result<()> {
        std::env::set_var("M1SYNC_ENV_TEST_USERNAME", "me@example.com");
        let store = EnvCredentialStore::new("M1SYNC_ENV_TEST");

        assert_eq!(
            store.get("username").await?.unwrap().expose_secret(),
            "me@example.com"
        );
        assert!(store.get("password").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_set_is_rejected() {
        let store = EnvCredentialStore::new("M1");
        let err = store
            .set("otp", SecretString::from("x".to_string()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("M1_OTP"));
    }
}
