//! Credential backend selection.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{CredentialStore, EnvCredentialStore, FileCredentialStore};

fn default_env_prefix() -> String {
    "M1".to_string()
}

/// Which credential backend to use, from the `[credentials]` config table.
///
/// # Example
///
/// ```toml
/// [credentials]
/// backend = "env"
/// prefix = "M1"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CredentialConfig {
    /// TOML file of key/value pairs. Defaults to `<data_dir>/credentials.toml`.
    File {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// Read-only environment variables: `<PREFIX>_USERNAME`, `<PREFIX>_PASSWORD`, `<PREFIX>_OTP`.
    Env {
        #[serde(default = "default_env_prefix")]
        prefix: String,
    },
}

impl Default for CredentialConfig {
    fn default() -> Self {
        CredentialConfig::File { path: None }
    }
}

impl CredentialConfig {
    /// Build a credential store from this configuration.
    ///
    /// Relative file paths are resolved against `data_dir`.
    pub fn build(&self, data_dir: &Path) -> Box<dyn CredentialStore> {
        match self {
            CredentialConfig::File { path } => {
                let path = match path {
                    Some(p) if p.is_absolute() => p.clone(),
                    Some(p) => data_dir.join(p),
                    None => data_dir.join("credentials.toml"),
                };
                Box::new(FileCredentialStore::new(path))
            }
            CredentialConfig::Env { prefix } => Box::new(EnvCredentialStore::new(prefix.clone())),
        }
    }
}
