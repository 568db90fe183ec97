//! Service configuration types.
//!
//! All fields carry serde defaults so that an entirely unconfigured
//! environment still yields a valid configuration; a malformed file or an
//! uncoercible environment variable is a hard error because it indicates
//! deliberate-but-broken operator configuration.

use serde::{Deserialize, Serialize};
use tasklink_core::{IntegrationSettings, Provider};
use url::Url;
use uuid::Uuid;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Deployment environment label, used only for logging
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Default tracing filter when RUST_LOG is absent
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Integrations seeded at startup
    #[serde(default)]
    pub integrations: Vec<IntegrationSeed>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            log_filter: default_log_filter(),
            integrations: Vec::new(),
        }
    }
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_filter() -> String {
    "tasklink_service=info,tasklink_core=info".to_string()
}

/// One integration declared in configuration
///
/// The access token arrives in plaintext from the operator and is encrypted
/// through the configured [`tasklink_core::SecretCipher`] before the
/// integration record is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationSeed {
    pub provider: Provider,
    pub organization_id: Uuid,
    pub project_id: Uuid,
    pub repository_name: String,
    pub repository_url: String,
    pub access_token: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub settings: IntegrationSettings,
}

/// Error type for configuration validation failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Integration '{name}': {message}")]
    InvalidIntegration { name: String, message: String },

    #[error("Duplicate repository URL for {provider}: {url}")]
    DuplicateRepository { provider: Provider, url: String },
}

impl ServiceConfig {
    /// Validate configuration structure and constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: Vec<(Provider, String)> = Vec::new();

        for seed in &self.integrations {
            if seed.repository_name.is_empty() {
                return Err(ConfigError::InvalidIntegration {
                    name: seed.repository_url.clone(),
                    message: "repository_name must not be empty".to_string(),
                });
            }

            if Url::parse(&seed.repository_url).is_err() {
                return Err(ConfigError::InvalidIntegration {
                    name: seed.repository_name.clone(),
                    message: format!("repository_url '{}' is not a valid URL", seed.repository_url),
                });
            }

            if seed.access_token.is_empty() {
                return Err(ConfigError::InvalidIntegration {
                    name: seed.repository_name.clone(),
                    message: "access_token must not be empty".to_string(),
                });
            }

            let identity = (seed.provider, seed.repository_url.to_lowercase());
            if seen.contains(&identity) {
                return Err(ConfigError::DuplicateRepository {
                    provider: seed.provider,
                    url: seed.repository_url.clone(),
                });
            }
            seen.push(identity);
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
