//! # Integration Module
//!
//! An [`Integration`] is the authorized binding between one provider
//! repository and one internal project/organization. It owns the encrypted
//! provider access token, the optional webhook secret used for signature
//! verification, and the feature toggles that drive the pipeline.

use crate::{IntegrationId, OrganizationId, ProjectId, Provider, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ============================================================================
// Secret-Bearing Types
// ============================================================================

/// Provider access token in its encrypted-at-rest form
///
/// The plaintext never appears in this type; decryption goes through the
/// external [`SecretCipher`] capability. Never included in Debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedToken(String);

impl EncryptedToken {
    /// Wrap an already-encrypted token
    pub fn new(ciphertext: impl Into<String>) -> Self {
        Self(ciphertext.into())
    }

    /// Get the ciphertext for storage or decryption
    pub fn ciphertext(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncryptedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedToken")
            .field("ciphertext", &"[REDACTED]")
            .finish()
    }
}

/// Shared webhook secret used to authenticate inbound deliveries
///
/// Held in memory only for the duration of verification; zeroized on drop
/// and never included in Debug output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    /// Create secret from string
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Get secret for immediate use
    ///
    /// # Security Warning
    /// The returned slice contains the actual secret value. Use immediately
    /// and avoid storing in variables.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// Check if secret is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSecret")
            .field("length", &self.0.len())
            .field("value", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Secret Cipher Capability
// ============================================================================

/// Error type for secret cipher operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SecretCipherError {
    #[error("Encryption failed: {message}")]
    EncryptionFailed { message: String },

    #[error("Decryption failed: {message}")]
    DecryptionFailed { message: String },
}

/// Credential encryption, owned by the surrounding application
///
/// This pipeline stores tokens only in encrypted form and never needs the
/// plaintext itself; the trait exists so integrations can be constructed
/// from operator-supplied plaintext at the service boundary.
#[async_trait]
pub trait SecretCipher: Send + Sync {
    /// Encrypt a plaintext secret into its storable form
    async fn encrypt(&self, secret: &str) -> Result<EncryptedToken, SecretCipherError>;

    /// Decrypt a stored token back to plaintext
    async fn decrypt(&self, token: &EncryptedToken) -> Result<WebhookSecret, SecretCipherError>;
}

// ============================================================================
// Integration Aggregate
// ============================================================================

/// Feature toggles controlling what the pipeline does for an integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationSettings {
    /// Scan commit messages and pull-request text for task references
    pub auto_link_enabled: bool,

    /// Execute `#command` tokens found in commit messages
    pub smart_commits_enabled: bool,

    /// Transition linked tasks when a pull request merges (not yet active)
    pub auto_close_on_merge: bool,

    /// Prefix applied to branch names created from the work-item UI
    pub branch_prefix: Option<String>,
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        Self {
            auto_link_enabled: true,
            smart_commits_enabled: false,
            auto_close_on_merge: false,
            branch_prefix: None,
        }
    }
}

/// Authorized binding between a provider repository and an internal project
#[derive(Debug, Clone)]
pub struct Integration {
    pub id: IntegrationId,
    pub provider: Provider,
    pub organization_id: OrganizationId,
    pub project_id: ProjectId,

    /// Repository in `owner/name` display form
    pub repository_name: String,

    /// Canonical repository web URL, used to resolve inbound events
    pub repository_url: String,

    /// Provider API token, encrypted at rest
    pub access_token: EncryptedToken,

    /// Shared secret for webhook signature verification
    pub webhook_secret: Option<WebhookSecret>,

    pub settings: IntegrationSettings,
    pub created_at: Timestamp,
}

impl Integration {
    /// Create a new integration with default settings
    pub fn new(
        provider: Provider,
        organization_id: OrganizationId,
        project_id: ProjectId,
        repository_name: impl Into<String>,
        repository_url: impl Into<String>,
        access_token: EncryptedToken,
    ) -> Self {
        Self {
            id: IntegrationId::new(),
            provider,
            organization_id,
            project_id,
            repository_name: repository_name.into(),
            repository_url: repository_url.into(),
            access_token,
            webhook_secret: None,
            settings: IntegrationSettings::default(),
            created_at: Timestamp::now(),
        }
    }

    /// Set the webhook secret
    pub fn with_webhook_secret(mut self, secret: WebhookSecret) -> Self {
        self.webhook_secret = Some(secret);
        self
    }

    /// Override the feature toggles
    pub fn with_settings(mut self, settings: IntegrationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Check whether an inbound payload's repository URL refers to this
    /// integration's repository
    ///
    /// Comparison is scheme-, case-, trailing-slash- and `.git`-suffix
    /// insensitive on host and path; anything that does not parse as a URL
    /// does not match.
    pub fn matches_repository_url(&self, candidate: &str) -> bool {
        match (normalize_repository_url(&self.repository_url), normalize_repository_url(candidate))
        {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => false,
        }
    }
}

/// Reduce a repository URL to a comparable `host/path` form
fn normalize_repository_url(raw: &str) -> Option<(String, String)> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    let path = url
        .path()
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .to_ascii_lowercase();
    Some((host, path))
}

#[cfg(test)]
#[path = "integration_tests.rs"]
mod tests;
