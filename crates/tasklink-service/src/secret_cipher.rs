//! Production [`SecretCipher`] implementations for the service binary.
//!
//! # Implementations
//!
//! | Type | Use | Security |
//! |------|-----|---------|
//! | [`LiteralSecretCipher`] | Dev / CI with tokens stored as-is | Not for production |
//!
//! A KMS-backed cipher belongs to the surrounding platform and is injected
//! in real deployments; it is not part of this build.

use async_trait::async_trait;
use tasklink_core::{EncryptedToken, SecretCipher, SecretCipherError, WebhookSecret};
use tracing::warn;

/// A [`SecretCipher`] that stores token material verbatim.
///
/// **Development and testing only.** The "ciphertext" is the plaintext; the
/// type exists so that the rest of the system can be written against the
/// cipher seam and swapped to a real KMS-backed implementation without code
/// changes.
///
/// At construction a `WARN` log line is emitted so that operators are
/// reminded to replace it before going to production.
pub struct LiteralSecretCipher;

impl LiteralSecretCipher {
    /// Construct the literal cipher, warning loudly.
    pub fn new() -> Self {
        warn!(
            "LiteralSecretCipher is active — tokens are stored without encryption. \
             Configure a KMS-backed cipher before deploying."
        );
        Self
    }
}

impl Default for LiteralSecretCipher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretCipher for LiteralSecretCipher {
    async fn encrypt(&self, secret: &str) -> Result<EncryptedToken, SecretCipherError> {
        Ok(EncryptedToken::new(secret))
    }

    async fn decrypt(&self, token: &EncryptedToken) -> Result<WebhookSecret, SecretCipherError> {
        Ok(WebhookSecret::new(token.ciphertext()))
    }
}

#[cfg(test)]
#[path = "secret_cipher_tests.rs"]
mod tests;
