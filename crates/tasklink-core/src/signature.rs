//! # Signature Verification Module
//!
//! Validates provider-specific authenticity of inbound webhook payloads.
//!
//! GitHub signs the raw request body with HMAC-SHA256 and sends the digest
//! in `sha256=<hex>` form; GitLab sends a bare shared-secret token that is
//! compared for exact equality. Both paths fail closed and both comparisons
//! are constant-time to prevent timing-based secret recovery.
//!
//! Verification is pure: a failed check never prevents the event from being
//! persisted. The pipeline records the outcome on the event and skips
//! downstream processing for invalid deliveries.

use crate::integration::WebhookSecret;
use crate::Provider;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Prefix GitHub puts in front of the hex HMAC digest
const GITHUB_SIGNATURE_PREFIX: &str = "sha256=";

// ============================================================================
// Core Types
// ============================================================================

/// Outcome of verifying one inbound delivery
///
/// Recorded on the persisted event so that invalid deliveries remain
/// auditable after the fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Signature or token matched the configured secret
    Valid,

    /// Signature or token did not match; `reason` is safe to log
    Invalid { reason: String },

    /// The integration has no webhook secret configured; nothing to check
    NoSecretConfigured,
}

impl VerificationOutcome {
    /// Check whether the delivery passed verification
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Check whether downstream processing must be skipped
    ///
    /// Only a positively failed check blocks processing; an integration
    /// without a configured secret is processed normally.
    pub fn blocks_processing(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }
}

// ============================================================================
// Verifier
// ============================================================================

/// Provider-dispatching signature verifier
///
/// Stateless; all methods are pure functions over the payload bytes, the
/// signature header, and the integration's webhook secret.
pub struct SignatureVerifier;

impl SignatureVerifier {
    /// Verify an inbound delivery against the configured secret
    ///
    /// Returns `true` iff the signature is authentic for `provider`.
    /// A missing signature header always fails.
    pub fn verify(
        provider: Provider,
        payload: &[u8],
        signature: Option<&str>,
        secret: &WebhookSecret,
    ) -> bool {
        Self::check(provider, payload, signature, Some(secret)).is_valid()
    }

    /// Verify an inbound delivery, reporting why it failed
    ///
    /// An integration without a configured secret yields
    /// [`VerificationOutcome::NoSecretConfigured`] rather than a failure.
    pub fn check(
        provider: Provider,
        payload: &[u8],
        signature: Option<&str>,
        secret: Option<&WebhookSecret>,
    ) -> VerificationOutcome {
        let Some(secret) = secret else {
            return VerificationOutcome::NoSecretConfigured;
        };

        let Some(signature) = signature else {
            return VerificationOutcome::Invalid {
                reason: "signature header missing".to_string(),
            };
        };

        match provider {
            Provider::GitHub => Self::check_github(payload, signature, secret),
            Provider::GitLab => Self::check_gitlab(signature, secret),
        }
    }

    /// HMAC-SHA256 digest comparison in GitHub's `sha256=<hex>` format
    ///
    /// The hex digest is decoded case-insensitively; the digest comparison
    /// itself happens inside [`Mac::verify_slice`], which is constant-time.
    fn check_github(
        payload: &[u8],
        signature: &str,
        secret: &WebhookSecret,
    ) -> VerificationOutcome {
        let Some(hex_digest) = signature.strip_prefix(GITHUB_SIGNATURE_PREFIX) else {
            return VerificationOutcome::Invalid {
                reason: "signature is not sha256-prefixed".to_string(),
            };
        };

        let digest = match hex::decode(hex_digest) {
            Ok(bytes) => bytes,
            Err(_) => {
                return VerificationOutcome::Invalid {
                    reason: "signature is not valid hex".to_string(),
                }
            }
        };

        let mut mac = match HmacSha256::new_from_slice(secret.expose_secret().as_bytes()) {
            Ok(mac) => mac,
            Err(_) => {
                return VerificationOutcome::Invalid {
                    reason: "secret cannot be used as HMAC key".to_string(),
                }
            }
        };
        mac.update(payload);

        match mac.verify_slice(&digest) {
            Ok(()) => VerificationOutcome::Valid,
            Err(_) => VerificationOutcome::Invalid {
                reason: "HMAC-SHA256 digest does not match".to_string(),
            },
        }
    }

    /// Bare shared-secret equality in constant time (GitLab)
    fn check_gitlab(token: &str, secret: &WebhookSecret) -> VerificationOutcome {
        let token = token.as_bytes();
        let expected = secret.expose_secret().as_bytes();

        // ct_eq requires equal lengths; a length mismatch is already a
        // non-match and leaks nothing the attacker does not know.
        if token.len() != expected.len() || token.ct_eq(expected).unwrap_u8() != 1 {
            return VerificationOutcome::Invalid {
                reason: "token does not match configured secret".to_string(),
            };
        }

        VerificationOutcome::Valid
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
