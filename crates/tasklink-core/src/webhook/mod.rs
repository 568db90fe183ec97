//! # Webhook Event Module
//!
//! The durable [`WebhookEvent`] record, its explicit lifecycle state
//! machine, and the inbound [`WebhookDelivery`] shape.
//!
//! Every inbound delivery is persisted, valid signature or not, so that
//! rejected and unmatched deliveries remain auditable. Processing state is
//! an explicit enum with a small transition table; the timestamps and error
//! message are per-state metadata, never the source of truth.

use crate::store::StoreError;
use crate::{EventId, IntegrationId, Provider, Timestamp};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

mod pipeline;
pub use pipeline::{WebhookEventPipeline, WebhookError};

// ============================================================================
// Event State Machine
// ============================================================================

/// Processing lifecycle of a webhook event
///
/// ```text
/// Received ──▶ Processing ──▶ Processed
///                  ▲   │
///                  │   ▼
///         (retry)  └─ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    /// Persisted on receipt; not yet picked up
    Received,
    /// A pipeline run is underway
    Processing,
    /// Terminal success
    Processed,
    /// Terminal failure; eligible for manual retry
    Failed,
}

impl EventState {
    /// Check whether the transition table allows `self -> next`
    pub fn can_transition_to(self, next: EventState) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Processing)
                | (Self::Failed, Self::Processing)
                | (Self::Processing, Self::Processed)
                | (Self::Processing, Self::Failed)
        )
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Core Types
// ============================================================================

/// Raw inbound webhook delivery, before persistence
///
/// The surrounding transport hands this to the pipeline already stripped of
/// HTTP concerns: the provider, the provider's event-type string, the
/// signature or token header, and the raw body bytes.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub provider: Provider,
    pub event_type: String,
    pub signature: Option<String>,
    pub body: Bytes,
}

impl WebhookDelivery {
    /// Create new delivery
    pub fn new(
        provider: Provider,
        event_type: impl Into<String>,
        signature: Option<String>,
        body: Bytes,
    ) -> Self {
        Self {
            provider,
            event_type: event_type.into(),
            signature,
            body,
        }
    }

    /// Parse the body as a JSON document
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Durable record of one inbound webhook delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: EventId,
    pub provider: Provider,

    /// Provider's raw event-type string (`push`, `Push Hook`, ...)
    pub event_type: String,

    /// Provider's event sub-type (`opened`, `closed`, ...) when present
    pub event_action: Option<String>,

    /// Full payload document, kept verbatim for audit and replay
    pub payload: Value,

    /// Signature or token the delivery carried
    pub signature: Option<String>,

    /// Resolved integration; `None` leaves the event informational only
    pub integration_id: Option<IntegrationId>,

    /// Verification result: `Some(false)` marks the event as unauthentic
    /// and blocks downstream processing; `None` means no secret was
    /// configured to check against
    pub signature_valid: Option<bool>,

    pub state: EventState,
    pub processing_started_at: Option<Timestamp>,
    pub processing_completed_at: Option<Timestamp>,
    pub processing_error: Option<String>,
    pub retry_count: u32,
    pub received_at: Timestamp,
}

impl WebhookEvent {
    /// Create a freshly received event
    pub fn new(
        provider: Provider,
        event_type: impl Into<String>,
        event_action: Option<String>,
        payload: Value,
        signature: Option<String>,
        integration_id: Option<IntegrationId>,
        signature_valid: Option<bool>,
    ) -> Self {
        Self {
            id: EventId::new(),
            provider,
            event_type: event_type.into(),
            event_action,
            payload,
            signature,
            integration_id,
            signature_valid,
            state: EventState::Received,
            processing_started_at: None,
            processing_completed_at: None,
            processing_error: None,
            retry_count: 0,
            received_at: Timestamp::now(),
        }
    }

    /// Mark the start of a pipeline run
    pub fn begin_processing(&mut self) -> Result<(), StoreError> {
        self.transition_to(EventState::Processing)?;
        self.processing_started_at = Some(Timestamp::now());
        self.processing_completed_at = None;
        self.processing_error = None;
        Ok(())
    }

    /// Mark terminal success
    ///
    /// Invariant: a processed event never carries an error message.
    pub fn complete(&mut self) -> Result<(), StoreError> {
        self.transition_to(EventState::Processed)?;
        self.processing_completed_at = Some(Timestamp::now());
        self.processing_error = None;
        Ok(())
    }

    /// Mark terminal failure with the error that caused it
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), StoreError> {
        self.transition_to(EventState::Failed)?;
        self.processing_completed_at = Some(Timestamp::now());
        self.processing_error = Some(error.into());
        Ok(())
    }

    /// Reset processing metadata ahead of a manual retry
    ///
    /// Only failed events are retryable. The state stays `Failed` until the
    /// new run begins; there is no retry cutoff.
    pub fn reset_for_retry(&mut self) -> Result<(), StoreError> {
        if self.state != EventState::Failed {
            return Err(StoreError::IllegalTransition {
                from: self.state,
                to: EventState::Processing,
            });
        }

        self.processing_started_at = None;
        self.processing_completed_at = None;
        self.processing_error = None;
        self.retry_count += 1;
        Ok(())
    }

    /// Check whether processing finished successfully
    pub fn is_processed(&self) -> bool {
        self.state == EventState::Processed
    }

    /// Check whether downstream processing is blocked by verification
    pub fn signature_rejected(&self) -> bool {
        self.signature_valid == Some(false)
    }

    fn transition_to(&mut self, next: EventState) -> Result<(), StoreError> {
        if !self.state.can_transition_to(next) {
            return Err(StoreError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
