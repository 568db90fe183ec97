//! Asynchronous dispatch of webhook events.
//!
//! The inbound call path persists the event synchronously and returns the
//! ack immediately; the heavy pipeline run executes on a spawned task. No
//! ordering is guaranteed across deliveries; entity upserts are idempotent
//! by identity, so concurrent runs over the same push are safe.

use std::sync::Arc;
use tasklink_core::{EventId, WebhookDelivery, WebhookError, WebhookEvent, WebhookEventPipeline};
use tracing::{info, warn};

/// Receives deliveries, persists them, and fires pipeline runs in the
/// background.
#[derive(Clone)]
pub struct EventDispatcher {
    pipeline: Arc<WebhookEventPipeline>,
}

impl EventDispatcher {
    /// Create new dispatcher over a pipeline
    pub fn new(pipeline: Arc<WebhookEventPipeline>) -> Self {
        Self { pipeline }
    }

    /// Persist an inbound delivery and schedule its processing
    ///
    /// Returns the persisted event as the caller's ack as soon as the
    /// record exists; the pipeline run happens on a background task and its
    /// outcome lands on the event record, not on this call.
    pub async fn dispatch(&self, delivery: WebhookDelivery) -> Result<WebhookEvent, WebhookError> {
        let event = self.pipeline.receive(delivery).await?;
        let event_id = event.id;

        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            if let Err(error) = pipeline.run(event_id).await {
                // The failure is already recorded on the event; this log is
                // for operators watching the service.
                warn!(event_id = %event_id, error = %error, "Background pipeline run failed");
            }
        });

        info!(event_id = %event_id, "Webhook delivery accepted");
        Ok(event)
    }

    /// Re-run a failed event, inline
    ///
    /// Retries are operator-triggered and infrequent, so they run on the
    /// caller's task and report the run's outcome directly.
    pub async fn retry(&self, event_id: EventId) -> Result<(), WebhookError> {
        self.pipeline.retry(event_id).await
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
