//! # Webhook Event Pipeline
//!
//! Top-level orchestrator owning the event lifecycle: persist on receipt,
//! dispatch by provider and event type, drive upsert → linking →
//! smart-commit per payload item, and record terminal state.
//!
//! The async boundary is crossed with an [`EventId`], never an event
//! object; every mutation re-fetches the row first so a concurrent or
//! stale copy can never be written back.

use crate::entities::{
    BranchFragment, CommitFragment, EntityUpserter, FragmentError, PullRequestFragment,
    PullRequestStatus, UpsertError,
};
use crate::integration::Integration;
use crate::linking::{LinkError, LinkingEngine};
use crate::signature::{SignatureVerifier, VerificationOutcome};
use crate::smart_commit::{SmartCommitEngine, SmartCommitError};
use crate::store::{IntegrationStore, StoreError, WebhookEventStore};
use crate::webhook::{WebhookDelivery, WebhookEvent};
use crate::EventId;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// Error Types
// ============================================================================

/// Top-level error for webhook pipeline runs
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Event not found: {id}")]
    EventNotFound { id: EventId },

    #[error("Malformed payload: {message}")]
    MalformedPayload { message: String },

    #[error("JSON parsing failed: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Payload fragment error: {0}")]
    Fragment(#[from] FragmentError),

    #[error("Entity upsert failed: {0}")]
    Upsert(#[from] UpsertError),

    #[error("Linking failed: {0}")]
    Link(#[from] LinkError),

    #[error("Smart-commit processing failed: {0}")]
    SmartCommit(#[from] SmartCommitError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl WebhookError {
    /// Check if error is transient and a retry may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Upsert(UpsertError::Store(e)) => e.is_transient(),
            Self::Link(LinkError::Store(e)) => e.is_transient(),
            Self::Link(LinkError::Capability(e)) => e.is_transient(),
            Self::SmartCommit(SmartCommitError::Store(e)) => e.is_transient(),
            Self::SmartCommit(SmartCommitError::Capability(e)) => e.is_transient(),
            _ => false,
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Orchestrates the full lifecycle of inbound webhook events
#[derive(Clone)]
pub struct WebhookEventPipeline {
    events: Arc<dyn WebhookEventStore>,
    integrations: Arc<dyn IntegrationStore>,
    upserter: EntityUpserter,
    linker: LinkingEngine,
    smart_commits: SmartCommitEngine,
}

impl WebhookEventPipeline {
    /// Create new pipeline
    pub fn new(
        events: Arc<dyn WebhookEventStore>,
        integrations: Arc<dyn IntegrationStore>,
        upserter: EntityUpserter,
        linker: LinkingEngine,
        smart_commits: SmartCommitEngine,
    ) -> Self {
        Self {
            events,
            integrations,
            upserter,
            linker,
            smart_commits,
        }
    }

    /// Persist an inbound delivery and return the recorded event
    ///
    /// The integration is resolved by matching the payload's repository URL
    /// against known integrations; an unmatched repository leaves the event
    /// informational only. Signature verification failure does not reject
    /// the delivery: the event is recorded with the failure noted and its
    /// downstream processing blocked.
    pub async fn receive(&self, delivery: WebhookDelivery) -> Result<WebhookEvent, WebhookError> {
        let payload = delivery.payload()?;
        if !payload.is_object() {
            return Err(WebhookError::MalformedPayload {
                message: "payload must be a JSON object".to_string(),
            });
        }

        let integration = match Self::extract_repository_url(delivery.provider, &payload) {
            Some(url) => {
                self.integrations
                    .find_by_repository_url(delivery.provider, &url)
                    .await?
            }
            None => None,
        };

        let outcome = SignatureVerifier::check(
            delivery.provider,
            &delivery.body,
            delivery.signature.as_deref(),
            integration
                .as_ref()
                .and_then(|integration| integration.webhook_secret.as_ref()),
        );
        let signature_valid = match &outcome {
            VerificationOutcome::Valid => Some(true),
            VerificationOutcome::Invalid { reason } => {
                warn!(
                    provider = %delivery.provider,
                    event_type = %delivery.event_type,
                    reason = %reason,
                    "Webhook signature verification failed; recording event without processing"
                );
                Some(false)
            }
            VerificationOutcome::NoSecretConfigured => None,
        };

        let event_action = payload
            .get("action")
            .and_then(|a| a.as_str())
            .map(String::from);

        let event = WebhookEvent::new(
            delivery.provider,
            delivery.event_type.clone(),
            event_action,
            payload,
            delivery.signature.clone(),
            integration.as_ref().map(|i| i.id),
            signature_valid,
        );

        self.events.insert(event.clone()).await?;

        info!(
            event_id = %event.id,
            provider = %event.provider,
            event_type = %event.event_type,
            integration = ?event.integration_id,
            "Webhook event recorded"
        );

        Ok(event)
    }

    /// Run the processing pipeline for a persisted event
    ///
    /// Reloads the event by id, marks it processing, dispatches to the
    /// provider handler, and records terminal state. A failure anywhere
    /// after an entity upsert does not roll the upsert back; upserts are
    /// individually idempotent, so replays are safe.
    pub async fn run(&self, event_id: EventId) -> Result<(), WebhookError> {
        let mut event = self
            .events
            .find(event_id)
            .await?
            .ok_or(WebhookError::EventNotFound { id: event_id })?;

        if event.signature_rejected() {
            warn!(event_id = %event_id, "Skipping processing of unauthentic event");
            event.begin_processing()?;
            self.events.update(event.clone()).await?;
            event.complete()?;
            self.events.update(event).await?;
            return Ok(());
        }

        event.begin_processing()?;
        self.events.update(event.clone()).await?;

        debug!(event_id = %event_id, event_type = %event.event_type, "Pipeline run started");

        match self.dispatch(&event).await {
            Ok(()) => {
                // Reload before the terminal write; the dispatched handlers
                // may have been slow and the in-memory copy stale.
                let mut fresh = self
                    .events
                    .find(event_id)
                    .await?
                    .ok_or(WebhookError::EventNotFound { id: event_id })?;
                fresh.complete()?;
                self.events.update(fresh).await?;

                info!(event_id = %event_id, "Pipeline run succeeded");
                Ok(())
            }
            Err(error) => {
                let mut fresh = self
                    .events
                    .find(event_id)
                    .await?
                    .ok_or(WebhookError::EventNotFound { id: event_id })?;
                fresh.fail(error.to_string())?;
                self.events.update(fresh).await?;

                warn!(event_id = %event_id, error = %error, "Pipeline run failed");
                Err(error)
            }
        }
    }

    /// Reset a failed event and run it again
    ///
    /// Manual trigger; permitted any number of times.
    pub async fn retry(&self, event_id: EventId) -> Result<(), WebhookError> {
        let mut event = self
            .events
            .find(event_id)
            .await?
            .ok_or(WebhookError::EventNotFound { id: event_id })?;

        event.reset_for_retry()?;
        let retry_count = event.retry_count;
        self.events.update(event).await?;

        info!(event_id = %event_id, retry_count, "Retrying webhook event");
        self.run(event_id).await
    }

    // ------------------------------------------------------------------
    // Provider dispatch
    // ------------------------------------------------------------------

    async fn dispatch(&self, event: &WebhookEvent) -> Result<(), WebhookError> {
        let Some(integration_id) = event.integration_id else {
            info!(
                event_id = %event.id,
                "Event has no matching integration; informational only"
            );
            return Ok(());
        };

        let integration = self
            .integrations
            .find(integration_id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "integration",
                id: integration_id.to_string(),
            })?;

        match (event.provider, event.event_type.as_str()) {
            (crate::Provider::GitHub, "push") => self.handle_push(&integration, event).await,
            (crate::Provider::GitHub, "pull_request") => {
                self.handle_pull_request(&integration, event).await
            }
            (crate::Provider::GitHub, "create") => {
                self.handle_branch_create(&integration, event).await
            }
            (crate::Provider::GitHub, "delete") => {
                self.handle_branch_delete(&integration, event).await
            }
            (crate::Provider::GitLab, "Push Hook") => self.handle_push(&integration, event).await,
            (crate::Provider::GitLab, "Merge Request Hook") => {
                warn!(
                    event_id = %event.id,
                    "GitLab merge request events are not implemented yet; ignoring"
                );
                Ok(())
            }
            (provider, event_type) => {
                info!(
                    event_id = %event.id,
                    provider = %provider,
                    event_type = %event_type,
                    "Unsupported event type; ignoring"
                );
                Ok(())
            }
        }
    }

    /// Per-commit upsert → link → smart-commit flow, shared by GitHub push
    /// and GitLab Push Hook events
    async fn handle_push(
        &self,
        integration: &Integration,
        event: &WebhookEvent,
    ) -> Result<(), WebhookError> {
        let branch = Self::extract_branch_name(&event.payload);
        let commits = event
            .payload
            .get("commits")
            .and_then(|c| c.as_array())
            .cloned()
            .unwrap_or_default();

        debug!(
            event_id = %event.id,
            branch = ?branch,
            commits = commits.len(),
            "Processing push event"
        );

        for value in &commits {
            let fragment = match CommitFragment::from_payload(value) {
                Ok(fragment) => fragment,
                Err(error) => {
                    warn!(event_id = %event.id, error = %error, "Skipping malformed commit entry");
                    continue;
                }
            };

            let commit = self
                .upserter
                .upsert_commit(integration, &fragment, branch.as_deref())
                .await?
                .into_inner();

            if integration.settings.auto_link_enabled {
                let tasks = self.linker.link_commit(integration, &commit).await?;
                debug!(
                    sha = %commit.sha.short(),
                    linked_tasks = tasks.len(),
                    "Commit linking finished"
                );
            }

            if integration.settings.smart_commits_enabled {
                let summary = self.smart_commits.process(integration, &commit).await?;
                if summary.total_commands > 0 {
                    info!(
                        sha = %commit.sha.short(),
                        total = summary.total_commands,
                        succeeded = summary.success_count,
                        failed = summary.failure_count,
                        "Smart-commit commands processed"
                    );
                }
            }
        }

        Ok(())
    }

    async fn handle_pull_request(
        &self,
        integration: &Integration,
        event: &WebhookEvent,
    ) -> Result<(), WebhookError> {
        let fragment = PullRequestFragment::from_payload(&event.payload)?;
        let pr = self
            .upserter
            .upsert_pull_request(integration, &fragment)
            .await?
            .into_inner();

        if integration.settings.auto_link_enabled {
            let tasks = self.linker.link_pull_request(integration, &pr).await?;
            debug!(pr = pr.number, linked_tasks = tasks.len(), "Pull request linking finished");
        }

        if integration.settings.auto_close_on_merge && pr.status == PullRequestStatus::Merged {
            // TODO: transition linked closes_task tasks once the done-status
            // mapping is configurable per integration.
            info!(
                pr = pr.number,
                "Auto-close on merge is enabled but not implemented; no transition performed"
            );
        }

        Ok(())
    }

    async fn handle_branch_create(
        &self,
        integration: &Integration,
        event: &WebhookEvent,
    ) -> Result<(), WebhookError> {
        let fragment = BranchFragment::from_payload(&event.payload)?;
        if !fragment.is_branch() {
            debug!(event_id = %event.id, ref_type = %fragment.ref_type, "Ignoring non-branch create");
            return Ok(());
        }

        let branch = self
            .upserter
            .upsert_branch(
                integration,
                &fragment.name,
                fragment.base_branch.as_deref(),
                false,
            )
            .await?
            .into_inner();

        let task = self.linker.link_branch(integration, &branch).await?;
        debug!(
            branch = %branch.name,
            task = ?task.map(|t| t.key),
            "Branch create processed"
        );

        Ok(())
    }

    async fn handle_branch_delete(
        &self,
        integration: &Integration,
        event: &WebhookEvent,
    ) -> Result<(), WebhookError> {
        let fragment = BranchFragment::from_payload(&event.payload)?;
        if !fragment.is_branch() {
            debug!(event_id = %event.id, ref_type = %fragment.ref_type, "Ignoring non-branch delete");
            return Ok(());
        }

        self.upserter
            .mark_branch_deleted(integration, &fragment.name)
            .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Payload helpers
    // ------------------------------------------------------------------

    /// Pull the repository web URL out of a payload, per provider shape
    fn extract_repository_url(provider: crate::Provider, payload: &Value) -> Option<String> {
        match provider {
            crate::Provider::GitHub => payload
                .get("repository")
                .and_then(|r| r.get("html_url").or_else(|| r.get("url")))
                .and_then(|u| u.as_str())
                .map(String::from),
            crate::Provider::GitLab => payload
                .get("project")
                .and_then(|p| p.get("web_url"))
                .or_else(|| payload.get("repository").and_then(|r| r.get("homepage")))
                .and_then(|u| u.as_str())
                .map(String::from),
        }
    }

    /// Branch name from a push payload's `ref`; tag pushes yield `None`
    fn extract_branch_name(payload: &Value) -> Option<String> {
        payload
            .get("ref")
            .and_then(|r| r.as_str())
            .and_then(|r| r.strip_prefix("refs/heads/"))
            .map(String::from)
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
