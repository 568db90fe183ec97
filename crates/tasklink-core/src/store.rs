//! # Persistence Traits
//!
//! Identity-keyed storage interfaces for webhook events, integrations,
//! normalized entities, links, and smart-commit execution records.
//!
//! Creates are conflict-aware: `create_*` reports [`CreateOutcome`] so that
//! two concurrent deliveries racing on the same identity both succeed, one
//! as the writer and one as an idempotent no-op. Implementations back this
//! with a uniqueness constraint rather than a lock.

use crate::entities::{Branch, Commit, CommitId, PullRequest, PullRequestId};
use crate::integration::Integration;
use crate::linking::{CommitTaskLink, PullRequestTaskLink};
use crate::smart_commit::SmartCommitExecution;
use crate::webhook::{EventState, WebhookEvent};
use crate::{CommitSha, EventId, IntegrationId, Provider, TaskId};
use async_trait::async_trait;

// ============================================================================
// Core Types
// ============================================================================

/// Result of a conflict-aware create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The record was written by this call
    Created,

    /// A record with the same identity already existed; nothing was written
    AlreadyExists,
}

/// Error type for store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Illegal event state transition: {from} -> {to}")]
    IllegalTransition { from: EventState, to: EventState },

    #[error("Store unavailable: {message}")]
    Unavailable { message: String },
}

impl StoreError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::NotFound { .. } => false,
            Self::Conflict { .. } => false,
            Self::IllegalTransition { .. } => false,
        }
    }
}

// ============================================================================
// Store Traits
// ============================================================================

/// Durable record of inbound webhook events and their processing state
///
/// `update` must reject state changes that the [`EventState`] transition
/// table does not allow; metadata updates within the same state are always
/// permitted.
#[async_trait]
pub trait WebhookEventStore: Send + Sync {
    /// Persist a newly received event
    async fn insert(&self, event: WebhookEvent) -> Result<(), StoreError>;

    /// Fetch an event by id
    async fn find(&self, id: EventId) -> Result<Option<WebhookEvent>, StoreError>;

    /// Persist the current state of an event
    async fn update(&self, event: WebhookEvent) -> Result<(), StoreError>;
}

/// Directory of configured integrations
#[async_trait]
pub trait IntegrationStore: Send + Sync {
    /// Persist a new integration
    async fn insert(&self, integration: Integration) -> Result<(), StoreError>;

    /// Fetch an integration by id
    async fn find(&self, id: IntegrationId) -> Result<Option<Integration>, StoreError>;

    /// Resolve an integration by the repository URL carried in a payload
    async fn find_by_repository_url(
        &self,
        provider: Provider,
        repository_url: &str,
    ) -> Result<Option<Integration>, StoreError>;
}

/// Storage for normalized commit/branch/pull-request records
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch a commit by its natural identity
    async fn find_commit(
        &self,
        integration: IntegrationId,
        sha: &CommitSha,
    ) -> Result<Option<Commit>, StoreError>;

    /// Create a commit; conflict on (integration, sha) is not an error
    async fn create_commit(&self, commit: Commit) -> Result<CreateOutcome, StoreError>;

    /// Fetch a branch by its natural identity
    async fn find_branch(
        &self,
        integration: IntegrationId,
        name: &str,
    ) -> Result<Option<Branch>, StoreError>;

    /// Create a branch; conflict on (integration, name) is not an error
    async fn create_branch(&self, branch: Branch) -> Result<CreateOutcome, StoreError>;

    /// Persist branch mutations (task attachment, soft delete)
    async fn update_branch(&self, branch: Branch) -> Result<(), StoreError>;

    /// Fetch a pull request by its natural identity
    async fn find_pull_request(
        &self,
        integration: IntegrationId,
        number: u64,
    ) -> Result<Option<PullRequest>, StoreError>;

    /// Create a pull request; conflict on (integration, number) is not an error
    async fn create_pull_request(&self, pr: PullRequest) -> Result<CreateOutcome, StoreError>;

    /// Persist pull-request mutations from later events for the same number
    async fn update_pull_request(&self, pr: PullRequest) -> Result<(), StoreError>;
}

/// Storage for commit↔task and pull-request↔task links
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// All links for a commit
    async fn find_commit_links(
        &self,
        commit: CommitId,
    ) -> Result<Vec<CommitTaskLink>, StoreError>;

    /// Create a commit link; conflict on (commit, task) is not an error
    async fn create_commit_link(
        &self,
        link: CommitTaskLink,
    ) -> Result<CreateOutcome, StoreError>;

    /// Remove a commit link; returns whether a link existed
    async fn delete_commit_link(
        &self,
        commit: CommitId,
        task: TaskId,
    ) -> Result<bool, StoreError>;

    /// All links for a pull request
    async fn find_pull_request_links(
        &self,
        pull_request: PullRequestId,
    ) -> Result<Vec<PullRequestTaskLink>, StoreError>;

    /// Create a pull-request link; conflict on (pr, task) is not an error
    async fn create_pull_request_link(
        &self,
        link: PullRequestTaskLink,
    ) -> Result<CreateOutcome, StoreError>;
}

/// Audit trail of smart-commit command executions
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist one execution record
    async fn insert(&self, execution: SmartCommitExecution) -> Result<(), StoreError>;

    /// All execution records for a commit, in insertion order
    async fn find_for_commit(
        &self,
        commit: CommitId,
    ) -> Result<Vec<SmartCommitExecution>, StoreError>;
}
