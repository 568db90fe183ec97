//! # In-Memory Store Implementations
//!
//! Thread-safe in-memory implementations of the persistence traits.
//! Uses RwLock for concurrent access with minimal contention.
//!
//! Identity conflicts behave exactly like a database uniqueness constraint:
//! the loser of a create race gets [`CreateOutcome::AlreadyExists`] and the
//! stored row is untouched.

use crate::entities::{Branch, BranchId, Commit, CommitId, PullRequest, PullRequestId};
use crate::integration::Integration;
use crate::linking::{CommitTaskLink, PullRequestTaskLink};
use crate::smart_commit::SmartCommitExecution;
use crate::store::{
    CreateOutcome, EntityStore, ExecutionStore, IntegrationStore, LinkStore, StoreError,
    WebhookEventStore,
};
use crate::webhook::WebhookEvent;
use crate::{CommitSha, EventId, IntegrationId, Provider, TaskId};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

// ============================================================================
// Webhook Event Store
// ============================================================================

/// Thread-safe in-memory webhook event store
///
/// `update` enforces the event state transition table, standing in for the
/// guard a relational schema would express with a check constraint.
#[derive(Clone, Default)]
pub struct InMemoryWebhookEventStore {
    events: Arc<RwLock<HashMap<EventId, WebhookEvent>>>,
}

impl InMemoryWebhookEventStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookEventStore for InMemoryWebhookEventStore {
    async fn insert(&self, event: WebhookEvent) -> Result<(), StoreError> {
        let mut events = self.events.write().unwrap();
        if events.contains_key(&event.id) {
            return Err(StoreError::Conflict {
                message: format!("event {} already exists", event.id),
            });
        }
        events.insert(event.id, event);
        Ok(())
    }

    async fn find(&self, id: EventId) -> Result<Option<WebhookEvent>, StoreError> {
        Ok(self.events.read().unwrap().get(&id).cloned())
    }

    async fn update(&self, event: WebhookEvent) -> Result<(), StoreError> {
        let mut events = self.events.write().unwrap();
        let existing = events.get(&event.id).ok_or(StoreError::NotFound {
            entity: "webhook_event",
            id: event.id.to_string(),
        })?;

        if existing.state != event.state && !existing.state.can_transition_to(event.state) {
            return Err(StoreError::IllegalTransition {
                from: existing.state,
                to: event.state,
            });
        }

        events.insert(event.id, event);
        Ok(())
    }
}

// ============================================================================
// Integration Store
// ============================================================================

/// Thread-safe in-memory integration directory
#[derive(Clone, Default)]
pub struct InMemoryIntegrationStore {
    integrations: Arc<RwLock<HashMap<IntegrationId, Integration>>>,
}

impl InMemoryIntegrationStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create store pre-populated with integrations
    pub fn with_integrations(integrations: Vec<Integration>) -> Self {
        let store = Self::new();
        {
            let mut map = store.integrations.write().unwrap();
            for integration in integrations {
                map.insert(integration.id, integration);
            }
        }
        store
    }
}

#[async_trait]
impl IntegrationStore for InMemoryIntegrationStore {
    async fn insert(&self, integration: Integration) -> Result<(), StoreError> {
        let mut integrations = self.integrations.write().unwrap();
        if integrations.contains_key(&integration.id) {
            return Err(StoreError::Conflict {
                message: format!("integration {} already exists", integration.id),
            });
        }
        integrations.insert(integration.id, integration);
        Ok(())
    }

    async fn find(&self, id: IntegrationId) -> Result<Option<Integration>, StoreError> {
        Ok(self.integrations.read().unwrap().get(&id).cloned())
    }

    async fn find_by_repository_url(
        &self,
        provider: Provider,
        repository_url: &str,
    ) -> Result<Option<Integration>, StoreError> {
        let integrations = self.integrations.read().unwrap();
        Ok(integrations
            .values()
            .find(|i| i.provider == provider && i.matches_repository_url(repository_url))
            .cloned())
    }
}

// ============================================================================
// Entity Store
// ============================================================================

/// Thread-safe in-memory entity store
#[derive(Clone, Default)]
pub struct InMemoryEntityStore {
    commits: Arc<RwLock<HashMap<CommitId, Commit>>>,
    branches: Arc<RwLock<HashMap<BranchId, Branch>>>,
    pull_requests: Arc<RwLock<HashMap<PullRequestId, PullRequest>>>,
}

impl InMemoryEntityStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn find_commit(
        &self,
        integration: IntegrationId,
        sha: &CommitSha,
    ) -> Result<Option<Commit>, StoreError> {
        let commits = self.commits.read().unwrap();
        Ok(commits
            .values()
            .find(|c| c.integration_id == integration && &c.sha == sha)
            .cloned())
    }

    async fn create_commit(&self, commit: Commit) -> Result<CreateOutcome, StoreError> {
        let mut commits = self.commits.write().unwrap();
        let duplicate = commits
            .values()
            .any(|c| c.integration_id == commit.integration_id && c.sha == commit.sha);
        if duplicate {
            return Ok(CreateOutcome::AlreadyExists);
        }
        commits.insert(commit.id, commit);
        Ok(CreateOutcome::Created)
    }

    async fn find_branch(
        &self,
        integration: IntegrationId,
        name: &str,
    ) -> Result<Option<Branch>, StoreError> {
        let branches = self.branches.read().unwrap();
        Ok(branches
            .values()
            .find(|b| b.integration_id == integration && b.name == name)
            .cloned())
    }

    async fn create_branch(&self, branch: Branch) -> Result<CreateOutcome, StoreError> {
        let mut branches = self.branches.write().unwrap();
        let duplicate = branches
            .values()
            .any(|b| b.integration_id == branch.integration_id && b.name == branch.name);
        if duplicate {
            return Ok(CreateOutcome::AlreadyExists);
        }
        branches.insert(branch.id, branch);
        Ok(CreateOutcome::Created)
    }

    async fn update_branch(&self, branch: Branch) -> Result<(), StoreError> {
        let mut branches = self.branches.write().unwrap();
        if !branches.contains_key(&branch.id) {
            return Err(StoreError::NotFound {
                entity: "branch",
                id: branch.id.to_string(),
            });
        }
        branches.insert(branch.id, branch);
        Ok(())
    }

    async fn find_pull_request(
        &self,
        integration: IntegrationId,
        number: u64,
    ) -> Result<Option<PullRequest>, StoreError> {
        let pull_requests = self.pull_requests.read().unwrap();
        Ok(pull_requests
            .values()
            .find(|p| p.integration_id == integration && p.number == number)
            .cloned())
    }

    async fn create_pull_request(&self, pr: PullRequest) -> Result<CreateOutcome, StoreError> {
        let mut pull_requests = self.pull_requests.write().unwrap();
        let duplicate = pull_requests
            .values()
            .any(|p| p.integration_id == pr.integration_id && p.number == pr.number);
        if duplicate {
            return Ok(CreateOutcome::AlreadyExists);
        }
        pull_requests.insert(pr.id, pr);
        Ok(CreateOutcome::Created)
    }

    async fn update_pull_request(&self, pr: PullRequest) -> Result<(), StoreError> {
        let mut pull_requests = self.pull_requests.write().unwrap();
        if !pull_requests.contains_key(&pr.id) {
            return Err(StoreError::NotFound {
                entity: "pull_request",
                id: pr.id.to_string(),
            });
        }
        pull_requests.insert(pr.id, pr);
        Ok(())
    }
}

// ============================================================================
// Link Store
// ============================================================================

/// Thread-safe in-memory link store
///
/// Uniqueness is per `(entity, task)` pair; the insertion order of links is
/// preserved for deterministic reads.
#[derive(Clone, Default)]
pub struct InMemoryLinkStore {
    commit_links: Arc<RwLock<Vec<CommitTaskLink>>>,
    pull_request_links: Arc<RwLock<Vec<PullRequestTaskLink>>>,
}

impl InMemoryLinkStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LinkStore for InMemoryLinkStore {
    async fn find_commit_links(
        &self,
        commit: CommitId,
    ) -> Result<Vec<CommitTaskLink>, StoreError> {
        let links = self.commit_links.read().unwrap();
        Ok(links
            .iter()
            .filter(|l| l.commit_id == commit)
            .cloned()
            .collect())
    }

    async fn create_commit_link(
        &self,
        link: CommitTaskLink,
    ) -> Result<CreateOutcome, StoreError> {
        let mut links = self.commit_links.write().unwrap();
        let duplicate = links
            .iter()
            .any(|l| l.commit_id == link.commit_id && l.task_id == link.task_id);
        if duplicate {
            return Ok(CreateOutcome::AlreadyExists);
        }
        links.push(link);
        Ok(CreateOutcome::Created)
    }

    async fn delete_commit_link(
        &self,
        commit: CommitId,
        task: TaskId,
    ) -> Result<bool, StoreError> {
        let mut links = self.commit_links.write().unwrap();
        let before = links.len();
        links.retain(|l| !(l.commit_id == commit && l.task_id == task));
        Ok(links.len() != before)
    }

    async fn find_pull_request_links(
        &self,
        pull_request: PullRequestId,
    ) -> Result<Vec<PullRequestTaskLink>, StoreError> {
        let links = self.pull_request_links.read().unwrap();
        Ok(links
            .iter()
            .filter(|l| l.pull_request_id == pull_request)
            .cloned()
            .collect())
    }

    async fn create_pull_request_link(
        &self,
        link: PullRequestTaskLink,
    ) -> Result<CreateOutcome, StoreError> {
        let mut links = self.pull_request_links.write().unwrap();
        let duplicate = links
            .iter()
            .any(|l| l.pull_request_id == link.pull_request_id && l.task_id == link.task_id);
        if duplicate {
            return Ok(CreateOutcome::AlreadyExists);
        }
        links.push(link);
        Ok(CreateOutcome::Created)
    }
}

// ============================================================================
// Execution Store
// ============================================================================

/// Thread-safe in-memory smart-commit execution audit trail
#[derive(Clone, Default)]
pub struct InMemoryExecutionStore {
    executions: Arc<RwLock<Vec<SmartCommitExecution>>>,
}

impl InMemoryExecutionStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of recorded executions
    pub fn len(&self) -> usize {
        self.executions.read().unwrap().len()
    }

    /// Check if no executions are recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn insert(&self, execution: SmartCommitExecution) -> Result<(), StoreError> {
        self.executions.write().unwrap().push(execution);
        Ok(())
    }

    async fn find_for_commit(
        &self,
        commit: CommitId,
    ) -> Result<Vec<SmartCommitExecution>, StoreError> {
        let executions = self.executions.read().unwrap();
        Ok(executions
            .iter()
            .filter(|e| e.commit_id == commit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
