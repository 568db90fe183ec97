//! # Linking Module
//!
//! Resolves task references extracted from branches, commits, and pull
//! requests to work-items and records typed links.
//!
//! Links carry their provenance (manual, commit message, PR title, PR
//! description) and are unique per `(entity, task)`. Automatic linking
//! skips anything it cannot resolve; only the manual link/unlink surface
//! rejects with typed errors.

use crate::capabilities::{CapabilityError, Project, Task, TaskDirectory};
use crate::entities::{Branch, Commit, CommitId, PullRequest, PullRequestId};
use crate::integration::Integration;
use crate::refs::ReferenceParser;
use crate::store::{CreateOutcome, EntityStore, LinkStore, StoreError};
use crate::{ParseError, TaskId, TaskKey, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

uuid_identifier! {
    /// Identifier for an entity↔task link record
    LinkId
}

// ============================================================================
// Link Types
// ============================================================================

/// Provenance of an entity↔task association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMethod {
    /// Linked explicitly by a user
    Manual,
    /// Task key found in a commit message
    CommitMessage,
    /// Task key found in a pull-request title
    PrTitle,
    /// Task key found in a pull-request description
    PrDescription,
}

/// Unique association between a commit and a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitTaskLink {
    pub id: LinkId,
    pub commit_id: CommitId,
    pub task_id: TaskId,
    pub method: LinkMethod,
    pub created_at: Timestamp,
}

/// Unique association between a pull request and a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestTaskLink {
    pub id: LinkId,
    pub pull_request_id: PullRequestId,
    pub task_id: TaskId,
    pub method: LinkMethod,
    /// Whether a closing keyword marked the PR as completing this task
    pub closes_task: bool,
    pub created_at: Timestamp,
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors from linking operations
///
/// Automatic (pipeline) linking only ever surfaces `Store`/`Capability`
/// failures; the remaining variants belong to the manual surface.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Task not found: {key}")]
    TaskNotFound { key: TaskKey },

    #[error("Project not found for integration")]
    ProjectNotFound,

    #[error("Link already exists for task {key}")]
    DuplicateLink { key: TaskKey },

    #[error("Task {key} does not belong to project '{project_key}'")]
    CrossProjectMismatch { key: TaskKey, project_key: String },

    #[error("No link exists between this commit and task")]
    NotLinked,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),
}

// ============================================================================
// Linking Engine
// ============================================================================

/// Records typed links between normalized entities and work-items
#[derive(Clone)]
pub struct LinkingEngine {
    entities: Arc<dyn EntityStore>,
    links: Arc<dyn LinkStore>,
    directory: Arc<dyn TaskDirectory>,
}

impl LinkingEngine {
    /// Create new linking engine
    pub fn new(
        entities: Arc<dyn EntityStore>,
        links: Arc<dyn LinkStore>,
        directory: Arc<dyn TaskDirectory>,
    ) -> Self {
        Self {
            entities,
            links,
            directory,
        }
    }

    /// Attach a task to a branch based on its name
    ///
    /// Extracts the first task key from the branch name and resolves it
    /// within the integration's organization. No reference or no matching
    /// task is a no-op.
    pub async fn link_branch(
        &self,
        integration: &Integration,
        branch: &Branch,
    ) -> Result<Option<Task>, LinkError> {
        let Some(key) = ReferenceParser::extract_task_key_from_branch(&branch.name) else {
            return Ok(None);
        };

        let Some(task) = self
            .directory
            .find_task(integration.organization_id, &key)
            .await?
        else {
            debug!(key = %key, branch = %branch.name, "Branch references unknown task; skipping");
            return Ok(None);
        };

        if branch.task_id == Some(task.id) {
            return Ok(Some(task));
        }

        let mut updated = branch.clone();
        updated.task_id = Some(task.id);
        self.entities.update_branch(updated).await?;

        debug!(key = %key, branch = %branch.name, "Branch linked to task");
        Ok(Some(task))
    }

    /// Link a commit to every resolvable task referenced in its message
    ///
    /// Existing links are left untouched; returns the full set of tasks now
    /// linked to the commit, existing and newly created alike.
    pub async fn link_commit(
        &self,
        integration: &Integration,
        commit: &Commit,
    ) -> Result<Vec<Task>, LinkError> {
        let keys = ReferenceParser::extract_references(&commit.message);

        for key in &keys {
            let Some(task) = self
                .directory
                .find_task(integration.organization_id, key)
                .await?
            else {
                debug!(key = %key, sha = %commit.sha.short(), "Unresolvable task reference; skipping");
                continue;
            };

            self.create_commit_link(commit.id, task.id, LinkMethod::CommitMessage)
                .await?;
        }

        self.linked_tasks_for_commit(commit.id).await
    }

    /// Link a pull request to every resolvable task referenced in its
    /// title or description
    ///
    /// Keys from the title take precedence for the link method; the
    /// closes-task flag is computed fresh from both texts. Existing links
    /// are left untouched.
    pub async fn link_pull_request(
        &self,
        integration: &Integration,
        pr: &PullRequest,
    ) -> Result<Vec<Task>, LinkError> {
        let description = pr.description.as_deref().unwrap_or_default();
        let title_keys = ReferenceParser::extract_references(&pr.title);
        let description_keys = ReferenceParser::extract_references(description);

        // Ordered union: title keys first, then unseen description keys.
        let mut keys = title_keys.clone();
        for key in description_keys {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }

        for key in &keys {
            let Some(task) = self
                .directory
                .find_task(integration.organization_id, key)
                .await?
            else {
                debug!(key = %key, pr = pr.number, "Unresolvable task reference; skipping");
                continue;
            };

            let method = if title_keys.contains(key) {
                LinkMethod::PrTitle
            } else {
                LinkMethod::PrDescription
            };
            let closes_task = ReferenceParser::detects_closing_keyword(&pr.title, key)
                || ReferenceParser::detects_closing_keyword(description, key);

            let link = PullRequestTaskLink {
                id: LinkId::new(),
                pull_request_id: pr.id,
                task_id: task.id,
                method,
                closes_task,
                created_at: Timestamp::now(),
            };
            self.links.create_pull_request_link(link).await?;
        }

        self.linked_tasks_for_pull_request(pr.id).await
    }

    /// Check that a task key's project prefix matches the project's key
    pub fn validate_task_belongs_to_project(task_key: &TaskKey, project: &Project) -> bool {
        task_key.project_key().eq_ignore_ascii_case(&project.key)
    }

    /// Explicitly link a commit to a task on behalf of a user
    ///
    /// Unlike the automatic path, this rejects: unknown project, a key
    /// outside the integration's project, an unresolvable task, and a
    /// duplicate link are all typed errors.
    pub async fn link_commit_manually(
        &self,
        integration: &Integration,
        commit: &Commit,
        key: &TaskKey,
    ) -> Result<Task, LinkError> {
        let project = self
            .directory
            .find_project(integration.project_id)
            .await?
            .ok_or(LinkError::ProjectNotFound)?;

        if !Self::validate_task_belongs_to_project(key, &project) {
            return Err(LinkError::CrossProjectMismatch {
                key: key.clone(),
                project_key: project.key,
            });
        }

        let task = self
            .directory
            .find_task(integration.organization_id, key)
            .await?
            .ok_or_else(|| LinkError::TaskNotFound { key: key.clone() })?;

        match self
            .create_commit_link(commit.id, task.id, LinkMethod::Manual)
            .await?
        {
            CreateOutcome::Created => Ok(task),
            CreateOutcome::AlreadyExists => Err(LinkError::DuplicateLink { key: key.clone() }),
        }
    }

    /// Remove an explicit commit↔task link
    pub async fn unlink_commit(&self, commit: CommitId, task: TaskId) -> Result<(), LinkError> {
        if self.links.delete_commit_link(commit, task).await? {
            Ok(())
        } else {
            Err(LinkError::NotLinked)
        }
    }

    async fn create_commit_link(
        &self,
        commit: CommitId,
        task: TaskId,
        method: LinkMethod,
    ) -> Result<CreateOutcome, LinkError> {
        let link = CommitTaskLink {
            id: LinkId::new(),
            commit_id: commit,
            task_id: task,
            method,
            created_at: Timestamp::now(),
        };
        Ok(self.links.create_commit_link(link).await?)
    }

    async fn linked_tasks_for_commit(&self, commit: CommitId) -> Result<Vec<Task>, LinkError> {
        let mut tasks = Vec::new();
        for link in self.links.find_commit_links(commit).await? {
            match self.directory.find_task_by_id(link.task_id).await? {
                Some(task) => tasks.push(task),
                None => warn!(task_id = %link.task_id, "Linked task no longer resolvable"),
            }
        }
        Ok(tasks)
    }

    async fn linked_tasks_for_pull_request(
        &self,
        pr: PullRequestId,
    ) -> Result<Vec<Task>, LinkError> {
        let mut tasks = Vec::new();
        for link in self.links.find_pull_request_links(pr).await? {
            match self.directory.find_task_by_id(link.task_id).await? {
                Some(task) => tasks.push(task),
                None => warn!(task_id = %link.task_id, "Linked task no longer resolvable"),
            }
        }
        Ok(tasks)
    }
}

#[cfg(test)]
#[path = "linking_tests.rs"]
mod tests;
