//! # Entity Module
//!
//! Normalized Commit/Branch/PullRequest records, the payload fragments they
//! are built from, and the idempotent [`EntityUpserter`].
//!
//! Records are keyed by natural identity scoped to an integration:
//! `(integration, sha)` for commits, `(integration, name)` for branches,
//! `(integration, number)` for pull requests. Upserting the same identity
//! twice is a no-op for commits and branches and an in-place field update
//! for pull requests; at-least-once webhook delivery is therefore safe.

use crate::integration::Integration;
use crate::store::{CreateOutcome, EntityStore, StoreError};
use crate::{CommitSha, IntegrationId, ParseError, TaskId, TaskKey, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

uuid_identifier! {
    /// Identifier for a normalized commit record
    CommitId
}

uuid_identifier! {
    /// Identifier for a normalized branch record
    BranchId
}

uuid_identifier! {
    /// Identifier for a normalized pull-request record
    PullRequestId
}

// ============================================================================
// Record Types
// ============================================================================

/// Name and email of a commit author or committer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

/// File-change counts for one commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStats {
    pub files_added: u32,
    pub files_modified: u32,
    pub files_removed: u32,
}

impl ChangeStats {
    /// Total number of touched files
    pub fn total(&self) -> u32 {
        self.files_added + self.files_modified + self.files_removed
    }
}

/// Normalized commit record
///
/// Created once per `(integration, sha)`; never updated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub integration_id: IntegrationId,
    pub sha: CommitSha,
    pub message: String,
    pub author: Signature,
    pub committer: Signature,
    pub authored_at: Timestamp,
    pub branch: Option<String>,
    pub stats: ChangeStats,
    pub url: Option<String>,
    pub created_at: Timestamp,
}

/// Lifecycle status of a branch record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Active,
    Deleted,
}

/// Normalized branch record
///
/// Soft-deleted on provider delete events; never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub integration_id: IntegrationId,
    pub name: String,
    pub task_id: Option<TaskId>,
    pub base_branch: Option<String>,
    pub status: BranchStatus,
    pub created_from_ui: bool,
    pub deleted_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// Lifecycle status of a pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestStatus {
    Open,
    Draft,
    Closed,
    Merged,
}

impl PullRequestStatus {
    /// Derive status from provider flags, in priority order:
    /// merged beats closed beats draft beats open.
    pub fn derive(merged: bool, state: &str, draft: bool) -> Self {
        if merged {
            Self::Merged
        } else if state.eq_ignore_ascii_case("closed") {
            Self::Closed
        } else if draft {
            Self::Draft
        } else {
            Self::Open
        }
    }
}

/// Normalized pull-request record
///
/// Upserted on every relevant event for its number; mutable fields track
/// the provider's latest view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: PullRequestId,
    pub integration_id: IntegrationId,
    pub number: u64,
    pub title: String,
    pub description: Option<String>,
    pub status: PullRequestStatus,
    pub source_branch: Option<String>,
    pub target_branch: Option<String>,
    pub head_sha: Option<CommitSha>,
    pub author_username: Option<String>,
    pub merged_at: Option<Timestamp>,
    pub merge_commit_sha: Option<CommitSha>,
    pub url: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

// ============================================================================
// Payload Fragments
// ============================================================================

/// Errors extracting a fragment from a provider payload
#[derive(Debug, Clone, thiserror::Error)]
pub enum FragmentError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field type: {field}")]
    InvalidFieldType { field: String },
}

fn required_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, FragmentError> {
    value
        .get(field)
        .ok_or_else(|| FragmentError::MissingField {
            field: field.to_string(),
        })?
        .as_str()
        .ok_or_else(|| FragmentError::InvalidFieldType {
            field: field.to_string(),
        })
}

fn optional_str(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(|v| v.as_str()).map(String::from)
}

fn path_count(value: &Value, field: &str) -> u32 {
    value
        .get(field)
        .and_then(|v| v.as_array())
        .map(|a| a.len() as u32)
        .unwrap_or(0)
}

/// One commit entry from a push payload
///
/// GitHub and GitLab use the same shape here: `id`, `message`,
/// `timestamp`, `url`, `author`/`committer` objects, and the
/// `added`/`modified`/`removed` path lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFragment {
    pub sha: String,
    pub message: String,
    pub author: Signature,
    pub committer: Signature,
    pub timestamp: Option<String>,
    pub url: Option<String>,
    pub stats: ChangeStats,
}

impl CommitFragment {
    /// Extract one commit from a push payload's `commits` array entry
    pub fn from_payload(value: &Value) -> Result<Self, FragmentError> {
        let sha = required_str(value, "id")?.to_string();
        let message = required_str(value, "message")?.to_string();

        let author = Self::extract_signature(value, "author")?;
        let committer = match value.get("committer") {
            Some(_) => Self::extract_signature(value, "committer")?,
            None => author.clone(),
        };

        Ok(Self {
            sha,
            message,
            author,
            committer,
            timestamp: optional_str(value, "timestamp"),
            url: optional_str(value, "url"),
            stats: ChangeStats {
                files_added: path_count(value, "added"),
                files_modified: path_count(value, "modified"),
                files_removed: path_count(value, "removed"),
            },
        })
    }

    fn extract_signature(value: &Value, field: &str) -> Result<Signature, FragmentError> {
        let obj = value.get(field).ok_or_else(|| FragmentError::MissingField {
            field: field.to_string(),
        })?;

        Ok(Signature {
            name: required_str(obj, "name")?.to_string(),
            email: optional_str(obj, "email").unwrap_or_default(),
        })
    }
}

/// Branch reference from a create/delete payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchFragment {
    pub name: String,
    /// `branch` or `tag`; only branches are processed
    pub ref_type: String,
    pub base_branch: Option<String>,
}

impl BranchFragment {
    /// Extract the branch reference from a create/delete payload
    pub fn from_payload(value: &Value) -> Result<Self, FragmentError> {
        Ok(Self {
            name: required_str(value, "ref")?.to_string(),
            ref_type: required_str(value, "ref_type")?.to_string(),
            base_branch: optional_str(value, "master_branch"),
        })
    }

    /// Whether this fragment refers to a branch (as opposed to a tag)
    pub fn is_branch(&self) -> bool {
        self.ref_type.eq_ignore_ascii_case("branch")
    }
}

/// Pull-request object from a pull_request payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestFragment {
    pub number: u64,
    pub title: String,
    pub description: Option<String>,
    pub state: String,
    pub draft: bool,
    pub merged: bool,
    pub merged_at: Option<String>,
    pub merge_commit_sha: Option<String>,
    pub source_branch: Option<String>,
    pub target_branch: Option<String>,
    pub head_sha: Option<String>,
    pub author_username: Option<String>,
    pub url: Option<String>,
}

impl PullRequestFragment {
    /// Extract the pull-request object from a pull_request payload
    pub fn from_payload(value: &Value) -> Result<Self, FragmentError> {
        let pr = value
            .get("pull_request")
            .ok_or_else(|| FragmentError::MissingField {
                field: "pull_request".to_string(),
            })?;

        let number = pr
            .get("number")
            .and_then(|n| n.as_u64())
            .ok_or_else(|| FragmentError::MissingField {
                field: "pull_request.number".to_string(),
            })?;

        let title = required_str(pr, "title")?.to_string();

        Ok(Self {
            number,
            title,
            description: optional_str(pr, "body"),
            state: optional_str(pr, "state").unwrap_or_else(|| "open".to_string()),
            draft: pr.get("draft").and_then(|d| d.as_bool()).unwrap_or(false),
            merged: pr.get("merged").and_then(|m| m.as_bool()).unwrap_or(false),
            merged_at: optional_str(pr, "merged_at"),
            merge_commit_sha: optional_str(pr, "merge_commit_sha"),
            source_branch: pr.get("head").and_then(|h| h.get("ref")).and_then(|r| r.as_str()).map(String::from),
            target_branch: pr.get("base").and_then(|b| b.get("ref")).and_then(|r| r.as_str()).map(String::from),
            head_sha: pr.get("head").and_then(|h| h.get("sha")).and_then(|s| s.as_str()).map(String::from),
            author_username: pr.get("user").and_then(|u| u.get("login")).and_then(|l| l.as_str()).map(String::from),
            url: optional_str(pr, "html_url"),
        })
    }

    /// Derive the normalized status for this fragment
    pub fn status(&self) -> PullRequestStatus {
        PullRequestStatus::derive(self.merged, &self.state, self.draft)
    }
}

// ============================================================================
// Upserter
// ============================================================================

/// Result of an identity-keyed upsert
#[derive(Debug, Clone)]
pub enum Upserted<T> {
    /// The record was created by this call
    Created(T),

    /// A record with this identity already existed
    Existing(T),
}

impl<T> Upserted<T> {
    /// Unwrap to the record regardless of how it got there
    pub fn into_inner(self) -> T {
        match self {
            Self::Created(v) | Self::Existing(v) => v,
        }
    }

    /// Borrow the record regardless of how it got there
    pub fn as_inner(&self) -> &T {
        match self {
            Self::Created(v) | Self::Existing(v) => v,
        }
    }

    /// Whether this call created the record
    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Errors from entity upsert operations
#[derive(Debug, thiserror::Error)]
pub enum UpsertError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Idempotent creator of normalized records from payload fragments
///
/// Looks up by natural identity first; races between concurrent deliveries
/// fall through to the store's conflict-as-success create and are resolved
/// by re-reading the winner's row.
#[derive(Clone)]
pub struct EntityUpserter {
    store: Arc<dyn EntityStore>,
}

impl EntityUpserter {
    /// Create new upserter over an entity store
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Create-if-absent for one push commit
    ///
    /// An existing `(integration, sha)` row makes this a no-op. The commit
    /// timestamp is parsed from ISO-8601; an unparseable value falls back
    /// to "now" with a logged error.
    pub async fn upsert_commit(
        &self,
        integration: &Integration,
        fragment: &CommitFragment,
        branch: Option<&str>,
    ) -> Result<Upserted<Commit>, UpsertError> {
        let sha = CommitSha::new(&fragment.sha)?;

        if let Some(existing) = self.store.find_commit(integration.id, &sha).await? {
            debug!(sha = %sha.short(), "Commit already recorded; skipping");
            return Ok(Upserted::Existing(existing));
        }

        let commit = Commit {
            id: CommitId::new(),
            integration_id: integration.id,
            sha: sha.clone(),
            message: fragment.message.clone(),
            author: fragment.author.clone(),
            committer: fragment.committer.clone(),
            authored_at: self.parse_commit_timestamp(fragment),
            branch: branch.map(String::from),
            stats: fragment.stats,
            url: fragment.url.clone(),
            created_at: Timestamp::now(),
        };

        match self.store.create_commit(commit.clone()).await? {
            CreateOutcome::Created => Ok(Upserted::Created(commit)),
            CreateOutcome::AlreadyExists => {
                // Lost a race with a concurrent delivery; the winner's row
                // is authoritative.
                let existing = self
                    .store
                    .find_commit(integration.id, &sha)
                    .await?
                    .ok_or(StoreError::NotFound {
                        entity: "commit",
                        id: sha.to_string(),
                    })?;
                Ok(Upserted::Existing(existing))
            }
        }
    }

    /// Create-if-absent for a branch
    pub async fn upsert_branch(
        &self,
        integration: &Integration,
        name: &str,
        base_branch: Option<&str>,
        created_from_ui: bool,
    ) -> Result<Upserted<Branch>, UpsertError> {
        if let Some(existing) = self.store.find_branch(integration.id, name).await? {
            debug!(branch = %name, "Branch already recorded; skipping");
            return Ok(Upserted::Existing(existing));
        }

        let branch = Branch {
            id: BranchId::new(),
            integration_id: integration.id,
            name: name.to_string(),
            task_id: None,
            base_branch: base_branch.map(String::from),
            status: BranchStatus::Active,
            created_from_ui,
            deleted_at: None,
            created_at: Timestamp::now(),
        };

        match self.store.create_branch(branch.clone()).await? {
            CreateOutcome::Created => Ok(Upserted::Created(branch)),
            CreateOutcome::AlreadyExists => {
                let existing = self
                    .store
                    .find_branch(integration.id, name)
                    .await?
                    .ok_or(StoreError::NotFound {
                        entity: "branch",
                        id: name.to_string(),
                    })?;
                Ok(Upserted::Existing(existing))
            }
        }
    }

    /// Create a branch on behalf of the work-item UI
    ///
    /// Applies the integration's configured branch prefix and attaches the
    /// task up front.
    pub async fn create_branch_from_ui(
        &self,
        integration: &Integration,
        task_id: TaskId,
        task_key: &TaskKey,
        slug: &str,
    ) -> Result<Upserted<Branch>, UpsertError> {
        let prefix = integration
            .settings
            .branch_prefix
            .as_deref()
            .unwrap_or_default();
        let name = if slug.is_empty() {
            format!("{}{}", prefix, task_key)
        } else {
            format!("{}{}-{}", prefix, task_key, slug)
        };

        let mut upserted = self.upsert_branch(integration, &name, None, true).await?;
        if let Upserted::Created(ref mut branch) = upserted {
            branch.task_id = Some(task_id);
            self.store.update_branch(branch.clone()).await?;
        }
        Ok(upserted)
    }

    /// Soft-delete a branch on a provider delete event
    ///
    /// Unknown branches are ignored; an already-deleted branch is returned
    /// unchanged.
    pub async fn mark_branch_deleted(
        &self,
        integration: &Integration,
        name: &str,
    ) -> Result<Option<Branch>, UpsertError> {
        let Some(mut branch) = self.store.find_branch(integration.id, name).await? else {
            debug!(branch = %name, "Delete event for unknown branch; ignoring");
            return Ok(None);
        };

        if branch.status == BranchStatus::Deleted {
            return Ok(Some(branch));
        }

        branch.status = BranchStatus::Deleted;
        branch.deleted_at = Some(Timestamp::now());
        self.store.update_branch(branch.clone()).await?;
        Ok(Some(branch))
    }

    /// Create-or-update for a pull request
    ///
    /// The first event for a number creates the row; later events update
    /// the mutable fields (title, description, status, head, merge
    /// metadata) in place.
    pub async fn upsert_pull_request(
        &self,
        integration: &Integration,
        fragment: &PullRequestFragment,
    ) -> Result<Upserted<PullRequest>, UpsertError> {
        if let Some(existing) = self
            .store
            .find_pull_request(integration.id, fragment.number)
            .await?
        {
            let updated = self.apply_fragment(existing, fragment)?;
            self.store.update_pull_request(updated.clone()).await?;
            return Ok(Upserted::Existing(updated));
        }

        let now = Timestamp::now();
        let pr = PullRequest {
            id: PullRequestId::new(),
            integration_id: integration.id,
            number: fragment.number,
            title: fragment.title.clone(),
            description: fragment.description.clone(),
            status: fragment.status(),
            source_branch: fragment.source_branch.clone(),
            target_branch: fragment.target_branch.clone(),
            head_sha: self.parse_sha(fragment.head_sha.as_deref()),
            author_username: fragment.author_username.clone(),
            merged_at: self.parse_optional_timestamp(fragment.merged_at.as_deref()),
            merge_commit_sha: self.parse_sha(fragment.merge_commit_sha.as_deref()),
            url: fragment.url.clone(),
            created_at: now,
            updated_at: now,
        };

        match self.store.create_pull_request(pr.clone()).await? {
            CreateOutcome::Created => Ok(Upserted::Created(pr)),
            CreateOutcome::AlreadyExists => {
                let existing = self
                    .store
                    .find_pull_request(integration.id, fragment.number)
                    .await?
                    .ok_or(StoreError::NotFound {
                        entity: "pull_request",
                        id: fragment.number.to_string(),
                    })?;
                let updated = self.apply_fragment(existing, fragment)?;
                self.store.update_pull_request(updated.clone()).await?;
                Ok(Upserted::Existing(updated))
            }
        }
    }

    fn apply_fragment(
        &self,
        mut pr: PullRequest,
        fragment: &PullRequestFragment,
    ) -> Result<PullRequest, UpsertError> {
        pr.title = fragment.title.clone();
        pr.description = fragment.description.clone();
        pr.status = fragment.status();
        pr.source_branch = fragment.source_branch.clone();
        pr.target_branch = fragment.target_branch.clone();
        pr.head_sha = self.parse_sha(fragment.head_sha.as_deref());
        pr.merged_at = self.parse_optional_timestamp(fragment.merged_at.as_deref());
        pr.merge_commit_sha = self.parse_sha(fragment.merge_commit_sha.as_deref());
        pr.url = fragment.url.clone();
        pr.updated_at = Timestamp::now();
        Ok(pr)
    }

    fn parse_commit_timestamp(&self, fragment: &CommitFragment) -> Timestamp {
        match fragment.timestamp.as_deref() {
            Some(raw) => Timestamp::from_rfc3339(raw).unwrap_or_else(|_| {
                warn!(
                    sha = %fragment.sha,
                    timestamp = %raw,
                    "Unparseable commit timestamp; falling back to now"
                );
                Timestamp::now()
            }),
            None => Timestamp::now(),
        }
    }

    fn parse_optional_timestamp(&self, raw: Option<&str>) -> Option<Timestamp> {
        raw.and_then(|r| Timestamp::from_rfc3339(r).ok())
    }

    fn parse_sha(&self, raw: Option<&str>) -> Option<CommitSha> {
        raw.and_then(|r| CommitSha::new(r).ok())
    }
}

#[cfg(test)]
#[path = "entities_tests.rs"]
mod tests;
