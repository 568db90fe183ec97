//! # External Capability Traits
//!
//! Interfaces to the collaborators this pipeline consumes but does not own:
//! the work-item directory (tasks, projects, users, labels, workflow
//! statuses), the side-effecting work-item commands, and permission checks.
//!
//! The pipeline depends only on these traits; concrete implementations are
//! injected at runtime. Command capabilities return plain results so that
//! one failing command never unwinds its siblings.

use crate::{Actor, LabelId, OrganizationId, ProjectId, TaskId, TaskKey, UserId, Uuid};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Directory Types
// ============================================================================

/// Identifier for a workflow status within a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusId(Uuid);

impl StatusId {
    /// Generate a new random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for StatusId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StatusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Work-item as seen by this pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub key: TaskKey,
    pub project_id: ProjectId,
    pub organization_id: OrganizationId,
    pub title: String,
}

/// Internal project owning work-items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub organization_id: OrganizationId,
    /// Uppercase project key; task keys are prefixed with it
    pub key: String,
    pub name: String,
}

/// One status in a project's workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub id: StatusId,
    pub name: String,
}

/// Internal user resolvable by username
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
}

/// Work-item label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: LabelId,
    pub name: String,
    /// Hex color, `#rrggbb`
    pub color: String,
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for capability invocations
#[derive(Debug, Clone, thiserror::Error)]
pub enum CapabilityError {
    /// The collaborator rejected the operation (business rule, permissions)
    #[error("Capability rejected operation: {message}")]
    Rejected { message: String },

    /// The collaborator is unreachable or failed internally
    #[error("Capability unavailable: {message}")]
    Unavailable { message: String },
}

impl CapabilityError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Rejected { .. } => false,
            Self::Unavailable { .. } => true,
        }
    }
}

// ============================================================================
// Capability Traits
// ============================================================================

/// Read access to the work-item directory
///
/// Every lookup is scoped: tasks and users by organization, workflow
/// statuses by project. Absent records resolve to `Ok(None)`, never an
/// error, so callers can treat "not found" as a skip.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskDirectory: Send + Sync {
    /// Resolve a task by key within an organization
    async fn find_task(
        &self,
        organization: OrganizationId,
        key: &TaskKey,
    ) -> Result<Option<Task>, CapabilityError>;

    /// Resolve a task by id
    async fn find_task_by_id(&self, id: TaskId) -> Result<Option<Task>, CapabilityError>;

    /// Resolve a project by id
    async fn find_project(&self, id: ProjectId) -> Result<Option<Project>, CapabilityError>;

    /// List the workflow statuses configured for a project
    async fn workflow_statuses(
        &self,
        project: ProjectId,
    ) -> Result<Vec<WorkflowStatus>, CapabilityError>;

    /// Resolve a user by username within an organization
    async fn find_user_by_username(
        &self,
        organization: OrganizationId,
        username: &str,
    ) -> Result<Option<DirectoryUser>, CapabilityError>;

    /// Resolve a label by name within an organization, case-insensitively
    async fn find_label(
        &self,
        organization: OrganizationId,
        name: &str,
    ) -> Result<Option<Label>, CapabilityError>;

    /// Create a label within an organization
    async fn create_label(
        &self,
        organization: OrganizationId,
        name: &str,
        color: &str,
    ) -> Result<Label, CapabilityError>;
}

/// Side-effecting work-item mutations
///
/// Each command either takes effect fully or fails; the caller records the
/// outcome and moves on to the next command.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkItemCommands: Send + Sync {
    /// Transition a task to the given workflow status
    async fn transition_status(
        &self,
        task: TaskId,
        status: StatusId,
        actor: Actor,
    ) -> Result<(), CapabilityError>;

    /// Add a comment to a task
    async fn add_comment(
        &self,
        task: TaskId,
        body: &str,
        actor: Actor,
    ) -> Result<(), CapabilityError>;

    /// Assign a task to a user
    async fn assign_task(
        &self,
        task: TaskId,
        assignee: UserId,
        actor: Actor,
    ) -> Result<(), CapabilityError>;

    /// Attach a label to a task
    async fn add_label(
        &self,
        task: TaskId,
        label: LabelId,
        actor: Actor,
    ) -> Result<(), CapabilityError>;

    /// Log worked time, in minutes, against a task
    async fn log_time(
        &self,
        task: TaskId,
        minutes: u32,
        actor: Actor,
    ) -> Result<(), CapabilityError>;
}

/// Permission checks, owned by the surrounding application
///
/// The webhook pipeline itself does not gate on these; they exist for the
/// request-path callers of the manual link/unlink operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Whether the user may view the project
    async fn can_access(&self, user: UserId, project: ProjectId) -> Result<bool, CapabilityError>;

    /// Whether the user may manage the project's integrations
    async fn can_manage(&self, user: UserId, project: ProjectId) -> Result<bool, CapabilityError>;
}
