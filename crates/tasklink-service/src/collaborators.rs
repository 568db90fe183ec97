//! Stand-in implementations of the external work-item capabilities.
//!
//! This build has no work-item backend wired in. Events are still
//! ingested, verified, persisted, and upserted; task resolution simply
//! finds nothing and side-effecting commands report the missing endpoint.
//! Real deployments inject clients for the surrounding application here.

use async_trait::async_trait;
use tasklink_core::{
    Actor, CapabilityError, DirectoryUser, Label, LabelId, OrganizationId, Project, ProjectId,
    StatusId, Task, TaskDirectory, TaskId, TaskKey, UserId, WorkItemCommands, WorkflowStatus,
};
use tracing::warn;

/// A [`TaskDirectory`] with no backend: every lookup resolves to nothing.
pub struct UnconfiguredTaskDirectory;

impl UnconfiguredTaskDirectory {
    /// Construct the empty directory, warning loudly.
    pub fn new() -> Self {
        warn!(
            "UnconfiguredTaskDirectory is active — task references will not resolve. \
             Configure a work-item directory client to enable linking."
        );
        Self
    }
}

impl Default for UnconfiguredTaskDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskDirectory for UnconfiguredTaskDirectory {
    async fn find_task(
        &self,
        _organization: OrganizationId,
        _key: &TaskKey,
    ) -> Result<Option<Task>, CapabilityError> {
        Ok(None)
    }

    async fn find_task_by_id(&self, _id: TaskId) -> Result<Option<Task>, CapabilityError> {
        Ok(None)
    }

    async fn find_project(&self, _id: ProjectId) -> Result<Option<Project>, CapabilityError> {
        Ok(None)
    }

    async fn workflow_statuses(
        &self,
        _project: ProjectId,
    ) -> Result<Vec<WorkflowStatus>, CapabilityError> {
        Ok(Vec::new())
    }

    async fn find_user_by_username(
        &self,
        _organization: OrganizationId,
        _username: &str,
    ) -> Result<Option<DirectoryUser>, CapabilityError> {
        Ok(None)
    }

    async fn find_label(
        &self,
        _organization: OrganizationId,
        _name: &str,
    ) -> Result<Option<Label>, CapabilityError> {
        Ok(None)
    }

    async fn create_label(
        &self,
        _organization: OrganizationId,
        _name: &str,
        _color: &str,
    ) -> Result<Label, CapabilityError> {
        Err(unconfigured())
    }
}

/// A [`WorkItemCommands`] with no backend: every command reports the
/// missing endpoint as an unavailable capability.
pub struct UnconfiguredWorkItemCommands;

impl UnconfiguredWorkItemCommands {
    /// Construct the unconfigured command sink.
    pub fn new() -> Self {
        Self
    }
}

impl Default for UnconfiguredWorkItemCommands {
    fn default() -> Self {
        Self::new()
    }
}

fn unconfigured() -> CapabilityError {
    CapabilityError::Unavailable {
        message: "work-item command endpoint is not configured".to_string(),
    }
}

#[async_trait]
impl WorkItemCommands for UnconfiguredWorkItemCommands {
    async fn transition_status(
        &self,
        _task: TaskId,
        _status: StatusId,
        _actor: Actor,
    ) -> Result<(), CapabilityError> {
        Err(unconfigured())
    }

    async fn add_comment(
        &self,
        _task: TaskId,
        _body: &str,
        _actor: Actor,
    ) -> Result<(), CapabilityError> {
        Err(unconfigured())
    }

    async fn assign_task(
        &self,
        _task: TaskId,
        _assignee: UserId,
        _actor: Actor,
    ) -> Result<(), CapabilityError> {
        Err(unconfigured())
    }

    async fn add_label(
        &self,
        _task: TaskId,
        _label: LabelId,
        _actor: Actor,
    ) -> Result<(), CapabilityError> {
        Err(unconfigured())
    }

    async fn log_time(
        &self,
        _task: TaskId,
        _minutes: u32,
        _actor: Actor,
    ) -> Result<(), CapabilityError> {
        Err(unconfigured())
    }
}
