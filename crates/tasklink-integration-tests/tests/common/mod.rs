//! Common test utilities for the pipeline integration tests.
//!
//! This module provides:
//! - Hand-rolled fakes for the external work-item capabilities
//! - A pipeline harness over the in-memory stores
//! - Payload builders for provider webhook shapes

// Each test binary compiles this module separately and uses a different
// subset of it.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::sync::{Arc, Mutex, RwLock};
use tasklink_core::adapters::{
    InMemoryEntityStore, InMemoryExecutionStore, InMemoryIntegrationStore, InMemoryLinkStore,
    InMemoryWebhookEventStore,
};
use tasklink_core::{
    Actor, CapabilityError, DirectoryUser, EncryptedToken, EntityUpserter, Integration,
    IntegrationSettings, Label, LabelId, LinkingEngine, OrganizationId, Project, ProjectId,
    Provider, SmartCommitEngine, StatusId, Task, TaskDirectory, TaskId, TaskKey, UserId,
    WebhookDelivery, WebhookEventPipeline, WebhookSecret, WorkItemCommands, WorkflowStatus,
};

pub const REPO_URL: &str = "https://github.com/acme/widgets";

// ============================================================================
// Fake Task Directory
// ============================================================================

/// In-memory work-item directory with organization scoping
#[derive(Default)]
pub struct FakeDirectory {
    tasks: RwLock<Vec<Task>>,
    projects: RwLock<Vec<Project>>,
    users: RwLock<Vec<DirectoryUser>>,
    labels: RwLock<Vec<Label>>,
    statuses: RwLock<Vec<(ProjectId, WorkflowStatus)>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&self, organization: OrganizationId, project: ProjectId, key: &str) -> Task {
        let task = Task {
            id: TaskId::new(),
            key: TaskKey::new(key).unwrap(),
            project_id: project,
            organization_id: organization,
            title: format!("Task {}", key),
        };
        self.tasks.write().unwrap().push(task.clone());
        task
    }

    pub fn add_project(&self, organization: OrganizationId, id: ProjectId, key: &str) -> Project {
        let project = Project {
            id,
            organization_id: organization,
            key: key.to_string(),
            name: format!("Project {}", key),
        };
        self.projects.write().unwrap().push(project.clone());
        project
    }

    pub fn add_user(&self, username: &str) -> DirectoryUser {
        let user = DirectoryUser {
            id: UserId::new(),
            username: username.to_string(),
            display_name: username.to_string(),
        };
        self.users.write().unwrap().push(user.clone());
        user
    }

    pub fn add_status(&self, project: ProjectId, name: &str) -> WorkflowStatus {
        let status = WorkflowStatus {
            id: StatusId::new(),
            name: name.to_string(),
        };
        self.statuses
            .write()
            .unwrap()
            .push((project, status.clone()));
        status
    }

    pub fn label_count(&self) -> usize {
        self.labels.read().unwrap().len()
    }
}

#[async_trait]
impl TaskDirectory for FakeDirectory {
    async fn find_task(
        &self,
        organization: OrganizationId,
        key: &TaskKey,
    ) -> Result<Option<Task>, CapabilityError> {
        Ok(self
            .tasks
            .read()
            .unwrap()
            .iter()
            .find(|t| t.organization_id == organization && &t.key == key)
            .cloned())
    }

    async fn find_task_by_id(&self, id: TaskId) -> Result<Option<Task>, CapabilityError> {
        Ok(self
            .tasks
            .read()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn find_project(&self, id: ProjectId) -> Result<Option<Project>, CapabilityError> {
        Ok(self
            .projects
            .read()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn workflow_statuses(
        &self,
        project: ProjectId,
    ) -> Result<Vec<WorkflowStatus>, CapabilityError> {
        Ok(self
            .statuses
            .read()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == project)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn find_user_by_username(
        &self,
        _organization: OrganizationId,
        username: &str,
    ) -> Result<Option<DirectoryUser>, CapabilityError> {
        Ok(self
            .users
            .read()
            .unwrap()
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_label(
        &self,
        _organization: OrganizationId,
        name: &str,
    ) -> Result<Option<Label>, CapabilityError> {
        Ok(self
            .labels
            .read()
            .unwrap()
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn create_label(
        &self,
        _organization: OrganizationId,
        name: &str,
        color: &str,
    ) -> Result<Label, CapabilityError> {
        let label = Label {
            id: LabelId::new(),
            name: name.to_string(),
            color: color.to_string(),
        };
        self.labels.write().unwrap().push(label.clone());
        Ok(label)
    }
}

// ============================================================================
// Recording Work-Item Commands
// ============================================================================

/// One recorded capability invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandCall {
    Transition(TaskId, StatusId),
    Comment(TaskId, String),
    Assign(TaskId, UserId),
    Label(TaskId, LabelId),
    Time(TaskId, u32),
}

/// Command sink that records every call and can be scripted to fail
#[derive(Default)]
pub struct RecordingCommands {
    calls: Mutex<Vec<CommandCall>>,
    fail_comments: Mutex<bool>,
}

impl RecordingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every add_comment call fail from now on
    pub fn fail_comments(&self) {
        *self.fail_comments.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<CommandCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn comment_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, CommandCall::Comment(_, _)))
            .count()
    }
}

#[async_trait]
impl WorkItemCommands for RecordingCommands {
    async fn transition_status(
        &self,
        task: TaskId,
        status: StatusId,
        _actor: Actor,
    ) -> Result<(), CapabilityError> {
        self.calls
            .lock()
            .unwrap()
            .push(CommandCall::Transition(task, status));
        Ok(())
    }

    async fn add_comment(
        &self,
        task: TaskId,
        body: &str,
        _actor: Actor,
    ) -> Result<(), CapabilityError> {
        if *self.fail_comments.lock().unwrap() {
            return Err(CapabilityError::Unavailable {
                message: "comment backend down".to_string(),
            });
        }
        self.calls
            .lock()
            .unwrap()
            .push(CommandCall::Comment(task, body.to_string()));
        Ok(())
    }

    async fn assign_task(
        &self,
        task: TaskId,
        assignee: UserId,
        _actor: Actor,
    ) -> Result<(), CapabilityError> {
        self.calls
            .lock()
            .unwrap()
            .push(CommandCall::Assign(task, assignee));
        Ok(())
    }

    async fn add_label(
        &self,
        task: TaskId,
        label: LabelId,
        _actor: Actor,
    ) -> Result<(), CapabilityError> {
        self.calls
            .lock()
            .unwrap()
            .push(CommandCall::Label(task, label));
        Ok(())
    }

    async fn log_time(
        &self,
        task: TaskId,
        minutes: u32,
        _actor: Actor,
    ) -> Result<(), CapabilityError> {
        self.calls
            .lock()
            .unwrap()
            .push(CommandCall::Time(task, minutes));
        Ok(())
    }
}

// ============================================================================
// Pipeline Harness
// ============================================================================

pub struct Harness {
    pub pipeline: WebhookEventPipeline,
    pub events: Arc<InMemoryWebhookEventStore>,
    pub entities: Arc<InMemoryEntityStore>,
    pub links: Arc<InMemoryLinkStore>,
    pub executions: Arc<InMemoryExecutionStore>,
    pub directory: Arc<FakeDirectory>,
    pub commands: Arc<RecordingCommands>,
    pub integration: Integration,
}

/// Build a full pipeline over in-memory stores for one GitHub integration
pub fn github_harness(settings: IntegrationSettings, secret: Option<&str>) -> Harness {
    let mut integration = Integration::new(
        Provider::GitHub,
        OrganizationId::new(),
        ProjectId::new(),
        "acme/widgets",
        REPO_URL,
        EncryptedToken::new("ciphertext"),
    )
    .with_settings(settings);
    if let Some(secret) = secret {
        integration = integration.with_webhook_secret(WebhookSecret::new(secret));
    }

    let events = Arc::new(InMemoryWebhookEventStore::new());
    let integrations = Arc::new(InMemoryIntegrationStore::with_integrations(vec![
        integration.clone(),
    ]));
    let entities = Arc::new(InMemoryEntityStore::new());
    let links = Arc::new(InMemoryLinkStore::new());
    let executions = Arc::new(InMemoryExecutionStore::new());
    let directory = Arc::new(FakeDirectory::new());
    let commands = Arc::new(RecordingCommands::new());

    let pipeline = WebhookEventPipeline::new(
        events.clone(),
        integrations,
        EntityUpserter::new(entities.clone()),
        LinkingEngine::new(entities.clone(), links.clone(), directory.clone()),
        SmartCommitEngine::new(
            links.clone(),
            executions.clone(),
            directory.clone(),
            commands.clone(),
        ),
    );

    Harness {
        pipeline,
        events,
        entities,
        links,
        executions,
        directory,
        commands,
        integration,
    }
}

// ============================================================================
// Payload Builders
// ============================================================================

/// GitHub push payload with a single commit carrying `message`
pub fn push_payload(message: &str) -> serde_json::Value {
    push_payload_with_sha("abcdef1234567890", message)
}

pub fn push_payload_with_sha(sha: &str, message: &str) -> serde_json::Value {
    json!({
        "ref": "refs/heads/main",
        "repository": {
            "html_url": REPO_URL,
            "full_name": "acme/widgets"
        },
        "commits": [{
            "id": sha,
            "message": message,
            "timestamp": "2024-05-01T10:00:00+00:00",
            "url": format!("https://github.com/acme/widgets/commit/{}", sha),
            "author": { "name": "Maria", "email": "maria@example.com" },
            "committer": { "name": "Maria", "email": "maria@example.com" },
            "added": ["src/lib.rs"],
            "modified": [],
            "removed": []
        }]
    })
}

pub fn pull_request_payload(
    number: u64,
    title: &str,
    body: Option<&str>,
    state: &str,
    merged: bool,
) -> serde_json::Value {
    json!({
        "action": if merged { "closed" } else { "opened" },
        "repository": { "html_url": REPO_URL },
        "pull_request": {
            "number": number,
            "title": title,
            "body": body,
            "state": state,
            "draft": false,
            "merged": merged,
            "merged_at": if merged { json!("2024-05-02T09:00:00+00:00") } else { json!(null) },
            "merge_commit_sha": null,
            "head": { "ref": "feature/x", "sha": "abcdef1234567890" },
            "base": { "ref": "main" },
            "user": { "login": "maria" },
            "html_url": format!("https://github.com/acme/widgets/pull/{}", number)
        }
    })
}

pub fn delivery(event_type: &str, payload: &serde_json::Value) -> WebhookDelivery {
    WebhookDelivery::new(
        Provider::GitHub,
        event_type,
        None,
        Bytes::from(serde_json::to_vec(payload).unwrap()),
    )
}

pub fn signed_delivery(
    event_type: &str,
    payload: &serde_json::Value,
    secret: &str,
) -> WebhookDelivery {
    let body = Bytes::from(serde_json::to_vec(payload).unwrap());
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(&body);
    let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

    WebhookDelivery::new(Provider::GitHub, event_type, Some(signature), body)
}
