//! Tests for the webhook event pipeline.

use super::*;
use crate::adapters::{
    InMemoryEntityStore, InMemoryExecutionStore, InMemoryIntegrationStore, InMemoryLinkStore,
    InMemoryWebhookEventStore,
};
use crate::capabilities::{MockTaskDirectory, MockWorkItemCommands, Task};
use crate::entities::BranchStatus;
use crate::integration::{EncryptedToken, IntegrationSettings, WebhookSecret};
use crate::store::{EntityStore, LinkStore};
use crate::webhook::{EventState, WebhookDelivery};
use crate::{CommitSha, OrganizationId, ProjectId, Provider, TaskId, TaskKey};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;

const REPO_URL: &str = "https://github.com/acme/widgets";

struct Harness {
    pipeline: WebhookEventPipeline,
    events: Arc<InMemoryWebhookEventStore>,
    entities: Arc<InMemoryEntityStore>,
    links: Arc<InMemoryLinkStore>,
    executions: Arc<InMemoryExecutionStore>,
    integration: Integration,
}

fn directory_serving(tasks: Vec<Task>) -> MockTaskDirectory {
    let by_key: HashMap<TaskKey, Task> =
        tasks.iter().map(|t| (t.key.clone(), t.clone())).collect();
    let by_id: HashMap<TaskId, Task> = tasks.iter().map(|t| (t.id, t.clone())).collect();

    let mut directory = MockTaskDirectory::new();
    directory
        .expect_find_task()
        .returning(move |_, key| Ok(by_key.get(key).cloned()));
    directory
        .expect_find_task_by_id()
        .returning(move |id| Ok(by_id.get(&id).cloned()));
    directory
}

fn harness_with(
    settings: IntegrationSettings,
    secret: Option<&str>,
    directory: MockTaskDirectory,
    commands: MockWorkItemCommands,
) -> Harness {
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

    let directory: Arc<MockTaskDirectory> = Arc::new(directory);
    let upserter = EntityUpserter::new(entities.clone());
    let linker = LinkingEngine::new(entities.clone(), links.clone(), directory.clone());
    let smart_commits = SmartCommitEngine::new(
        links.clone(),
        executions.clone(),
        directory,
        Arc::new(commands),
    );

    let pipeline = WebhookEventPipeline::new(
        events.clone(),
        integrations,
        upserter,
        linker,
        smart_commits,
    );

    Harness {
        pipeline,
        events,
        entities,
        links,
        executions,
        integration,
    }
}

fn push_payload(message: &str) -> serde_json::Value {
    json!({
        "ref": "refs/heads/main",
        "repository": {
            "html_url": REPO_URL,
            "full_name": "acme/widgets"
        },
        "commits": [{
            "id": "abcdef1234567890",
            "message": message,
            "timestamp": "2024-05-01T10:00:00+00:00",
            "url": "https://github.com/acme/widgets/commit/abcdef1",
            "author": { "name": "Maria", "email": "maria@example.com" },
            "committer": { "name": "Maria", "email": "maria@example.com" },
            "added": ["src/lib.rs"],
            "modified": [],
            "removed": []
        }]
    })
}

fn delivery(provider: Provider, event_type: &str, payload: &serde_json::Value) -> WebhookDelivery {
    WebhookDelivery::new(
        provider,
        event_type,
        None,
        Bytes::from(serde_json::to_vec(payload).unwrap()),
    )
}

fn github_signature(body: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn test_receive_resolves_integration_and_persists() {
    let h = harness_with(
        IntegrationSettings::default(),
        None,
        MockTaskDirectory::new(),
        MockWorkItemCommands::new(),
    );

    let event = h
        .pipeline
        .receive(delivery(Provider::GitHub, "push", &push_payload("msg")))
        .await
        .unwrap();

    assert_eq!(event.state, EventState::Received);
    assert_eq!(event.integration_id, Some(h.integration.id));
    assert_eq!(event.signature_valid, None);

    let stored = h.events.find(event.id).await.unwrap().unwrap();
    assert_eq!(stored.event_type, "push");
}

#[tokio::test]
async fn test_unmatched_repository_is_informational_only() {
    let h = harness_with(
        IntegrationSettings::default(),
        None,
        MockTaskDirectory::new(),
        MockWorkItemCommands::new(),
    );

    let mut payload = push_payload("PROJ-1 work");
    payload["repository"]["html_url"] = json!("https://github.com/other/repo");

    let event = h
        .pipeline
        .receive(delivery(Provider::GitHub, "push", &payload))
        .await
        .unwrap();
    assert!(event.integration_id.is_none());

    h.pipeline.run(event.id).await.unwrap();

    let stored = h.events.find(event.id).await.unwrap().unwrap();
    assert!(stored.is_processed());

    // No entities were touched.
    let sha = CommitSha::new("abcdef1234567890").unwrap();
    assert!(h
        .entities
        .find_commit(h.integration.id, &sha)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_invalid_signature_recorded_but_not_processed() {
    let h = harness_with(
        IntegrationSettings::default(),
        Some("topsecret"),
        MockTaskDirectory::new(),
        MockWorkItemCommands::new(),
    );

    let payload = push_payload("PROJ-1 work");
    let body = Bytes::from(serde_json::to_vec(&payload).unwrap());
    let bad = WebhookDelivery::new(
        Provider::GitHub,
        "push",
        Some("sha256=0000000000000000000000000000000000000000000000000000000000000000".into()),
        body,
    );

    let event = h.pipeline.receive(bad).await.unwrap();
    assert_eq!(event.signature_valid, Some(false));

    h.pipeline.run(event.id).await.unwrap();

    let stored = h.events.find(event.id).await.unwrap().unwrap();
    assert!(stored.is_processed());

    let sha = CommitSha::new("abcdef1234567890").unwrap();
    assert!(h
        .entities
        .find_commit(h.integration.id, &sha)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_valid_signature_allows_processing() {
    let h = harness_with(
        IntegrationSettings::default(),
        Some("topsecret"),
        directory_serving(vec![]),
        MockWorkItemCommands::new(),
    );

    let payload = push_payload("no refs");
    let body = Bytes::from(serde_json::to_vec(&payload).unwrap());
    let signature = github_signature(&body, "topsecret");
    let good = WebhookDelivery::new(Provider::GitHub, "push", Some(signature), body);

    let event = h.pipeline.receive(good).await.unwrap();
    assert_eq!(event.signature_valid, Some(true));

    h.pipeline.run(event.id).await.unwrap();

    let sha = CommitSha::new("abcdef1234567890").unwrap();
    assert!(h
        .entities
        .find_commit(h.integration.id, &sha)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_push_upserts_and_links_commit() {
    let task = Task {
        id: TaskId::new(),
        key: TaskKey::new("PROJ-1").unwrap(),
        project_id: ProjectId::new(),
        organization_id: OrganizationId::new(),
        title: "Task PROJ-1".to_string(),
    };
    let h = harness_with(
        IntegrationSettings::default(),
        None,
        directory_serving(vec![task]),
        MockWorkItemCommands::new(),
    );

    let event = h
        .pipeline
        .receive(delivery(
            Provider::GitHub,
            "push",
            &push_payload("PROJ-1 fix the build"),
        ))
        .await
        .unwrap();
    h.pipeline.run(event.id).await.unwrap();

    let sha = CommitSha::new("abcdef1234567890").unwrap();
    let commit = h
        .entities
        .find_commit(h.integration.id, &sha)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(commit.branch.as_deref(), Some("main"));

    let links = h.links.find_commit_links(commit.id).await.unwrap();
    assert_eq!(links.len(), 1);
}

#[tokio::test]
async fn test_push_redelivery_is_idempotent_for_entities() {
    let h = harness_with(
        IntegrationSettings::default(),
        None,
        directory_serving(vec![]),
        MockWorkItemCommands::new(),
    );
    let payload = push_payload("PROJ-1 work");

    for _ in 0..2 {
        let event = h
            .pipeline
            .receive(delivery(Provider::GitHub, "push", &payload))
            .await
            .unwrap();
        h.pipeline.run(event.id).await.unwrap();
    }

    // Two deliveries, one commit row.
    let sha = CommitSha::new("abcdef1234567890").unwrap();
    assert!(h
        .entities
        .find_commit(h.integration.id, &sha)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_smart_commits_execute_when_enabled() {
    let task = Task {
        id: TaskId::new(),
        key: TaskKey::new("PROJ-1").unwrap(),
        project_id: ProjectId::new(),
        organization_id: OrganizationId::new(),
        title: "Task PROJ-1".to_string(),
    };

    let mut commands = MockWorkItemCommands::new();
    commands
        .expect_add_comment()
        .times(1)
        .returning(|_, _, _| Ok(()));

    let h = harness_with(
        IntegrationSettings {
            smart_commits_enabled: true,
            ..IntegrationSettings::default()
        },
        None,
        directory_serving(vec![task]),
        commands,
    );

    let event = h
        .pipeline
        .receive(delivery(
            Provider::GitHub,
            "push",
            &push_payload("PROJ-1 done #comment nice work"),
        ))
        .await
        .unwrap();
    h.pipeline.run(event.id).await.unwrap();

    assert_eq!(h.executions.len(), 1);
}

#[tokio::test]
async fn test_pull_request_upserted_and_linked() {
    let task = Task {
        id: TaskId::new(),
        key: TaskKey::new("PROJ-3").unwrap(),
        project_id: ProjectId::new(),
        organization_id: OrganizationId::new(),
        title: "Task PROJ-3".to_string(),
    };
    let h = harness_with(
        IntegrationSettings::default(),
        None,
        directory_serving(vec![task]),
        MockWorkItemCommands::new(),
    );

    let payload = json!({
        "action": "opened",
        "repository": { "html_url": REPO_URL },
        "pull_request": {
            "number": 3,
            "title": "PROJ-3 tighten validation",
            "body": "Closes PROJ-3",
            "state": "open",
            "draft": false,
            "merged": false,
            "head": { "ref": "feature/PROJ-3", "sha": "abcdef1234567890" },
            "base": { "ref": "main" },
            "user": { "login": "maria" },
            "html_url": "https://github.com/acme/widgets/pull/3"
        }
    });

    let event = h
        .pipeline
        .receive(delivery(Provider::GitHub, "pull_request", &payload))
        .await
        .unwrap();
    assert_eq!(event.event_action.as_deref(), Some("opened"));

    h.pipeline.run(event.id).await.unwrap();

    let pr = h
        .entities
        .find_pull_request(h.integration.id, 3)
        .await
        .unwrap()
        .unwrap();
    let links = h.links.find_pull_request_links(pr.id).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].method, crate::linking::LinkMethod::PrTitle);
    assert!(links[0].closes_task);
}

#[tokio::test]
async fn test_branch_create_and_delete_lifecycle() {
    let task = Task {
        id: TaskId::new(),
        key: TaskKey::new("PROJ-7").unwrap(),
        project_id: ProjectId::new(),
        organization_id: OrganizationId::new(),
        title: "Task PROJ-7".to_string(),
    };
    let task_id = task.id;
    let h = harness_with(
        IntegrationSettings::default(),
        None,
        directory_serving(vec![task]),
        MockWorkItemCommands::new(),
    );

    let create = json!({
        "ref": "feature/PROJ-7-login",
        "ref_type": "branch",
        "master_branch": "main",
        "repository": { "html_url": REPO_URL }
    });
    let event = h
        .pipeline
        .receive(delivery(Provider::GitHub, "create", &create))
        .await
        .unwrap();
    h.pipeline.run(event.id).await.unwrap();

    let branch = h
        .entities
        .find_branch(h.integration.id, "feature/PROJ-7-login")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(branch.status, BranchStatus::Active);
    assert_eq!(branch.task_id, Some(task_id));
    assert_eq!(branch.base_branch.as_deref(), Some("main"));
    assert!(!branch.created_from_ui);

    let delete = json!({
        "ref": "feature/PROJ-7-login",
        "ref_type": "branch",
        "repository": { "html_url": REPO_URL }
    });
    let event = h
        .pipeline
        .receive(delivery(Provider::GitHub, "delete", &delete))
        .await
        .unwrap();
    h.pipeline.run(event.id).await.unwrap();

    let branch = h
        .entities
        .find_branch(h.integration.id, "feature/PROJ-7-login")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(branch.status, BranchStatus::Deleted);
    assert!(branch.deleted_at.is_some());
}

#[tokio::test]
async fn test_tag_create_is_ignored() {
    let h = harness_with(
        IntegrationSettings::default(),
        None,
        MockTaskDirectory::new(),
        MockWorkItemCommands::new(),
    );

    let create = json!({
        "ref": "v1.0.0",
        "ref_type": "tag",
        "repository": { "html_url": REPO_URL }
    });
    let event = h
        .pipeline
        .receive(delivery(Provider::GitHub, "create", &create))
        .await
        .unwrap();
    h.pipeline.run(event.id).await.unwrap();

    assert!(h
        .entities
        .find_branch(h.integration.id, "v1.0.0")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_unsupported_event_type_is_ignored_not_failed() {
    let h = harness_with(
        IntegrationSettings::default(),
        None,
        MockTaskDirectory::new(),
        MockWorkItemCommands::new(),
    );

    let payload = json!({ "repository": { "html_url": REPO_URL } });
    let event = h
        .pipeline
        .receive(delivery(Provider::GitHub, "workflow_run", &payload))
        .await
        .unwrap();
    h.pipeline.run(event.id).await.unwrap();

    let stored = h.events.find(event.id).await.unwrap().unwrap();
    assert!(stored.is_processed());
}

#[tokio::test]
async fn test_failed_run_records_error_and_retry_resets() {
    let h = harness_with(
        IntegrationSettings::default(),
        None,
        MockTaskDirectory::new(),
        MockWorkItemCommands::new(),
    );

    // pull_request event without the pull_request object fails extraction.
    let payload = json!({
        "action": "opened",
        "repository": { "html_url": REPO_URL }
    });
    let event = h
        .pipeline
        .receive(delivery(Provider::GitHub, "pull_request", &payload))
        .await
        .unwrap();

    assert!(h.pipeline.run(event.id).await.is_err());

    let stored = h.events.find(event.id).await.unwrap().unwrap();
    assert_eq!(stored.state, EventState::Failed);
    assert!(stored
        .processing_error
        .as_deref()
        .unwrap()
        .contains("pull_request"));
    assert_eq!(stored.retry_count, 0);

    // Retry resets metadata, increments the count, and re-runs (failing
    // again on the same payload).
    assert!(h.pipeline.retry(event.id).await.is_err());

    let stored = h.events.find(event.id).await.unwrap().unwrap();
    assert_eq!(stored.state, EventState::Failed);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.processing_error.is_some());
}

#[tokio::test]
async fn test_retry_of_processed_event_is_rejected() {
    let h = harness_with(
        IntegrationSettings::default(),
        None,
        directory_serving(vec![]),
        MockWorkItemCommands::new(),
    );

    let event = h
        .pipeline
        .receive(delivery(Provider::GitHub, "push", &push_payload("msg")))
        .await
        .unwrap();
    h.pipeline.run(event.id).await.unwrap();

    assert!(h.pipeline.retry(event.id).await.is_err());
}

#[tokio::test]
async fn test_gitlab_push_hook_shares_commit_flow() {
    let task = Task {
        id: TaskId::new(),
        key: TaskKey::new("PROJ-1").unwrap(),
        project_id: ProjectId::new(),
        organization_id: OrganizationId::new(),
        title: "Task PROJ-1".to_string(),
    };

    let mut integration = Integration::new(
        Provider::GitLab,
        OrganizationId::new(),
        ProjectId::new(),
        "acme/widgets",
        "https://gitlab.com/acme/widgets",
        EncryptedToken::new("ciphertext"),
    );
    integration = integration.with_webhook_secret(WebhookSecret::new("glpat-token"));

    let events = Arc::new(InMemoryWebhookEventStore::new());
    let integrations = Arc::new(InMemoryIntegrationStore::with_integrations(vec![
        integration.clone(),
    ]));
    let entities = Arc::new(InMemoryEntityStore::new());
    let links = Arc::new(InMemoryLinkStore::new());
    let executions = Arc::new(InMemoryExecutionStore::new());
    let directory: Arc<MockTaskDirectory> = Arc::new(directory_serving(vec![task]));

    let pipeline = WebhookEventPipeline::new(
        events.clone(),
        integrations,
        EntityUpserter::new(entities.clone()),
        LinkingEngine::new(entities.clone(), links.clone(), directory.clone()),
        SmartCommitEngine::new(
            links.clone(),
            executions,
            directory,
            Arc::new(MockWorkItemCommands::new()),
        ),
    );

    let payload = json!({
        "ref": "refs/heads/main",
        "project": { "web_url": "https://gitlab.com/acme/widgets" },
        "commits": [{
            "id": "abcdef1234567890",
            "message": "PROJ-1 port the fix",
            "timestamp": "2024-05-01T10:00:00+00:00",
            "url": "https://gitlab.com/acme/widgets/-/commit/abcdef1",
            "author": { "name": "Maria", "email": "maria@example.com" },
            "added": [],
            "modified": ["src/lib.rs"],
            "removed": []
        }]
    });

    let event = pipeline
        .receive(WebhookDelivery::new(
            Provider::GitLab,
            "Push Hook",
            Some("glpat-token".to_string()),
            Bytes::from(serde_json::to_vec(&payload).unwrap()),
        ))
        .await
        .unwrap();
    assert_eq!(event.signature_valid, Some(true));

    pipeline.run(event.id).await.unwrap();

    let sha = CommitSha::new("abcdef1234567890").unwrap();
    let commit = entities
        .find_commit(integration.id, &sha)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(links.find_commit_links(commit.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_gitlab_merge_request_hook_is_logged_only() {
    let integration = Integration::new(
        Provider::GitLab,
        OrganizationId::new(),
        ProjectId::new(),
        "acme/widgets",
        "https://gitlab.com/acme/widgets",
        EncryptedToken::new("ciphertext"),
    );

    let events = Arc::new(InMemoryWebhookEventStore::new());
    let integrations = Arc::new(InMemoryIntegrationStore::with_integrations(vec![
        integration.clone(),
    ]));
    let entities = Arc::new(InMemoryEntityStore::new());
    let links = Arc::new(InMemoryLinkStore::new());
    let directory: Arc<MockTaskDirectory> = Arc::new(MockTaskDirectory::new());

    let pipeline = WebhookEventPipeline::new(
        events.clone(),
        integrations,
        EntityUpserter::new(entities.clone()),
        LinkingEngine::new(entities.clone(), links.clone(), directory.clone()),
        SmartCommitEngine::new(
            links,
            Arc::new(InMemoryExecutionStore::new()),
            directory,
            Arc::new(MockWorkItemCommands::new()),
        ),
    );

    let payload = json!({
        "object_kind": "merge_request",
        "project": { "web_url": "https://gitlab.com/acme/widgets" }
    });
    let event = pipeline
        .receive(WebhookDelivery::new(
            Provider::GitLab,
            "Merge Request Hook",
            None,
            Bytes::from(serde_json::to_vec(&payload).unwrap()),
        ))
        .await
        .unwrap();

    pipeline.run(event.id).await.unwrap();

    let stored = events.find(event.id).await.unwrap().unwrap();
    assert!(stored.is_processed());
    assert!(stored.processing_error.is_none());
}
