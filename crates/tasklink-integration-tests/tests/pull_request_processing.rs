//! End-to-end tests for pull-request event processing.

mod common;

use common::{delivery, github_harness, pull_request_payload};
use tasklink_core::{EntityStore, IntegrationSettings, LinkMethod, LinkStore, PullRequestStatus};

#[tokio::test]
async fn test_pr_link_method_from_description_only() {
    let h = github_harness(IntegrationSettings::default(), None);
    let task = h.directory.add_task(
        h.integration.organization_id,
        h.integration.project_id,
        "PROJ-3",
    );

    let payload =
        pull_request_payload(3, "Tighten validation", Some("Closes PROJ-3"), "open", false);
    let event = h
        .pipeline
        .receive(delivery("pull_request", &payload))
        .await
        .unwrap();
    h.pipeline.run(event.id).await.unwrap();

    let pr = h
        .entities
        .find_pull_request(h.integration.id, 3)
        .await
        .unwrap()
        .unwrap();
    let links = h.links.find_pull_request_links(pr.id).await.unwrap();

    assert_eq!(links.len(), 1);
    assert_eq!(links[0].task_id, task.id);
    assert_eq!(links[0].method, LinkMethod::PrDescription);
    assert!(links[0].closes_task);
}

#[tokio::test]
async fn test_pr_key_in_both_texts_links_once_as_title() {
    let h = github_harness(IntegrationSettings::default(), None);
    h.directory.add_task(
        h.integration.organization_id,
        h.integration.project_id,
        "PROJ-3",
    );

    let payload = pull_request_payload(
        3,
        "PROJ-3 tighten validation",
        Some("More detail on PROJ-3"),
        "open",
        false,
    );
    let event = h
        .pipeline
        .receive(delivery("pull_request", &payload))
        .await
        .unwrap();
    h.pipeline.run(event.id).await.unwrap();

    let pr = h
        .entities
        .find_pull_request(h.integration.id, 3)
        .await
        .unwrap()
        .unwrap();
    let links = h.links.find_pull_request_links(pr.id).await.unwrap();

    // Deduplicated across sources; the title wins the method.
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].method, LinkMethod::PrTitle);
    assert!(!links[0].closes_task);
}

#[tokio::test]
async fn test_pr_reopened_event_updates_existing_record() {
    let h = github_harness(IntegrationSettings::default(), None);

    let opened = pull_request_payload(5, "First title", None, "open", false);
    let event = h
        .pipeline
        .receive(delivery("pull_request", &opened))
        .await
        .unwrap();
    h.pipeline.run(event.id).await.unwrap();

    let merged = pull_request_payload(5, "Final title", None, "closed", true);
    let event = h
        .pipeline
        .receive(delivery("pull_request", &merged))
        .await
        .unwrap();
    h.pipeline.run(event.id).await.unwrap();

    let pr = h
        .entities
        .find_pull_request(h.integration.id, 5)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(pr.title, "Final title");
    assert_eq!(pr.status, PullRequestStatus::Merged);
    assert!(pr.merged_at.is_some());
}

#[tokio::test]
async fn test_merged_pr_with_auto_close_performs_no_transition() {
    let h = github_harness(
        IntegrationSettings {
            auto_close_on_merge: true,
            ..IntegrationSettings::default()
        },
        None,
    );
    h.directory.add_task(
        h.integration.organization_id,
        h.integration.project_id,
        "PROJ-3",
    );

    let payload = pull_request_payload(3, "Closes PROJ-3", None, "closed", true);
    let event = h
        .pipeline
        .receive(delivery("pull_request", &payload))
        .await
        .unwrap();
    h.pipeline.run(event.id).await.unwrap();

    // The toggle is only a logged placeholder; nothing may be mutated.
    assert!(h.commands.calls().is_empty());
}

#[tokio::test]
async fn test_pr_links_are_not_updated_on_redelivery() {
    let h = github_harness(IntegrationSettings::default(), None);
    h.directory.add_task(
        h.integration.organization_id,
        h.integration.project_id,
        "PROJ-3",
    );

    // First delivery links with closes_task=true from the description.
    let with_closing =
        pull_request_payload(3, "Tighten validation", Some("Closes PROJ-3"), "open", false);
    let event = h
        .pipeline
        .receive(delivery("pull_request", &with_closing))
        .await
        .unwrap();
    h.pipeline.run(event.id).await.unwrap();

    // Second delivery drops the closing keyword; the existing link must
    // stay untouched.
    let without_closing =
        pull_request_payload(3, "Tighten validation", Some("About PROJ-3"), "open", false);
    let event = h
        .pipeline
        .receive(delivery("pull_request", &without_closing))
        .await
        .unwrap();
    h.pipeline.run(event.id).await.unwrap();

    let pr = h
        .entities
        .find_pull_request(h.integration.id, 3)
        .await
        .unwrap()
        .unwrap();
    let links = h.links.find_pull_request_links(pr.id).await.unwrap();

    assert_eq!(links.len(), 1);
    assert!(links[0].closes_task);
}
