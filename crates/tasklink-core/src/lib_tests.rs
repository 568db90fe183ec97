//! Tests for core domain types.

use super::*;

#[test]
fn test_event_id_roundtrip() {
    let id = EventId::new();
    let parsed: EventId = id.as_str().parse().unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn test_event_id_rejects_garbage() {
    assert!("not-a-ulid!".parse::<EventId>().is_err());
}

#[test]
fn test_commit_sha_normalizes_to_lowercase() {
    let sha = CommitSha::new("ABCDEF1234567890").unwrap();
    assert_eq!(sha.as_str(), "abcdef1234567890");
    assert_eq!(sha.short(), "abcdef12");
}

#[test]
fn test_commit_sha_rejects_short_and_non_hex() {
    assert!(CommitSha::new("abc123").is_err());
    assert!(CommitSha::new("xyzxyzxyz").is_err());
}

#[test]
fn test_task_key_accepts_digits_in_prefix() {
    let key = TaskKey::new("B2B-12").unwrap();
    assert_eq!(key.project_key(), "B2B");
    assert_eq!(key.item_number(), 12);
}

#[test]
fn test_task_key_rejects_bad_shapes() {
    // No hyphen
    assert!(TaskKey::new("PROJ42").is_err());
    // Prefix must start with a letter
    assert!(TaskKey::new("2B-12").is_err());
    // Prefix must be at least two characters
    assert!(TaskKey::new("P-1").is_err());
    // Number must be digits
    assert!(TaskKey::new("PROJ-1a").is_err());
    // Lowercase is not a reference
    assert!(TaskKey::new("proj-1").is_err());
}

#[test]
fn test_provider_parsing() {
    assert_eq!("github".parse::<Provider>().unwrap(), Provider::GitHub);
    assert_eq!("GitLab".parse::<Provider>().unwrap(), Provider::GitLab);
    assert!("bitbucket".parse::<Provider>().is_err());
}

#[test]
fn test_timestamp_rfc3339_roundtrip() {
    let ts = Timestamp::from_rfc3339("2024-05-01T12:30:00+02:00").unwrap();
    let reparsed = Timestamp::from_rfc3339(&ts.to_rfc3339()).unwrap();
    assert_eq!(ts, reparsed);
}

#[test]
fn test_timestamp_rejects_garbage() {
    assert!(Timestamp::from_rfc3339("yesterday").is_err());
}

#[test]
fn test_actor_display() {
    assert_eq!(Actor::System.to_string(), "system");

    let user = UserId::new();
    assert_eq!(Actor::User(user).to_string(), format!("user:{}", user));
}

#[test]
fn test_error_categories() {
    let validation = TasklinkError::Validation(ValidationError::Required {
        field: "x".to_string(),
    });
    assert!(!validation.is_transient());
    assert_eq!(validation.error_category(), ErrorCategory::Permanent);

    let unavailable = TasklinkError::Store(store::StoreError::Unavailable {
        message: "down".to_string(),
    });
    assert!(unavailable.is_transient());
    assert_eq!(unavailable.error_category(), ErrorCategory::Transient);
}
