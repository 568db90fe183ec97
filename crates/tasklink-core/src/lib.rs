//! # Tasklink Core
//!
//! Core business logic for the Tasklink webhook intake and work-item linking
//! service.
//!
//! This crate contains the domain logic for ingesting version-control
//! provider webhooks, validating signatures, upserting normalized
//! commit/branch/pull-request records, linking them to work-items found in
//! free text, and executing smart-commit commands embedded in commit
//! messages.
//!
//! ## Architecture
//!
//! The core follows clean architecture principles:
//! - Business logic depends only on trait abstractions
//! - Infrastructure implementations are injected at runtime
//! - All external dependencies are abstracted behind traits
//!
//! ## Usage
//!
//! ```rust
//! use tasklink_core::{EventId, TaskKey};
//!
//! let event_id = EventId::new();
//! let key: TaskKey = "PROJ-42".parse().unwrap();
//! assert_eq!(key.project_key(), "PROJ");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// Re-export commonly used types
pub use ulid::Ulid;
pub use uuid::Uuid;

/// Standard result type for tasklink operations
pub type TasklinkResult<T> = Result<T, TasklinkError>;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Unique identifier for inbound webhook events
///
/// Uses ULID for lexicographic sorting and global uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    /// Generate a new unique event ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get string representation of event ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

macro_rules! uuid_identifier {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Get underlying UUID
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = s.parse::<Uuid>().map_err(|_| ParseError::InvalidFormat {
                    expected: "UUID format".to_string(),
                    actual: s.to_string(),
                })?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_identifier! {
    /// Identifier for a provider/project integration binding
    IntegrationId
}

uuid_identifier! {
    /// Identifier for an organization owning projects and work-items
    OrganizationId
}

uuid_identifier! {
    /// Identifier for an internal project
    ProjectId
}

uuid_identifier! {
    /// Identifier for a work-item (task)
    TaskId
}

uuid_identifier! {
    /// Identifier for an internal user
    UserId
}

uuid_identifier! {
    /// Identifier for a work-item label
    LabelId
}

/// Git commit SHA, scoped to an integration for identity
///
/// Accepts abbreviated (7 hex chars) through full SHA-256 (64 hex chars)
/// hashes. Stored lowercase for stable identity comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitSha(String);

impl CommitSha {
    /// Create new commit SHA with validation
    ///
    /// # Validation Rules
    /// - Must be 7-64 characters
    /// - Must contain only hexadecimal digits
    pub fn new(sha: impl Into<String>) -> Result<Self, ValidationError> {
        let sha = sha.into().to_ascii_lowercase();

        if sha.len() < 7 {
            return Err(ValidationError::TooShort {
                field: "commit_sha".to_string(),
                min_length: 7,
            });
        }

        if sha.len() > 64 {
            return Err(ValidationError::TooLong {
                field: "commit_sha".to_string(),
                max_length: 64,
            });
        }

        if !sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidCharacters {
                field: "commit_sha".to_string(),
                invalid_chars: "non-hexadecimal".to_string(),
            });
        }

        Ok(Self(sha))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log output (first 8 characters)
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for CommitSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CommitSha {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Work-item reference key in `PROJECT-NUMBER` form
///
/// The project prefix is two or more uppercase letters/digits starting with
/// a letter; the suffix is the numeric item id. Examples: `PROJ-42`,
/// `B2B-7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey(String);

impl TaskKey {
    /// Create new task key with validation
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();

        let Some((prefix, number)) = key.split_once('-') else {
            return Err(ValidationError::InvalidFormat {
                field: "task_key".to_string(),
                message: "expected PROJECT-NUMBER form".to_string(),
            });
        };

        let prefix_ok = prefix.len() >= 2
            && prefix.chars().next().is_some_and(|c| c.is_ascii_uppercase())
            && prefix
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());

        if !prefix_ok {
            return Err(ValidationError::InvalidFormat {
                field: "task_key".to_string(),
                message: "project prefix must be 2+ uppercase letters/digits starting with a letter"
                    .to_string(),
            });
        }

        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::InvalidFormat {
                field: "task_key".to_string(),
                message: "item number must be one or more digits".to_string(),
            });
        }

        Ok(Self(key))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Project key prefix (substring before the first hyphen)
    pub fn project_key(&self) -> &str {
        self.0.split_once('-').map(|(p, _)| p).unwrap_or(&self.0)
    }

    /// Numeric item id (substring after the first hyphen)
    pub fn item_number(&self) -> u64 {
        self.0
            .split_once('-')
            .and_then(|(_, n)| n.parse().ok())
            .unwrap_or(0)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// Provider and Actor Types
// ============================================================================

/// Version-control providers this service accepts webhooks from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    GitHub,
    GitLab,
}

impl Provider {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" => Ok(Self::GitHub),
            "gitlab" => Ok(Self::GitLab),
            _ => Err(ParseError::InvalidFormat {
                expected: "github or gitlab".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

/// Who an operation is performed on behalf of
///
/// Webhook-driven mutations (smart-commit commands, automatic linking)
/// execute as [`Actor::System`]; request-path operations carry the
/// authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    /// The service itself, for provider-driven mutations
    System,
    /// An authenticated internal user
    User(UserId),
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User(id) => write!(f, "user:{}", id),
        }
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> Duration {
        let chrono_duration = self.0.signed_duration_since(other.0);
        chrono_duration.to_std().unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for retry and alerting decisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Temporary failures that should be retried
    Transient,
    /// Permanent failures that won't succeed on retry
    Permanent,
    /// Security-related failures requiring immediate attention
    Security,
    /// Configuration errors preventing startup
    Configuration,
}

/// Error type for input validation failures
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },

    #[error("Field '{field}' is below minimum length of {min_length}")]
    TooShort { field: String, min_length: usize },

    #[error("Field '{field}' contains invalid characters: {invalid_chars}")]
    InvalidCharacters {
        field: String,
        invalid_chars: String,
    },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

/// Top-level error type for tasklink operations
#[derive(Debug, thiserror::Error)]
pub enum TasklinkError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Capability error: {0}")]
    Capability(#[from] capabilities::CapabilityError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TasklinkError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Capability(e) => e.is_transient(),
            Self::Internal { .. } => true,
            Self::Validation(_) => false,
            Self::Parse(_) => false,
            Self::Configuration { .. } => false,
        }
    }

    /// Get error category for monitoring and alerting
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Permanent,
            Self::Parse(_) => ErrorCategory::Permanent,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Store(e) if e.is_transient() => ErrorCategory::Transient,
            Self::Store(_) => ErrorCategory::Permanent,
            Self::Capability(e) if e.is_transient() => ErrorCategory::Transient,
            Self::Capability(_) => ErrorCategory::Permanent,
            Self::Internal { .. } => ErrorCategory::Transient,
        }
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Provider signature verification
pub mod signature;

/// Task reference, closing keyword, and smart-commit command parsing
pub mod refs;

/// Integration aggregate binding a provider repository to a project
pub mod integration;

/// Normalized Commit/Branch/PullRequest records and idempotent upsert
pub mod entities;

/// Linking of commits, branches, and pull requests to work-items
pub mod linking;

/// Smart-commit command execution
pub mod smart_commit;

/// Webhook event lifecycle and processing pipeline
pub mod webhook;

/// Persistence traits
pub mod store;

/// External collaborator capability traits
pub mod capabilities;

/// In-memory store adapters
pub mod adapters;

// Re-export key types for convenience
pub use capabilities::{
    AccessControl, CapabilityError, DirectoryUser, Label, Project, StatusId, Task, TaskDirectory,
    WorkItemCommands, WorkflowStatus,
};
pub use entities::{
    Branch, BranchFragment, BranchId, BranchStatus, ChangeStats, Commit, CommitFragment, CommitId,
    EntityUpserter, FragmentError, PullRequest, PullRequestFragment, PullRequestId,
    PullRequestStatus, Signature, Upserted,
};
pub use integration::{
    EncryptedToken, Integration, IntegrationSettings, SecretCipher, SecretCipherError,
    WebhookSecret,
};
pub use linking::{
    CommitTaskLink, LinkError, LinkId, LinkMethod, LinkingEngine, PullRequestTaskLink,
};
pub use refs::{CommandKind, ReferenceParser, SmartCommand};
pub use signature::{SignatureVerifier, VerificationOutcome};
pub use smart_commit::{
    CommandError, CommandResult, ExecutionId, ExecutionSummary, SmartCommitEngine,
    SmartCommitExecution,
};
pub use store::{
    CreateOutcome, EntityStore, ExecutionStore, IntegrationStore, LinkStore, StoreError,
    WebhookEventStore,
};
pub use webhook::{
    EventState, WebhookDelivery, WebhookError, WebhookEvent, WebhookEventPipeline,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
