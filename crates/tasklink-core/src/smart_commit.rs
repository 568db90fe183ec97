//! # Smart-Commit Module
//!
//! Executes `#command value` tokens embedded in commit messages against the
//! work-items linked to the commit.
//!
//! Execution is a full cross product: every parsed command runs against
//! every linked task. Commands are isolated from each other; one failure is
//! recorded and the batch moves on. Every attempt leaves a
//! [`SmartCommitExecution`] audit row whether or not the underlying
//! mutation took effect.

use crate::capabilities::{CapabilityError, Task, TaskDirectory, WorkItemCommands};
use crate::entities::{Commit, CommitId};
use crate::integration::Integration;
use crate::refs::{CommandKind, ReferenceParser, SmartCommand};
use crate::store::{ExecutionStore, LinkStore, StoreError};
use crate::{Actor, ParseError, TaskId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

uuid_identifier! {
    /// Identifier for one smart-commit execution record
    ExecutionId
}

/// Color assigned to labels created on the fly by `#label` commands
const DEFAULT_LABEL_COLOR: &str = "#6b7280";

// ============================================================================
// Core Types
// ============================================================================

/// Audit record of one `(commit, task, command)` attempt
///
/// Always created, whether the command succeeded or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartCommitExecution {
    pub id: ExecutionId,
    pub commit_id: CommitId,
    pub task_id: TaskId,
    pub kind: CommandKind,
    /// Original matched command text
    pub command_text: String,
    pub executed: bool,
    pub executed_at: Option<Timestamp>,
    pub execution_error: Option<String>,
    pub created_at: Timestamp,
}

/// Outcome of one command against one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub kind: CommandKind,
    pub command_text: String,
    pub success: bool,
    pub error: Option<String>,
    /// Audit row id; absent when the command was never individually
    /// attempted (no linked tasks)
    pub execution_id: Option<ExecutionId>,
}

/// Aggregate outcome of processing one commit's commands
#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    /// Number of distinct commands parsed from the message
    pub total_commands: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// One entry per `(command, task)` pair, in execution order
    pub results: Vec<CommandResult>,
}

impl ExecutionSummary {
    /// Summary for a message with no commands
    pub fn empty() -> Self {
        Self::default()
    }

    /// Check if every attempted command succeeded
    pub fn is_complete_success(&self) -> bool {
        self.failure_count == 0
    }

    /// Check if any command succeeded
    pub fn has_any_success(&self) -> bool {
        self.success_count > 0
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Failure of a single command against a single task
#[derive(Debug, Clone, thiserror::Error)]
pub enum CommandError {
    #[error("Status not found: {status}")]
    StatusNotFound { status: String },

    #[error("User not found: {username}")]
    UserNotFound { username: String },

    #[error("Invalid time value: {value}")]
    InvalidTimeValue { value: String },

    #[error("No linked tasks")]
    NoLinkedTasks,

    #[error("Unknown command type: {name}")]
    UnknownCommandType { name: String },

    #[error("{0}")]
    Capability(#[from] CapabilityError),
}

/// Failure of the batch machinery itself
///
/// Individual command failures never surface here; they are folded into
/// [`CommandResult`]s. This covers only the audit-trail store and link
/// lookups the batch cannot proceed without.
#[derive(Debug, thiserror::Error)]
pub enum SmartCommitError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),
}

// ============================================================================
// Engine
// ============================================================================

/// Parses and executes smart-commit commands for one commit
#[derive(Clone)]
pub struct SmartCommitEngine {
    links: Arc<dyn LinkStore>,
    executions: Arc<dyn ExecutionStore>,
    directory: Arc<dyn TaskDirectory>,
    commands: Arc<dyn WorkItemCommands>,
}

impl SmartCommitEngine {
    /// Create new smart-commit engine
    pub fn new(
        links: Arc<dyn LinkStore>,
        executions: Arc<dyn ExecutionStore>,
        directory: Arc<dyn TaskDirectory>,
        commands: Arc<dyn WorkItemCommands>,
    ) -> Self {
        Self {
            links,
            executions,
            directory,
            commands,
        }
    }

    /// Execute every command in the commit message against every linked task
    ///
    /// A message without commands returns an empty summary without touching
    /// the link store. Commands with no linked tasks are all recorded as
    /// failures, and no execution rows are written because nothing was
    /// individually attempted.
    pub async fn process(
        &self,
        integration: &Integration,
        commit: &Commit,
    ) -> Result<ExecutionSummary, SmartCommitError> {
        let parsed = ReferenceParser::parse_smart_commit_commands(&commit.message);
        if parsed.is_empty() {
            return Ok(ExecutionSummary::empty());
        }

        let tasks = self.resolve_linked_tasks(commit.id).await?;

        if tasks.is_empty() {
            warn!(
                sha = %commit.sha.short(),
                commands = parsed.len(),
                "Smart-commit commands present but commit has no linked tasks"
            );
            let results: Vec<CommandResult> = parsed
                .iter()
                .map(|cmd| CommandResult {
                    kind: cmd.kind,
                    command_text: cmd.raw.clone(),
                    success: false,
                    error: Some(CommandError::NoLinkedTasks.to_string()),
                    execution_id: None,
                })
                .collect();
            return Ok(Self::summarize(parsed.len(), results));
        }

        let mut results = Vec::with_capacity(parsed.len() * tasks.len());
        for task in &tasks {
            let task_results = self
                .run_commands(integration, commit, task, &parsed)
                .await?;
            results.extend(task_results);
        }

        Ok(Self::summarize(parsed.len(), results))
    }

    /// Execute the commit's commands against one task
    ///
    /// Entry point for re-running a single task's commands; parses the
    /// message itself.
    pub async fn execute_commands(
        &self,
        integration: &Integration,
        commit: &Commit,
        task: &Task,
    ) -> Result<Vec<CommandResult>, SmartCommitError> {
        let parsed = ReferenceParser::parse_smart_commit_commands(&commit.message);
        self.run_commands(integration, commit, task, &parsed).await
    }

    /// Execute one command against one task
    ///
    /// Unit entry point usable independently of the batch path. The actor
    /// defaults to [`Actor::System`] when absent. Does not write an audit
    /// row; the batch path owns those.
    pub async fn execute_command(
        &self,
        integration: &Integration,
        kind: CommandKind,
        value: &str,
        task: &Task,
        actor: Option<Actor>,
    ) -> Result<(), CommandError> {
        let actor = actor.unwrap_or(Actor::System);
        match kind {
            CommandKind::Transition => self.transition(value, task, actor).await,
            CommandKind::Comment => self.comment(value, task, actor).await,
            CommandKind::Time => self.log_time(value, task, actor).await,
            CommandKind::Assign => self.assign(integration, value, task, actor).await,
            CommandKind::Label => self.label(integration, value, task, actor).await,
        }
    }

    /// Execute a command given its raw name
    ///
    /// Rejects names outside the closed command set instead of silently
    /// falling through.
    pub async fn execute_command_by_name(
        &self,
        integration: &Integration,
        name: &str,
        value: &str,
        task: &Task,
        actor: Option<Actor>,
    ) -> Result<(), CommandError> {
        let kind = CommandKind::from_name(name).ok_or_else(|| CommandError::UnknownCommandType {
            name: name.to_string(),
        })?;
        self.execute_command(integration, kind, value, task, actor).await
    }

    // ------------------------------------------------------------------
    // Batch internals
    // ------------------------------------------------------------------

    async fn run_commands(
        &self,
        integration: &Integration,
        commit: &Commit,
        task: &Task,
        commands: &[SmartCommand],
    ) -> Result<Vec<CommandResult>, SmartCommitError> {
        let mut results = Vec::with_capacity(commands.len());

        for command in commands {
            let outcome = self
                .execute_command(
                    integration,
                    command.kind,
                    &command.value,
                    task,
                    Some(Actor::System),
                )
                .await;

            let execution = SmartCommitExecution {
                id: ExecutionId::new(),
                commit_id: commit.id,
                task_id: task.id,
                kind: command.kind,
                command_text: command.raw.clone(),
                executed: outcome.is_ok(),
                executed_at: outcome.is_ok().then(Timestamp::now),
                execution_error: outcome.as_ref().err().map(|e| e.to_string()),
                created_at: Timestamp::now(),
            };
            let execution_id = execution.id;
            self.executions.insert(execution).await?;

            match &outcome {
                Ok(()) => debug!(
                    command = %command.kind,
                    task = %task.key,
                    "Smart-commit command executed"
                ),
                Err(error) => debug!(
                    command = %command.kind,
                    task = %task.key,
                    error = %error,
                    "Smart-commit command failed"
                ),
            }

            results.push(CommandResult {
                kind: command.kind,
                command_text: command.raw.clone(),
                success: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
                execution_id: Some(execution_id),
            });
        }

        Ok(results)
    }

    async fn resolve_linked_tasks(&self, commit: CommitId) -> Result<Vec<Task>, SmartCommitError> {
        let mut tasks = Vec::new();
        for link in self.links.find_commit_links(commit).await? {
            match self.directory.find_task_by_id(link.task_id).await? {
                Some(task) => tasks.push(task),
                None => warn!(task_id = %link.task_id, "Linked task no longer resolvable; skipping"),
            }
        }
        Ok(tasks)
    }

    fn summarize(total_commands: usize, results: Vec<CommandResult>) -> ExecutionSummary {
        let success_count = results.iter().filter(|r| r.success).count();
        let failure_count = results.len() - success_count;
        ExecutionSummary {
            total_commands,
            success_count,
            failure_count,
            results,
        }
    }

    // ------------------------------------------------------------------
    // Command handlers
    // ------------------------------------------------------------------

    async fn transition(
        &self,
        value: &str,
        task: &Task,
        actor: Actor,
    ) -> Result<(), CommandError> {
        let wanted = value.trim();
        let statuses = self.directory.workflow_statuses(task.project_id).await?;

        let status = statuses
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| CommandError::StatusNotFound {
                status: wanted.to_string(),
            })?;

        self.commands
            .transition_status(task.id, status.id, actor)
            .await?;
        Ok(())
    }

    async fn comment(&self, value: &str, task: &Task, actor: Actor) -> Result<(), CommandError> {
        self.commands.add_comment(task.id, value.trim(), actor).await?;
        Ok(())
    }

    async fn log_time(&self, value: &str, task: &Task, actor: Actor) -> Result<(), CommandError> {
        let minutes =
            ReferenceParser::parse_time_value(value).ok_or_else(|| CommandError::InvalidTimeValue {
                value: value.trim().to_string(),
            })?;

        self.commands.log_time(task.id, minutes, actor).await?;
        Ok(())
    }

    async fn assign(
        &self,
        integration: &Integration,
        value: &str,
        task: &Task,
        actor: Actor,
    ) -> Result<(), CommandError> {
        let username = value.trim().trim_start_matches('@');

        let user = self
            .directory
            .find_user_by_username(integration.organization_id, username)
            .await?
            .ok_or_else(|| CommandError::UserNotFound {
                username: username.to_string(),
            })?;

        self.commands.assign_task(task.id, user.id, actor).await?;
        Ok(())
    }

    async fn label(
        &self,
        integration: &Integration,
        value: &str,
        task: &Task,
        actor: Actor,
    ) -> Result<(), CommandError> {
        let name = value.trim();

        let label = match self
            .directory
            .find_label(integration.organization_id, name)
            .await?
        {
            Some(label) => label,
            None => {
                self.directory
                    .create_label(integration.organization_id, name, DEFAULT_LABEL_COLOR)
                    .await?
            }
        };

        self.commands.add_label(task.id, label.id, actor).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "smart_commit_tests.rs"]
mod tests;
