//! # Reference Parsing Module
//!
//! Pure text parsing for the three grammars that drive linking and smart
//! commits:
//!
//! - task references (`PROJ-42`) in branch names, commit messages, and
//!   pull-request titles/descriptions,
//! - closing keywords (`closes PROJ-42`, `fixes PROJ-7`),
//! - smart-commit command tokens (`#comment looks good #time 2h`).
//!
//! Everything in this module is side-effect free and order-preserving.

use crate::TaskKey;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Task reference grammar: 2+ uppercase letters/digits starting with a
/// letter, a hyphen, then the numeric item id.
fn task_key_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Z][A-Z0-9]+-[0-9]+\b").expect("task key pattern is valid")
    })
}

/// Smart-commit command token: `#` immediately followed by a command name.
fn command_token_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#([A-Za-z]+)").expect("command token pattern is valid"))
}

/// Verbs that mark a commit or pull request as completing a task.
const CLOSING_KEYWORDS: [&str; 9] = [
    "close", "closes", "closed", "fix", "fixes", "fixed", "resolve", "resolves", "resolved",
];

// ============================================================================
// Command Types
// ============================================================================

/// Smart-commit command types
///
/// Closed set; unknown command names are dropped at parse time rather than
/// carried as an open string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// Transition the task to a named workflow status (`#close Done`)
    Transition,
    /// Add a comment to the task (`#comment looks good`)
    Comment,
    /// Log work time against the task (`#time 2h 30m`)
    Time,
    /// Assign the task to a user (`#assign @maria`)
    Assign,
    /// Attach a label to the task (`#label backend`)
    Label,
}

impl CommandKind {
    /// Map a raw command name to its kind; unknown names map to `None`
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "close" => Some(Self::Transition),
            "comment" => Some(Self::Comment),
            "time" => Some(Self::Time),
            "assign" => Some(Self::Assign),
            "label" => Some(Self::Label),
            _ => None,
        }
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transition => "transition",
            Self::Comment => "comment",
            Self::Time => "time",
            Self::Assign => "assign",
            Self::Label => "label",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One parsed smart-commit command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartCommand {
    /// Command type
    pub kind: CommandKind,

    /// Value text up to the next `#token` or end of message, trimmed
    pub value: String,

    /// Original matched substring, kept verbatim for the audit trail
    pub raw: String,
}

// ============================================================================
// Parser
// ============================================================================

/// Stateless parser over the task-reference and smart-commit grammars
pub struct ReferenceParser;

impl ReferenceParser {
    /// Extract the first task key from a slash-delimited branch name
    ///
    /// The key may appear in any segment: `feature/PROJ-12-login` and
    /// `PROJ-12` both yield `PROJ-12`.
    pub fn extract_task_key_from_branch(branch_name: &str) -> Option<TaskKey> {
        task_key_pattern()
            .find(branch_name)
            .and_then(|m| TaskKey::new(m.as_str()).ok())
    }

    /// Extract all task references from free text
    ///
    /// Duplicates are collapsed; first-seen order is preserved.
    pub fn extract_references(text: &str) -> Vec<TaskKey> {
        let mut keys: Vec<TaskKey> = Vec::new();
        for found in task_key_pattern().find_iter(text) {
            let Ok(key) = TaskKey::new(found.as_str()) else {
                continue;
            };
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Detect a closing keyword immediately preceding `task_key`
    ///
    /// True iff `text` contains one of the closing verbs followed by
    /// whitespace and exactly `task_key`, all case-insensitive.
    pub fn detects_closing_keyword(text: &str, task_key: &TaskKey) -> bool {
        if text.is_empty() {
            return false;
        }

        let pattern = format!(
            r"(?i)\b({})\s+{}\b",
            CLOSING_KEYWORDS.join("|"),
            regex::escape(task_key.as_str())
        );

        // The key is escaped, so the pattern is always valid.
        Regex::new(&pattern)
            .map(|re| re.is_match(text))
            .unwrap_or(false)
    }

    /// Tokenize smart-commit commands embedded in a commit message
    ///
    /// Each `#name value` sequence becomes one command; the value runs to
    /// the next `#token` or end of message. Unknown command names are
    /// ignored. A message may contain zero to many commands.
    pub fn parse_smart_commit_commands(message: &str) -> Vec<SmartCommand> {
        let tokens: Vec<_> = command_token_pattern().find_iter(message).collect();
        let mut commands = Vec::new();

        for (index, token) in tokens.iter().enumerate() {
            let name = &message[token.start() + 1..token.end()];
            let Some(kind) = CommandKind::from_name(name) else {
                continue;
            };

            let value_end = tokens
                .get(index + 1)
                .map(|next| next.start())
                .unwrap_or(message.len());
            let value = message[token.end()..value_end].trim();
            let raw = message[token.start()..value_end].trim_end();

            commands.push(SmartCommand {
                kind,
                value: value.to_string(),
                raw: raw.to_string(),
            });
        }

        commands
    }

    /// Parse a work-time duration to minutes
    ///
    /// Accepts whitespace-separated `<n>w|d|h|m` tokens and bare minute
    /// counts: `"2h"` → 120, `"1d 2h"` → 600, `"90"` → 90. Working-time
    /// factors apply: a day is 8 hours, a week is 5 days.
    ///
    /// Returns `None` when any token is malformed or the total is zero.
    pub fn parse_time_value(value: &str) -> Option<u32> {
        let mut total: u32 = 0;
        let mut saw_token = false;

        for token in value.split_whitespace() {
            saw_token = true;

            let (digits, unit) = match token.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
                Some((split, _)) => token.split_at(split),
                None => (token, ""),
            };

            let amount: u32 = digits.parse().ok()?;
            let factor = match unit {
                "w" => 5 * 8 * 60,
                "d" => 8 * 60,
                "h" => 60,
                "m" | "" => 1,
                _ => return None,
            };

            total = total.checked_add(amount.checked_mul(factor)?)?;
        }

        if !saw_token || total == 0 {
            return None;
        }

        Some(total)
    }
}

#[cfg(test)]
#[path = "refs_tests.rs"]
mod tests;
