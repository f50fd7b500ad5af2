//! Rule results as reported by the rule engine.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Safe,
    Warning,
    Danger,
    Forbidden,
    /// Rule could not be evaluated.
    Error,
}

impl Level {
    /// Ordering used for the aggregate; SAFE and ERROR never rank.
    pub fn precedence(self) -> u8 {
        match self {
            Level::Forbidden => 3,
            Level::Danger => 2,
            Level::Warning => 1,
            Level::Safe | Level::Error => 0,
        }
    }

    /// Needs the user's acknowledgement before confirming.
    pub fn needs_processing(self) -> bool {
        self.precedence() > 0
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Safe => "safe",
            Level::Warning => "warning",
            Level::Danger => "danger",
            Level::Forbidden => "forbidden",
            Level::Error => "error",
        };
        f.write_str(s)
    }
}

/// One rule's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResult {
    pub id: String,
    pub level: Level,
    pub enable: bool,
}

impl RuleResult {
    pub fn new(id: impl Into<String>, level: Level) -> Self {
        Self {
            id: id.into(),
            level,
            enable: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enable = false;
        self
    }
}

/// Aggregate over a session's results and processed set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecurityVerdict {
    /// Highest-precedence enabled, unprocessed level; `None` when nothing needs attention.
    pub level: Option<Level>,
    /// Confirm stays blocked until these are processed.
    pub has_unprocessed: bool,
    /// Enabled, unprocessed results needing acknowledgement, in result order.
    pub pending_rule_ids: Vec<String>,
    /// Session revision the verdict was computed at.
    pub revision: u64,
}
