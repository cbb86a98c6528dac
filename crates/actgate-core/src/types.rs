use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ActgateError;

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    ReadFile,
    RunCmd,
    RunScript,
    WriteFile,
}

impl ActionKind {
    pub fn all() -> &'static [ActionKind] {
        &[
            ActionKind::ReadFile,
            ActionKind::RunCmd,
            ActionKind::RunScript,
            ActionKind::WriteFile,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::ReadFile => "READ_FILE",
            ActionKind::RunCmd => "RUN_CMD",
            ActionKind::RunScript => "RUN_SCRIPT",
            ActionKind::WriteFile => "WRITE_FILE",
        }
    }

    /// The literal markup that opens a tag of this kind.
    pub fn opener(self) -> &'static str {
        match self {
            ActionKind::ReadFile => "[ACTION:READ_FILE:",
            ActionKind::RunCmd => "[ACTION:RUN_CMD:",
            ActionKind::RunScript => "[ACTION:RUN_SCRIPT:",
            ActionKind::WriteFile => "[ACTION:WRITE_FILE:",
        }
    }

    /// Kinds whose payload is `<target>:<content>` rather than a bare target.
    pub fn splits_payload(self) -> bool {
        matches!(self, ActionKind::RunScript | ActionKind::WriteFile)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = ActgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READ_FILE" => Ok(ActionKind::ReadFile),
            "RUN_CMD" => Ok(ActionKind::RunCmd),
            "RUN_SCRIPT" => Ok(ActionKind::RunScript),
            "WRITE_FILE" => Ok(ActionKind::WriteFile),
            _ => Err(ActgateError::InvalidKind(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Denied,
}

impl ActionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Running => "running",
            ActionStatus::Succeeded => "succeeded",
            ActionStatus::Failed => "failed",
            ActionStatus::Denied => "denied",
        }
    }

    /// Whether `self -> to` is one of the legal lifecycle edges.
    pub fn can_transition_to(self, to: ActionStatus) -> bool {
        use ActionStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Denied)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Pending)
                | (Failed, Pending)
        )
    }

    /// Settled states: nothing is waiting on the user or the executor.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            ActionStatus::Succeeded | ActionStatus::Failed | ActionStatus::Denied
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ActionId
// ---------------------------------------------------------------------------

/// Session-scoped action identifier. Rendered as `a<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

impl std::str::FromStr for ActionId {
    type Err = ActgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('a').unwrap_or(s);
        digits
            .parse::<u64>()
            .map(ActionId)
            .map_err(|_| ActgateError::InvalidActionId(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ActionDescriptor / Action
// ---------------------------------------------------------------------------

/// What the scanner recovers from one tag, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub kind: ActionKind,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ActionDescriptor {
    pub fn new(kind: ActionKind, target: impl Into<String>, content: Option<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub kind: ActionKind,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Action {
    pub fn new(id: ActionId, descriptor: ActionDescriptor) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: descriptor.kind,
            target: descriptor.target,
            content: descriptor.content,
            status: ActionStatus::Pending,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            kind: self.kind,
            target: self.target.clone(),
            content: self.content.clone(),
        }
    }

    /// One-line human summary, e.g. `RUN_CMD ls -la`.
    pub fn summary(&self) -> String {
        match (&self.kind, &self.content) {
            (ActionKind::RunScript, Some(args)) => {
                format!("{} {} {}", self.kind, self.target, args)
            }
            (ActionKind::WriteFile, Some(content)) => {
                format!("{} {} ({} bytes)", self.kind, self.target, content.len())
            }
            _ => format!("{} {}", self.kind, self.target),
        }
    }
}

// ---------------------------------------------------------------------------
// TargetOs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOs {
    Linux,
    Macos,
    Windows,
}

impl TargetOs {
    pub fn host() -> Self {
        match std::env::consts::OS {
            "windows" => TargetOs::Windows,
            "macos" => TargetOs::Macos,
            _ => TargetOs::Linux,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetOs::Linux => "linux",
            TargetOs::Macos => "macos",
            TargetOs::Windows => "windows",
        }
    }

    pub fn is_windows(self) -> bool {
        self == TargetOs::Windows
    }
}

impl Default for TargetOs {
    fn default() -> Self {
        TargetOs::host()
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TargetOs {
    type Err = ActgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linux" => Ok(TargetOs::Linux),
            "macos" => Ok(TargetOs::Macos),
            "windows" => Ok(TargetOs::Windows),
            _ => Err(ActgateError::InvalidOs(s.to_string())),
        }
    }
}
