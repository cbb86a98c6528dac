use actgate_core::registry::ActionRegistry;
use actgate_core::types::{Action, ActionId};
use chrono::{DateTime, Utc};
use model_stream::{ChatMessage, Role};
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;

// ---------------------------------------------------------------------------
// ConversationMessage
// ---------------------------------------------------------------------------

/// One transcript entry. `content` is what the model sees; `display` is what
/// the user sees (assistant text with action markup removed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub display: String,
    pub at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            role,
            display: content.clone(),
            content,
            at: Utc::now(),
        }
    }

    pub fn assistant(raw: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: raw.into(),
            display: display.into(),
            at: Utc::now(),
        }
    }

    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct ActiveGeneration {
    pub(crate) id: u64,
    pub(crate) abort: Option<AbortHandle>,
}

/// Everything one session owns. Only ever touched under the session lock.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) messages: Vec<ConversationMessage>,
    pub(crate) registry: ActionRegistry,
    /// The "generation in progress" flag, with the handle needed to cancel it.
    pub(crate) generation: Option<ActiveGeneration>,
    pub(crate) generation_counter: u64,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            messages: Vec::new(),
            registry: ActionRegistry::new(),
            generation: None,
            generation_counter: 0,
        }
    }

    pub(crate) fn is_generating(&self) -> bool {
        self.generation.is_some()
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.as_ref().map(|g| g.id) == Some(generation)
    }

    pub(crate) fn running_action(&self) -> Option<ActionId> {
        self.registry.running().map(|a| a.id)
    }
}

// ---------------------------------------------------------------------------
// SessionSnapshot
// ---------------------------------------------------------------------------

/// Serializable view for clients attaching or re-attaching to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub messages: Vec<ConversationMessage>,
    pub actions: Vec<Action>,
    pub generating: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<ActionId>,
}

impl SessionSnapshot {
    pub(crate) fn capture(id: &str, state: &SessionState) -> Self {
        Self {
            id: id.to_string(),
            messages: state.messages.clone(),
            actions: state.registry.list().cloned().collect(),
            generating: state.is_generating(),
            running: state.running_action(),
        }
    }

    pub fn action(&self, id: ActionId) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }
}
