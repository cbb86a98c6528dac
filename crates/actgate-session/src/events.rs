use actgate_core::types::{Action, ActionId};
use serde::{Deserialize, Serialize};

use crate::session::ConversationMessage;

/// Broadcast to every subscriber of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    GenerationStarted {
        generation: u64,
    },
    /// Display text with action markup already removed.
    Token {
        generation: u64,
        text: String,
    },
    GenerationFinished {
        generation: u64,
        actions: Vec<ActionId>,
        discarded: usize,
    },
    GenerationFailed {
        generation: u64,
        error: String,
    },
    GenerationCancelled {
        generation: u64,
    },
    ActionProposed {
        action: Action,
    },
    ActionUpdated {
        action: Action,
    },
    MessageAppended {
        message: ConversationMessage,
    },
}

impl SessionEvent {
    /// True for the events that end a generation.
    pub fn ends_generation(&self) -> bool {
        matches!(
            self,
            SessionEvent::GenerationFinished { .. }
                | SessionEvent::GenerationFailed { .. }
                | SessionEvent::GenerationCancelled { .. }
        )
    }
}
