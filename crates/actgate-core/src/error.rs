use thiserror::Error;

use crate::types::{ActionId, ActionStatus};

#[derive(Debug, Error)]
pub enum ActgateError {
    #[error("action not found: {0}")]
    ActionNotFound(ActionId),

    #[error("invalid transition for action {id} from {from} to {to}")]
    InvalidTransition {
        id: ActionId,
        from: ActionStatus,
        to: ActionStatus,
    },

    #[error("invalid action id: {0}")]
    InvalidActionId(String),

    #[error("invalid action kind: {0}")]
    InvalidKind(String),

    #[error("invalid target os: {0}")]
    InvalidOs(String),

    #[error("invalid blocked-command pattern '{id}': {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ActgateError>;
