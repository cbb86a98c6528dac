use std::fmt;

use actgate_core::types::ActionId;
use actgate_core::ActgateError;
use model_stream::ModelError;
use thiserror::Error;

/// Why a request was turned away by the single-flight guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyReason {
    Generating,
    ActionRunning(ActionId),
}

impl fmt::Display for BusyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusyReason::Generating => f.write_str("a generation is in progress"),
            BusyReason::ActionRunning(id) => write!(f, "action {id} is running"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session busy: {0}")]
    Busy(BusyReason),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Core(#[from] ActgateError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
