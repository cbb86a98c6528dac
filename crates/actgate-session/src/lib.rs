//! `actgate-session`: one conversation with a model that can propose actions.
//!
//! ```text
//! user text ─▶ SessionCoordinator ─▶ TokenSource ─▶ StreamTagScanner
//!                    │                                  │
//!                    │◀──── display tokens + proposals ─┘
//!                    ▼
//!             ActionRegistry ─ approve ─▶ Executor ─▶ result message
//!                                                      │
//!                                  continuation ◀──────┘
//! ```
//!
//! At most one generation or one running action exists per session at a
//! time. Everything observable is also broadcast as a [`SessionEvent`].

pub mod coordinator;
pub mod error;
pub mod events;
pub mod manager;
pub mod prompt;
pub mod session;
pub mod source;
pub mod watcher;

pub use coordinator::SessionCoordinator;
pub use error::{BusyReason, Result, SessionError};
pub use events::SessionEvent;
pub use manager::SessionManager;
pub use session::{ConversationMessage, SessionSnapshot};
pub use source::source_from_config;
pub use watcher::ConfigWatcher;
