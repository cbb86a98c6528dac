//! `model-stream`: token sources for actgate generations.
//!
//! ```text
//! Vec<ChatMessage>
//!     │
//!     ▼
//! TokenSource      ← OllamaSource (HTTP NDJSON), CommandSource (subprocess),
//!     │              ScriptedSource (fixed turns)
//!     ▼
//! TokenStream      ← futures::Stream<Item = Result<String>>
//!                    background task + mpsc channel
//! ```
//!
//! Every source follows the same contract: fragments arrive in order, the
//! stream ends with `None`, and an upstream failure is delivered as a final
//! `Err` item. Dropping the stream tears the producer down.

pub mod error;
pub mod http;
pub mod process;
pub mod scripted;
pub mod stream;
pub mod types;

pub use error::ModelError;
pub use http::OllamaSource;
pub use process::CommandSource;
pub use scripted::{ScriptStep, ScriptedSource};
pub use stream::{TokenSource, TokenStream};
pub use types::{ChatMessage, Role};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, ModelError>;
